//! Per-org app instance management.
//!
//! The host creates one app instance per `(plugin, org)` pair from that org's
//! [`AppInstanceSettings`]. When the settings' `updated` timestamp changes the
//! cached instance is disposed and a fresh one is built.

use crate::host::protocol::{AppInstanceSettings, PluginContext};
use crate::host::{AppInstance, InstanceDisposer};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Builds app instances from per-org settings
#[async_trait]
pub trait InstanceFactory: Send + Sync + 'static {
    type Instance: AppInstance;

    async fn new_instance(&self, settings: AppInstanceSettings) -> Result<Self::Instance>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    plugin_id: String,
    org_id: i64,
}

struct CachedInstance<I> {
    updated: DateTime<Utc>,
    instance: Arc<I>,
}

/// Cache of live app instances keyed by plugin and org
pub struct InstanceManager<F: InstanceFactory> {
    factory: F,
    instances: Mutex<HashMap<InstanceKey, CachedInstance<F::Instance>>>,
}

impl<F: InstanceFactory> InstanceManager<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Return the instance for `ctx`, building or rebuilding it as needed.
    ///
    /// A context without settings is served by an instance built from empty
    /// settings. The lock is held across instance creation so concurrent
    /// first calls for the same org build exactly one instance.
    pub async fn get(&self, ctx: &PluginContext) -> Result<Arc<F::Instance>> {
        let settings = ctx.app_instance_settings.clone().unwrap_or_default();

        let key = InstanceKey {
            plugin_id: ctx.plugin_id.clone(),
            org_id: ctx.org_id,
        };

        let mut instances = self.instances.lock().await;
        if let Some(cached) = instances.get(&key) {
            if cached.updated == settings.updated {
                return Ok(Arc::clone(&cached.instance));
            }
        }

        let instance = Arc::new(self.factory.new_instance(settings.clone()).await?);
        debug!(org_id = key.org_id, plugin_id = %key.plugin_id, "Created app instance");

        let previous = instances.insert(
            key.clone(),
            CachedInstance {
                updated: settings.updated,
                instance: Arc::clone(&instance),
            },
        );
        if let Some(previous) = previous {
            info!(
                org_id = key.org_id,
                updated = %settings.updated,
                "App settings changed, replacing instance"
            );
            previous.instance.dispose();
        }

        Ok(instance)
    }

    /// Number of cached instances
    pub async fn len(&self) -> usize {
        self.instances.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Dispose every cached instance and clear the cache
    pub async fn dispose_all(&self) {
        let drained: Vec<_> = self.instances.lock().await.drain().collect();
        for (key, cached) in drained {
            debug!(org_id = key.org_id, "Disposing app instance");
            cached.instance.dispose();
        }
    }
}
