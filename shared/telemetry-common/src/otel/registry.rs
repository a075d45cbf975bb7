//! Explicit registry for the plugin's trace and meter providers.
//!
//! The registry holds the custom providers built at startup and resolves them
//! for consumers. When a slot is empty (never set, or set to `None` because the
//! pipeline failed to build) resolution deterministically falls back to the
//! ambient providers of the OpenTelemetry runtime, which are no-ops unless
//! something installed real ones globally.
//!
//! The registry is constructed once and passed to consumers; it is not a
//! process global. Consumers that must not observe the pre-startup state can
//! await [`ProviderRegistry::installed`].

use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::{TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry::Context;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{SdkTracerProvider, Tracer as SdkTracer};
use parking_lot::RwLock;
use std::borrow::Cow;
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Resolved trace capability: the custom provider or the ambient fallback.
#[derive(Clone)]
pub enum TracerSource {
    /// Provider built by this plugin's pipeline
    Custom(SdkTracerProvider),
    /// Whatever the OpenTelemetry runtime exposes globally
    Ambient,
}

impl TracerSource {
    /// Create a named tracer from the resolved provider
    pub fn tracer(&self, name: &'static str) -> PluginTracer {
        match self {
            TracerSource::Custom(provider) => PluginTracer::Custom(provider.tracer(name)),
            TracerSource::Ambient => PluginTracer::Ambient(global::tracer(name)),
        }
    }

    /// Whether this resolves to the custom provider
    pub fn is_custom(&self) -> bool {
        matches!(self, TracerSource::Custom(_))
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        if self.is_custom() {
            "custom"
        } else {
            "ambient"
        }
    }
}

impl fmt::Debug for TracerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TracerSource::{}", self.kind())
    }
}

/// Resolved metrics capability: the custom provider or the ambient fallback.
#[derive(Clone)]
pub enum MeterSource {
    /// Provider built by this plugin's pipeline
    Custom(SdkMeterProvider),
    /// Whatever the OpenTelemetry runtime exposes globally
    Ambient,
}

impl MeterSource {
    /// Create a named meter from the resolved provider
    pub fn meter(&self, name: &'static str) -> Meter {
        match self {
            MeterSource::Custom(provider) => provider.meter(name),
            MeterSource::Ambient => global::meter(name),
        }
    }

    /// Whether this resolves to the custom provider
    pub fn is_custom(&self) -> bool {
        matches!(self, MeterSource::Custom(_))
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        if self.is_custom() {
            "custom"
        } else {
            "ambient"
        }
    }
}

impl fmt::Debug for MeterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeterSource::{}", self.kind())
    }
}

/// A tracer taken from either the custom or the ambient provider.
pub enum PluginTracer {
    /// Tracer from the custom SDK provider
    Custom(SdkTracer),
    /// Tracer from the global provider
    Ambient(BoxedTracer),
}

impl PluginTracer {
    /// Start a span as a child of `parent` and return a context carrying it.
    ///
    /// The caller ends the span through `cx.span().end()`.
    pub fn start_span<T>(&self, name: T, parent: &Context) -> Context
    where
        T: Into<Cow<'static, str>>,
    {
        match self {
            PluginTracer::Custom(tracer) => parent.with_span(tracer.start_with_context(name, parent)),
            PluginTracer::Ambient(tracer) => {
                parent.with_span(tracer.start_with_context(name, parent))
            }
        }
    }

    /// Whether spans go to the custom provider
    pub fn is_custom(&self) -> bool {
        matches!(self, PluginTracer::Custom(_))
    }
}

impl fmt::Debug for PluginTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_custom() { "custom" } else { "ambient" };
        write!(f, "PluginTracer::{}", kind)
    }
}

#[derive(Default)]
struct ProviderSlots {
    tracer: Option<SdkTracerProvider>,
    meter: Option<SdkMeterProvider>,
}

/// Holder for the plugin's telemetry providers.
///
/// Many concurrent readers, one writer (the startup path). Each slot access is
/// serialised by a single reader/writer lock; `set` replaces both slots in one
/// critical section.
pub struct ProviderRegistry {
    slots: RwLock<ProviderSlots>,
    /// One-shot gate, flipped to `true` by the first `set`
    installed: watch::Sender<bool>,
}

impl ProviderRegistry {
    /// Create an empty registry; every lookup resolves to the ambient providers
    pub fn new() -> Self {
        let (installed, _) = watch::channel(false);
        Self {
            slots: RwLock::new(ProviderSlots::default()),
            installed,
        }
    }

    /// Replace both provider slots.
    ///
    /// Pass `None` to force the ambient fallback, e.g. after the pipeline
    /// failed to build, so no stale provider survives. A later call
    /// overwrites an earlier one. Opens the installed gate.
    pub fn set(&self, tracer: Option<SdkTracerProvider>, meter: Option<SdkMeterProvider>) {
        let has_tracer = tracer.is_some();
        let has_meter = meter.is_some();

        {
            let mut slots = self.slots.write();
            slots.tracer = tracer;
            slots.meter = meter;
        }

        debug!(
            custom_tracer = has_tracer,
            custom_meter = has_meter,
            "Telemetry providers stored"
        );
        self.installed.send_replace(true);
    }

    /// Resolve the tracer provider: custom if installed, ambient otherwise.
    pub fn tracer_provider(&self) -> TracerSource {
        let slots = self.slots.read();
        debug!(
            has_custom_provider = slots.tracer.is_some(),
            "Resolving tracer provider"
        );

        match &slots.tracer {
            Some(provider) => TracerSource::Custom(provider.clone()),
            None => {
                warn!("Using fallback tracer provider");
                TracerSource::Ambient
            }
        }
    }

    /// Resolve the meter provider: custom if installed, ambient otherwise.
    pub fn meter_provider(&self) -> MeterSource {
        let slots = self.slots.read();
        match &slots.meter {
            Some(provider) => MeterSource::Custom(provider.clone()),
            None => MeterSource::Ambient,
        }
    }

    /// Whether `set` has been called at least once
    pub fn is_installed(&self) -> bool {
        *self.installed.borrow()
    }

    /// Wait until `set` has been called at least once.
    ///
    /// Returns immediately if it already has.
    pub async fn installed(&self) {
        let mut rx = self.installed.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|installed| *installed).await;
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn custom_providers() -> (SdkTracerProvider, SdkMeterProvider) {
        (
            SdkTracerProvider::builder().build(),
            SdkMeterProvider::builder().build(),
        )
    }

    #[test]
    fn test_empty_registry_resolves_ambient() {
        let registry = ProviderRegistry::new();

        assert!(!registry.is_installed());
        assert!(!registry.tracer_provider().is_custom());
        assert!(!registry.meter_provider().is_custom());
        assert!(!registry.tracer_provider().tracer("test").is_custom());
    }

    #[test]
    fn test_set_returns_exactly_the_custom_providers() {
        let registry = ProviderRegistry::new();
        let (tracer_provider, meter_provider) = custom_providers();

        registry.set(Some(tracer_provider.clone()), Some(meter_provider.clone()));
        assert!(registry.is_installed());

        let TracerSource::Custom(resolved_tracer) = registry.tracer_provider() else {
            panic!("expected custom tracer provider");
        };
        let MeterSource::Custom(resolved_meter) = registry.meter_provider() else {
            panic!("expected custom meter provider");
        };

        // Shutting down the resolved handles shuts down the originals: same instances
        assert!(resolved_tracer.shutdown().is_ok());
        assert!(tracer_provider.shutdown().is_err());
        assert!(resolved_meter.shutdown().is_ok());
        assert!(meter_provider.shutdown().is_err());
    }

    #[test]
    fn test_set_none_discards_stale_providers() {
        let registry = ProviderRegistry::new();
        let (tracer_provider, meter_provider) = custom_providers();

        registry.set(Some(tracer_provider), Some(meter_provider));
        assert!(registry.tracer_provider().is_custom());

        registry.set(None, None);
        assert!(registry.is_installed());
        assert!(!registry.tracer_provider().is_custom());
        assert!(!registry.meter_provider().is_custom());
        assert!(!registry.tracer_provider().tracer("test").is_custom());
    }

    #[test]
    fn test_meter_resolution_records_on_both_variants() {
        let registry = ProviderRegistry::new();
        let ambient = registry.meter_provider().meter("test");
        ambient.u64_counter("ambient.counter").build().add(1, &[]);

        let (_, meter_provider) = custom_providers();
        registry.set(None, Some(meter_provider));
        let custom = registry.meter_provider().meter("test");
        custom.u64_counter("custom.counter").build().add(1, &[]);

        assert!(registry.meter_provider().is_custom());
        assert!(!registry.tracer_provider().is_custom());
    }

    #[test]
    fn test_concurrent_readers_during_set() {
        let registry = Arc::new(ProviderRegistry::new());
        let mut readers = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            readers.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    let tracer = registry.tracer_provider().tracer("reader");
                    let cx = tracer.start_span("read", &Context::new());
                    cx.span().end();
                    let _meter = registry.meter_provider().meter("reader");
                }
            }));
        }

        for i in 0..200 {
            if i % 2 == 0 {
                let (tracer_provider, meter_provider) = custom_providers();
                registry.set(Some(tracer_provider), Some(meter_provider));
            } else {
                registry.set(None, None);
            }
        }

        for reader in readers {
            reader.join().expect("reader thread must not panic");
        }

        let (tracer_provider, meter_provider) = custom_providers();
        registry.set(Some(tracer_provider), Some(meter_provider));
        assert!(registry.tracer_provider().is_custom());
        assert!(registry.meter_provider().is_custom());
    }

    #[tokio::test]
    async fn test_installed_gate_releases_waiters() {
        let registry = Arc::new(ProviderRegistry::new());

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry.installed().await;
                registry.tracer_provider().is_custom()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let (tracer_provider, meter_provider) = custom_providers();
        registry.set(Some(tracer_provider), Some(meter_provider));

        let saw_custom = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .expect("waiter task");
        assert!(saw_custom);

        // Already installed: returns immediately
        registry.installed().await;
    }
}
