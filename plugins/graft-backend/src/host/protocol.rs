//! Records exchanged with the dashboard host.
//!
//! These mirror the host's plugin protocol: a plugin context identifying the
//! org and app instance, resource calls, and health checks. On the wire they
//! are camelCase JSON; binary bodies travel as base64 and the instance's
//! `jsonData` is embedded as raw JSON and kept byte-for-byte.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identity of the caller and the app instance a request targets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginContext {
    #[serde(default)]
    pub org_id: i64,
    #[serde(default)]
    pub plugin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_instance_settings: Option<AppInstanceSettings>,
}

impl PluginContext {
    /// Context for `plugin_id` in `org_id` carrying the given settings
    pub fn new(plugin_id: impl Into<String>, org_id: i64, settings: AppInstanceSettings) -> Self {
        Self {
            org_id,
            plugin_id: plugin_id.into(),
            user: None,
            app_instance_settings: Some(settings),
        }
    }
}

/// The signed-in user that triggered the request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
}

/// Per-org configuration of the app, as saved through the plugin's config page
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInstanceSettings {
    /// Raw JSON configuration, returned verbatim by `/settings`
    #[serde(default, with = "raw_json")]
    pub json_data: Bytes,
    #[serde(default)]
    pub decrypted_secure_json_data: HashMap<String, String>,
    /// Last time the settings were saved; a change triggers a new app instance
    #[serde(default)]
    pub updated: DateTime<Utc>,
}

impl AppInstanceSettings {
    pub fn new(json_data: impl Into<Bytes>, updated: DateTime<Utc>) -> Self {
        Self {
            json_data: json_data.into(),
            decrypted_secure_json_data: HashMap::new(),
            updated,
        }
    }
}

// Secure values must never reach the logs
impl fmt::Debug for AppInstanceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut secure_keys: Vec<&String> = self.decrypted_secure_json_data.keys().collect();
        secure_keys.sort();
        f.debug_struct("AppInstanceSettings")
            .field("json_data", &String::from_utf8_lossy(&self.json_data))
            .field("decrypted_secure_json_data", &secure_keys)
            .field("updated", &self.updated)
            .finish()
    }
}

/// A resource call forwarded by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResourceRequest {
    #[serde(default)]
    pub plugin_context: PluginContext,
    /// Resource path relative to the plugin, e.g. `settings`
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub method: String,
    /// Path plus query string, e.g. `settings?refresh=true`
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default, with = "base64_body")]
    pub body: Bytes,
}

impl CallResourceRequest {
    /// Request for `method path` with an empty body
    pub fn new(plugin_context: PluginContext, method: &str, path: &str) -> Self {
        let path = path.trim_start_matches('/').to_string();
        Self {
            plugin_context,
            url: path.clone(),
            path,
            method: method.to_string(),
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// The plugin's answer to a resource call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResourceResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default, with = "base64_body")]
    pub body: Bytes,
}

impl CallResourceResponse {
    /// First value of header `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A health check issued by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckHealthRequest {
    #[serde(default)]
    pub plugin_context: PluginContext,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Ok,
    Error,
}

/// Result of a health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckHealthResult {
    pub status: HealthStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_details: Option<serde_json::Value>,
}

impl CheckHealthResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Ok,
            message: message.into(),
            json_details: None,
        }
    }
}

/// Embeds raw JSON bytes as a JSON value without re-encoding them.
///
/// Empty bytes travel as `null` and come back empty.
mod raw_json {
    use bytes::Bytes;
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::value::RawValue;

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        if bytes.is_empty() {
            return serializer.serialize_unit();
        }
        let text = std::str::from_utf8(bytes).map_err(S::Error::custom)?;
        let raw = RawValue::from_string(text.to_owned()).map_err(S::Error::custom)?;
        raw.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer).map_err(D::Error::custom)?;
        if raw.get() == "null" {
            return Ok(Bytes::new());
        }
        Ok(Bytes::from(raw.get().to_owned()))
    }
}

/// Base64 (standard alphabet) encoding for binary bodies
mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
