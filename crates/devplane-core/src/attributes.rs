use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribute namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeScope {
    /// Reported by the device itself.
    Client,
    /// Set by the server and visible to the device.
    Shared,
    /// Server-only, never sent to the device.
    Server,
}

impl AttributeScope {
    /// Only shared attributes are pushed to subscribed sessions.
    pub fn notifies_device(self) -> bool {
        matches!(self, Self::Shared)
    }
}

/// A single attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeKv {
    pub key: String,
    pub value: Value,
    pub last_update_ts: i64,
}

impl AttributeKv {
    pub fn new(key: impl Into<String>, value: Value, last_update_ts: i64) -> Self {
        Self {
            key: key.into(),
            value,
            last_update_ts,
        }
    }
}
