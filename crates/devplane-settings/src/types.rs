//! Settings structs with compiled defaults.

use devplane_core::rpc::RpcSubmitStrategy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object (`~/.devplane/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevplaneSettings {
    /// Per-device actor behavior.
    pub actor: ActorSettings,
    /// Reference SQLite store.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl DevplaneSettings {
    /// Reject combinations no actor can run with.
    pub fn validate(&self) -> Result<()> {
        self.actor.validate()
    }
}

/// Settings shared by every device actor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActorSettings {
    /// Session table capacity. Opening one more evicts the oldest.
    pub max_concurrent_sessions_per_device: usize,
    /// Sessions silent for longer than this are swept.
    pub session_inactivity_timeout_ms: u64,
    /// How often the inactivity sweep runs.
    pub session_sweep_interval_ms: u64,
    pub rpc_submit_strategy: RpcSubmitStrategy,
    /// System-wide cap on transport delivery retries.
    pub rpc_max_retries: u32,
    /// How long a delivered request may wait for the device's answer under
    /// response-gated submission.
    pub rpc_response_timeout_ms: u64,
    /// On retry exhaustion, drop every session instead of failing the request.
    pub close_sessions_on_rpc_delivery_timeout: bool,
    /// Checkpoint sessions to the shared snapshot cache.
    pub session_cache_enabled: bool,
    /// Route RPCs of edge-affiliated devices through their edge.
    pub edges_enabled: bool,
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_sessions_per_device: 1,
            session_inactivity_timeout_ms: 600_000,
            session_sweep_interval_ms: 60_000,
            rpc_submit_strategy: RpcSubmitStrategy::Burst,
            rpc_max_retries: 5,
            rpc_response_timeout_ms: 30_000,
            close_sessions_on_rpc_delivery_timeout: false,
            session_cache_enabled: false,
            edges_enabled: true,
        }
    }
}

impl ActorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions_per_device == 0 {
            return Err(SettingsError::InvalidValue(
                "maxConcurrentSessionsPerDevice must be >= 1".into(),
            ));
        }
        if self.session_sweep_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "sessionSweepIntervalMs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Location of the reference SQLite database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Database path, relative paths resolve under `~/.devplane`.
    pub db_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "database/devplane.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter (`trace`..`error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}
