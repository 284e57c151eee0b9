//! Logging bootstrap.
//!
//! Every crate logs through `tracing` with structured fields (`device_id`,
//! `session_id`, `request_id`, `rpc_id`). [`init_telemetry`] installs the
//! global subscriber once at process start.

#![deny(unsafe_code)]

use devplane_settings::LoggingSettings;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "devplane_actor" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout instead of the human-readable format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
        }
    }
}

impl TelemetryConfig {
    /// Build from the `logging` section of the settings file. Unknown level
    /// names fall back to `info`.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            log_level: settings.level.parse().unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            json: settings.json,
        }
    }

    /// Add a per-module override.
    #[must_use]
    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }

    /// `EnvFilter` directive string for this config.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Subscriber installation failure.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("global subscriber already set: {0}")]
    AlreadyInitialized(String),
}

/// Initialize the telemetry subsystem. Call once at startup.
///
/// A host binary wires it from the loaded settings before starting any
/// device actors:
///
/// ```no_run
/// use devplane_telemetry::{init_telemetry, TelemetryConfig};
/// use tracing::Level;
///
/// let settings = devplane_settings::get_settings();
/// let config = TelemetryConfig::from_settings(&settings.logging)
///     .with_module_level("devplane_actor", Level::DEBUG);
/// init_telemetry(&config).expect("telemetry already initialized");
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}
