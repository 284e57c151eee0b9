//! # devplane-settings
//!
//! Layered configuration for the device control plane.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`DevplaneSettings::default()`]
//! 2. **User file**: `~/.devplane/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `DEVPLANE_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use devplane_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("sessions per device: {}", settings.actor.max_concurrent_sessions_per_device);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, resolve_db_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<DevplaneSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.devplane/settings.json` with env var
/// overrides. If loading fails, logs the error and returns compiled defaults.
pub fn get_settings() -> &'static DevplaneSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            DevplaneSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: DevplaneSettings) -> std::result::Result<(), DevplaneSettings> {
    SETTINGS.set(settings)
}
