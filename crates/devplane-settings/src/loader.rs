//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`DevplaneSettings::default()`]
//! 2. If `~/.devplane/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `DEVPLANE_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use devplane_core::rpc::RpcSubmitStrategy;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::DevplaneSettings;

/// Base directory for devplane state (`~/.devplane`).
pub fn devplane_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".devplane")
}

/// Resolve the path to the settings file (`~/.devplane/settings.json`).
pub fn settings_path() -> PathBuf {
    devplane_home().join("settings.json")
}

/// Absolute database path. Relative `dbPath` values resolve under `~/.devplane`.
pub fn resolve_db_path(settings: &DevplaneSettings) -> PathBuf {
    let raw = Path::new(&settings.store.db_path);
    if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        devplane_home().join(raw)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DevplaneSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<DevplaneSettings> {
    let defaults = serde_json::to_value(DevplaneSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: DevplaneSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `DEVPLANE_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut DevplaneSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are logged and ignored (fall back to file/default)
pub fn apply_overrides_from<F>(settings: &mut DevplaneSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Actor settings ──────────────────────────────────────────────
    let actor = &mut settings.actor;
    if let Some(v) = env.usize("DEVPLANE_MAX_SESSIONS_PER_DEVICE", 1, 10_000) {
        actor.max_concurrent_sessions_per_device = v;
    }
    if let Some(v) = env.u64("DEVPLANE_SESSION_TIMEOUT_MS", 1_000, 86_400_000) {
        actor.session_inactivity_timeout_ms = v;
    }
    if let Some(v) = env.u64("DEVPLANE_SWEEP_INTERVAL_MS", 100, 86_400_000) {
        actor.session_sweep_interval_ms = v;
    }
    if let Some(v) = env.strategy("DEVPLANE_RPC_STRATEGY") {
        actor.rpc_submit_strategy = v;
    }
    if let Some(v) = env.u64("DEVPLANE_RPC_MAX_RETRIES", 0, 1_000) {
        actor.rpc_max_retries = v as u32;
    }
    if let Some(v) = env.u64("DEVPLANE_RPC_RESPONSE_TIMEOUT_MS", 100, 86_400_000) {
        actor.rpc_response_timeout_ms = v;
    }
    if let Some(v) = env.bool("DEVPLANE_CLOSE_ON_RPC_TIMEOUT") {
        actor.close_sessions_on_rpc_delivery_timeout = v;
    }
    if let Some(v) = env.bool("DEVPLANE_SESSION_CACHE") {
        actor.session_cache_enabled = v;
    }
    if let Some(v) = env.bool("DEVPLANE_EDGES_ENABLED") {
        actor.edges_enabled = v;
    }

    // ── Store & logging ─────────────────────────────────────────────
    if let Some(v) = env.string("DEVPLANE_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = env.string("DEVPLANE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }

    fn strategy(&self, name: &str) -> Option<RpcSubmitStrategy> {
        let val = (self.lookup)(name)?;
        match val.parse() {
            Ok(strategy) => Some(strategy),
            Err(e) => {
                tracing::warn!(key = name, value = %val, error = %e, "invalid strategy env var, ignoring");
                None
            }
        }
    }
}
