//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewayConfig::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `PULSE_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use pulse_server::config::GatewayConfig;

/// Settings loading error.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Reading the settings file failed.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file or merged document was not valid.
    #[error("invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Resolve the path to the settings file (`~/.pulse/gateway.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("gateway.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; an unreadable or invalid file is an
/// error.
pub fn load_config(path: &Path) -> Result<GatewayConfig, SettingsError> {
    let defaults = serde_json::to_value(GatewayConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut config: GatewayConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
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

/// Apply `PULSE_*` overrides through the given variable lookup.
///
/// Strict parsing rules: integers must be valid and in range; invalid
/// values are silently ignored (fall back to file/default).
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = read_string(&lookup, "PULSE_HOST") {
        config.host = v;
    }
    if let Some(v) = read_u64(&lookup, "PULSE_PORT", 0, 65_535) {
        config.port = u16::try_from(v).unwrap_or(config.port);
    }
    if let Some(v) = read_u64(&lookup, "PULSE_MAX_CONNECTIONS", 1, 1_000_000) {
        config.max_connections = usize::try_from(v).unwrap_or(config.max_connections);
    }
    if let Some(v) = read_u64(&lookup, "PULSE_PONG_WAIT_MS", 10, 600_000) {
        config.pong_wait_ms = v;
    }
    if let Some(v) = read_u64(&lookup, "PULSE_MAX_FRAME_SIZE", 64, 16 * 1024 * 1024) {
        config.max_frame_size = usize::try_from(v).unwrap_or(config.max_frame_size);
    }
    if let Some(v) = read_u64(&lookup, "PULSE_EGRESS_CAPACITY", 1, 65_536) {
        config.egress_capacity = usize::try_from(v).unwrap_or(config.egress_capacity);
    }
}

fn read_string<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.is_empty())
}

fn read_u64<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    min: u64,
    max: u64,
) -> Option<u64> {
    lookup(key)?
        .parse::<u64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}
