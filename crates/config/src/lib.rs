//! Configuration for the trestle bridge service.
//!
//! A TOML file provides the base configuration; environment variables
//! prefixed with `ZKEVM_BRIDGE_` (or `ZKEVM_AUTOCLAIM_`, for deployments
//! that only run the auto-claimer) override individual keys, with `.`
//! replaced by `_`: `ZKEVM_BRIDGE_SYNCHRONIZER_SYNC_CHUNK_SIZE=200`.

mod config;

pub use config::{
    BridgeControllerConfig, ClaimTxManagerConfig, Config, DatabaseConfig, GroupingClaimsConfig,
    LogConfig, NetworkConfig, ProofServiceConfig, SynchronizerConfig,
};

use anyhow::{Context, Result};
use std::path::Path;

const ENV_PREFIXES: [&str; 2] = ["ZKEVM_BRIDGE", "ZKEVM_AUTOCLAIM"];

/// Reads a config file and applies environment overrides.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "read config file from {}",
            path.as_ref().to_string_lossy()
        )
    })?;
    let mut config: Config = toml::from_str(&content).context("parse config file")?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Serializes the default configuration, for `generate-example-config`.
pub fn example() -> Result<String> {
    toml::to_string_pretty(&Config::default()).context("serialize example config")
}

fn apply_env_overrides(config: &mut Config) -> Result<()> {
    // Round-trip through a toml value so overrides address keys by path
    // without a field-by-field match.
    let mut value = toml::Value::try_from(&*config).context("config to toml value")?;
    let mut touched = false;
    for (key, env_value) in std::env::vars() {
        let Some(path) = ENV_PREFIXES
            .iter()
            .find_map(|prefix| key.strip_prefix(&format!("{prefix}_")))
        else {
            continue;
        };
        if override_path(&mut value, path, &env_value) {
            tracing::debug!(key = %key, "config override applied");
            touched = true;
        } else {
            tracing::warn!(key = %key, "config override does not match any key, ignored");
        }
    }
    if touched {
        *config = value.try_into().context("config after env overrides")?;
    }
    Ok(())
}

/// Walks `SECTION_SUB_KEY` segments case-insensitively into the toml tree.
/// Segment boundaries are ambiguous for multi-word keys, so the walk
/// greedily matches the longest existing key at each level.
fn override_path(value: &mut toml::Value, path: &str, raw: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    let table = match value.as_table_mut() {
        Some(t) => t,
        None => return false,
    };
    let mut candidates: Vec<String> = table.keys().cloned().collect();
    candidates.sort_by_key(|k| std::cmp::Reverse(k.len()));
    for key in candidates {
        let normalized = key.to_ascii_lowercase().replace('.', "_");
        if lower == normalized {
            let parsed = parse_env_value(raw, &table[&key]);
            table.insert(key, parsed);
            return true;
        }
        if let Some(rest) = lower.strip_prefix(&format!("{normalized}_")) {
            if let Some(child) = table.get_mut(&key) {
                if child.is_table() && override_path(child, rest, raw) {
                    return true;
                }
            }
        }
    }
    false
}

fn parse_env_value(raw: &str, current: &toml::Value) -> toml::Value {
    match current {
        toml::Value::Integer(_) => raw
            .parse::<i64>()
            .map(toml::Value::Integer)
            .unwrap_or_else(|_| toml::Value::String(raw.to_string())),
        toml::Value::Boolean(_) => raw
            .parse::<bool>()
            .map(toml::Value::Boolean)
            .unwrap_or_else(|_| toml::Value::String(raw.to_string())),
        toml::Value::Float(_) => raw
            .parse::<f64>()
            .map(toml::Value::Float)
            .unwrap_or_else(|_| toml::Value::String(raw.to_string())),
        toml::Value::Array(_) => toml::Value::Array(
            raw.split(',')
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.trim().to_string()))
                .collect(),
        ),
        _ => toml::Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_and_round_trip() {
        let rendered = example().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.synchronizer.sync_chunk_size, 100);
        assert_eq!(parsed.bridge_controller.height, 32);
    }

    #[test]
    fn env_override_hits_nested_key() {
        let mut value = toml::Value::try_from(Config::default()).unwrap();
        assert!(override_path(
            &mut value,
            "SYNCHRONIZER_SYNC_CHUNK_SIZE",
            "250"
        ));
        let config: Config = value.try_into().unwrap();
        assert_eq!(config.synchronizer.sync_chunk_size, 250);
    }

    #[test]
    fn env_override_rejects_unknown_key() {
        let mut value = toml::Value::try_from(Config::default()).unwrap();
        assert!(!override_path(&mut value, "NO_SUCH_SECTION_AT_ALL", "1"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, example().unwrap()).unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.log.level, "info");
    }
}
