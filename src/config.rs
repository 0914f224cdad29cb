//! Application configuration.
//!
//! Defaults come from each crate's own config type. A YAML file overlays them, then
//! `PAGESYNC__SECTION__KEY` environment variables overlay the result. Every overlay is a
//! dotted path plus a JSON value; a path that does not name a known setting is rejected.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use pagesync_change_detector::DetectorConfig;
use pagesync_core_types::SyncError;
use pagesync_extensions_bridge::BridgeTimeouts;
use pagesync_redirect_tracker::config::RedirectConfig;
use pagesync_state_center::ReconcilerConfig;

pub const ENV_PREFIX: &str = "PAGESYNC__";

const SECTIONS: &[&str] = &["detector", "redirect", "reconciler", "bridge", "engine"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("unsupported config path: {0}")]
    UnsupportedPath(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for SyncError {
    fn from(value: ConfigError) -> Self {
        SyncError::new(value.to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Durable JSON copy of every page record. Unset keeps records in memory only.
    pub records_path: Option<PathBuf>,
    /// How often the janitor writes buffered record changes to the durable copy.
    pub flush_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            records_path: None,
            flush_interval_ms: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub redirect: RedirectConfig,
    pub reconciler: ReconcilerConfig,
    pub bridge: BridgeTimeouts,
    pub engine: EngineConfig,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigSource {
    File,
    Env,
}

#[derive(Debug, Default)]
pub struct LoadOptions {
    pub paths: Vec<PathBuf>,
    pub include_env: bool,
}

impl LoadOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![path.into()],
            include_env: true,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut options = LoadOptions {
        include_env: true,
        ..LoadOptions::default()
    };
    if let Some(path) = path {
        options.paths.push(path.to_path_buf());
    }
    load_config_with_options(&options)
}

pub fn load_config_with_options(options: &LoadOptions) -> Result<AppConfig, ConfigError> {
    let mut tree = serde_json::to_value(AppConfig::default())
        .map_err(|err| ConfigError::Invalid(err.to_string()))?;
    let mut applied = Vec::new();

    for path in &options.paths {
        if path.exists() {
            applied.extend(apply_overlays(&mut tree, overlays_from_file(path)?)?);
        }
    }
    if options.include_env {
        applied.extend(apply_overlays(&mut tree, overlays_from_env())?);
    }

    let config: AppConfig =
        serde_json::from_value(tree).map_err(|err| ConfigError::InvalidValue(err.to_string()))?;

    // serde(default) silently drops unknown keys; check each overlay landed somewhere.
    let resolved =
        serde_json::to_value(&config).map_err(|err| ConfigError::Invalid(err.to_string()))?;
    for path in applied {
        if resolved.pointer(&format!("/{}", path.replace('.', "/"))).is_none() {
            return Err(ConfigError::UnsupportedPath(path));
        }
    }
    Ok(config)
}

struct ConfigOverlay {
    path: String,
    value: Value,
    source: ConfigSource,
}

fn apply_overlays(tree: &mut Value, overlays: Vec<ConfigOverlay>) -> Result<Vec<String>, ConfigError> {
    let mut applied = Vec::with_capacity(overlays.len());
    for overlay in overlays {
        set_path(tree, &overlay.path, overlay.value)?;
        debug!(path = %overlay.path, source = ?overlay.source, "config override applied");
        applied.push(overlay.path);
    }
    Ok(applied)
}

fn set_path(tree: &mut Value, path: &str, value: Value) -> Result<(), ConfigError> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(ConfigError::UnsupportedPath(path.to_string()));
    };
    if parents.is_empty() || !SECTIONS.contains(&parents[0]) {
        return Err(ConfigError::UnsupportedPath(path.to_string()));
    }

    let mut cursor = tree;
    for segment in parents {
        let Value::Object(map) = cursor else {
            return Err(ConfigError::UnsupportedPath(path.to_string()));
        };
        cursor = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let Value::Object(map) = cursor else {
        return Err(ConfigError::UnsupportedPath(path.to_string()));
    };
    map.insert(last.to_string(), value);
    Ok(())
}

fn overlays_from_file(path: &Path) -> Result<Vec<ConfigOverlay>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|err| ConfigError::Io(format!("{}", err)))?;
    let yaml_value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|err| ConfigError::Invalid(format!("{}", err)))?;
    let json_value =
        serde_json::to_value(yaml_value).map_err(|err| ConfigError::Invalid(format!("{}", err)))?;
    Ok(flatten_value(json_value, None, ConfigSource::File))
}

fn overlays_from_env() -> Vec<ConfigOverlay> {
    let mut overlays = Vec::new();
    for (key, raw) in env::vars() {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(".");
        if path.is_empty() {
            continue;
        }
        overlays.push(ConfigOverlay {
            path,
            value: parse_env_value(&raw),
            source: ConfigSource::Env,
        });
    }
    overlays
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    if let Ok(boolean) = raw.parse::<bool>() {
        return Value::Bool(boolean);
    }
    if let Ok(int_val) = raw.parse::<i64>() {
        return Value::Number(int_val.into());
    }
    Value::String(raw.to_string())
}

fn flatten_value(value: Value, prefix: Option<String>, source: ConfigSource) -> Vec<ConfigOverlay> {
    match value {
        Value::Object(map) => {
            let mut result = Vec::new();
            for (key, value) in map {
                let key_segment = key.trim().to_ascii_lowercase();
                let next_prefix = match &prefix {
                    Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, key_segment),
                    _ => key_segment,
                };
                result.extend(flatten_value(value, Some(next_prefix), source));
            }
            result
        }
        other => match prefix {
            Some(path) => vec![ConfigOverlay {
                path,
                value: other,
                source,
            }],
            None => Vec::new(),
        },
    }
}
