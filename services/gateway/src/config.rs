//! Gateway configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/classlog/gateway.toml`.

use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub schema_version: u32,
    pub bind: String,
    pub merkle: MerkleConfig,
    pub run_mode: RunMode,
    pub traceback_dir: String,
    pub blacklist: BlacklistConfig,
}

#[derive(Debug, Clone)]
pub struct MerkleConfig {
    pub store: String,
    pub fs_root: Option<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Default)]
pub struct BlacklistConfig {
    pub deny: Vec<BlacklistRule>,
    pub deny_for_two_days: Vec<BlacklistRule>,
}

#[derive(Debug, Clone)]
pub struct BlacklistRule {
    pub field: String,
    pub patterns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    bind: Option<String>,
    merkle: Option<RawMerkleConfig>,
    run_mode: Option<String>,
    traceback_dir: Option<String>,
    blacklist: Option<RawBlacklistConfig>,
}

#[derive(Debug, Deserialize)]
struct RawMerkleConfig {
    store: Option<String>,
    fs_root: Option<String>,
    categories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawBlacklistConfig {
    deny: Option<Vec<RawBlacklistRule>>,
    deny_for_two_days: Option<Vec<RawBlacklistRule>>,
}

#[derive(Debug, Deserialize)]
struct RawBlacklistRule {
    field: String,
    patterns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/classlog/gateway.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw.schema_version.unwrap_or(1);
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    let bind = raw.bind.unwrap_or_else(|| "0.0.0.0:8090".to_owned());

    let merkle = match raw.merkle {
        Some(m) => MerkleConfig {
            store: m.store.unwrap_or_else(|| "inmemory".to_owned()),
            fs_root: m.fs_root,
            categories: m.categories.unwrap_or_else(default_categories),
        },
        None => MerkleConfig {
            store: "inmemory".to_owned(),
            fs_root: None,
            categories: default_categories(),
        },
    };
    if merkle.store == "fs" && merkle.fs_root.is_none() {
        return Err(ConfigError::MissingField("merkle.fs_root".to_owned()));
    }

    let run_mode = match raw.run_mode.as_deref() {
        None | Some("prod") => RunMode::Prod,
        Some("dev") => RunMode::Dev,
        Some(other) => {
            return Err(ConfigError::InvalidValue(format!(
                "run_mode must be 'dev' or 'prod', got '{}'",
                other
            )))
        }
    };

    let traceback_dir = raw
        .traceback_dir
        .unwrap_or_else(|| "/var/log/classlog/tracebacks".to_owned());

    let blacklist = match raw.blacklist {
        Some(b) => BlacklistConfig {
            deny: b.deny.unwrap_or_default().into_iter().map(into_rule).collect(),
            deny_for_two_days: b
                .deny_for_two_days
                .unwrap_or_default()
                .into_iter()
                .map(into_rule)
                .collect(),
        },
        None => BlacklistConfig::default(),
    };

    Ok(GatewayConfig {
        schema_version,
        bind,
        merkle,
        run_mode,
        traceback_dir,
        blacklist,
    })
}

fn into_rule(raw: RawBlacklistRule) -> BlacklistRule {
    BlacklistRule {
        field: raw.field,
        patterns: raw.patterns,
    }
}

fn default_categories() -> Vec<String> {
    classlog_merkle::categories::DEFAULT_CATEGORIES
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
