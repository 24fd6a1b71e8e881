//! Bridge configuration.
//!
//! Defaults are embedded from `config/default.toml`. A user file only needs
//! the keys it wants to change.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::connection::ProcessConnector;
use crate::error::{BridgeError, Result};
use crate::transport::{MAX_FROM_HOST, MAX_TO_HOST};

/// Env var pointing at a config file.
pub const CONFIG_ENV: &str = "KEEPASS_BRIDGE_CONFIG";
/// Env var overriding `host.program`.
pub const HOST_ENV: &str = "KEEPASS_BRIDGE_HOST";

const DEFAULT_TOML: &str = include_str!("../config/default.toml");

static DEFAULTS: Lazy<toml::Table> = Lazy::new(|| {
    DEFAULT_TOML
        .parse()
        .expect("embedded config/default.toml must parse")
});

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    pub host: HostConfig,
    pub limits: Limits,
    pub log: LogConfig,
}

/// The native host program to spawn.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Frame size caps, in bytes of JSON payload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    pub max_outgoing_bytes: usize,
    pub max_incoming_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_outgoing_bytes: MAX_TO_HOST,
            max_incoming_bytes: MAX_FROM_HOST,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_toml("").expect("embedded config/default.toml must deserialize")
    }
}

/// Overlay `over` onto `base`, recursing into tables.
fn merge(base: &mut toml::Table, over: toml::Table) {
    for (key, value) in over {
        match value {
            toml::Value::Table(o) if matches!(base.get(&key), Some(toml::Value::Table(_))) => {
                if let Some(toml::Value::Table(b)) = base.get_mut(&key) {
                    merge(b, o);
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

impl BridgeConfig {
    /// Parse a TOML document; missing keys fall back to defaults.
    pub fn from_toml(s: &str) -> Result<Self> {
        let user: toml::Table = s.parse()?;
        let mut table = DEFAULTS.clone();
        merge(&mut table, user);
        let cfg: BridgeConfig = toml::Value::Table(table).try_into()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    /// Defaults, then the file named by `KEEPASS_BRIDGE_CONFIG`, then
    /// `KEEPASS_BRIDGE_HOST`.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        if let Some(program) = std::env::var_os(HOST_ENV).filter(|p| !p.is_empty()) {
            cfg.host.program = Some(PathBuf::from(program));
        }
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.limits.max_outgoing_bytes == 0 || self.limits.max_incoming_bytes == 0 {
            return Err(BridgeError::Config("frame limits must be non-zero".into()));
        }
        if self.limits.max_outgoing_bytes > u32::MAX as usize
            || self.limits.max_incoming_bytes > u32::MAX as usize
        {
            return Err(BridgeError::Config(
                "frame limits must fit the 32-bit length prefix".into(),
            ));
        }
        Ok(())
    }

    /// Connector for the configured host program.
    pub fn connector(&self) -> Result<ProcessConnector> {
        let program = self
            .host
            .program
            .as_ref()
            .ok_or_else(|| BridgeError::Config("host.program is not set".into()))?;
        Ok(ProcessConnector::new(program).args(&self.host.args))
    }
}
