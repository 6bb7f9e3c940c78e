//! Shared configuration for the hwlink binary.
//!
//! One flat TOML file, layered under `HWLINK_*` environment variables,
//! and translated to [`hwlink_core::ManagerConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use hwlink_core::{DerivationPath, ManagerConfig};

/// Prefix for environment overrides, e.g. `HWLINK_POLL_INTERVAL_MS`.
pub const ENV_PREFIX: &str = "HWLINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config ─────────────────────────────────────────────────────

/// Log line format on stderr.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Keepalive period in milliseconds. `0` disables polling.
    pub poll_interval_ms: u64,

    /// How long a lost transport may come back before `disconnected` fires.
    pub debounce_ms: u64,

    /// BIP-32 path used for address and signing requests.
    pub derivation_path: String,

    /// Seed for the simulated device (`--simulate`).
    pub sim_seed: u64,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: duration_ms(hwlink_core::DEFAULT_POLL_INTERVAL),
            debounce_ms: duration_ms(hwlink_core::DEFAULT_DISCONNECT_DEBOUNCE),
            derivation_path: DerivationPath::stacks_default().to_string(),
            sim_seed: 0,
            log_format: LogFormat::Text,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Validate and convert to the manager's runtime configuration.
    pub fn to_manager_config(&self) -> Result<ManagerConfig, ConfigError> {
        let derivation_path: DerivationPath =
            self.derivation_path
                .parse()
                .map_err(|e| ConfigError::Validation {
                    field: "derivation_path".into(),
                    reason: format!("{e}"),
                })?;

        if self.debounce_ms == 0 {
            return Err(ConfigError::Validation {
                field: "debounce_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }

        Ok(ManagerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            disconnect_debounce: Duration::from_millis(self.debounce_ms),
            derivation_path,
        })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "hwlink", "hwlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("hwlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the Config from `path` + environment. A missing file is not an
/// error; defaults and environment still apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Write a default config file, refusing to clobber an existing one
/// unless `force` is set.
pub fn init_config(path: &Path, force: bool) -> Result<Config, ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    let cfg = Config::default();
    save_config_to(path, &cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_manager_defaults() {
        let mgr = Config::default().to_manager_config().expect("valid defaults");
        assert_eq!(mgr, ManagerConfig::default());
    }

    #[test]
    fn bad_derivation_path_is_a_validation_error() {
        let cfg = Config {
            derivation_path: "m/44'/x".into(),
            ..Config::default()
        };
        let err = cfg.to_manager_config().expect_err("invalid path");
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "derivation_path"));
    }

    #[test]
    fn zero_debounce_is_rejected() {
        let cfg = Config {
            debounce_ms: 0,
            ..Config::default()
        };
        assert!(cfg.to_manager_config().is_err());
    }

    #[test]
    fn zero_poll_interval_disables_polling() {
        let cfg = Config {
            poll_interval_ms: 0,
            ..Config::default()
        };
        let mgr = cfg.to_manager_config().expect("valid");
        assert!(!mgr.polling_enabled());
    }
}
