//! Engine configuration.
//!
//! A single optional TOML file. A missing file is not an error: every knob
//! has a normative default, and partial files override only what they name.
//! `MITPLANE_CONFIG` points `load_default` somewhere other than the working
//! directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use mitplane_core::RetryLimits;

const DEFAULT_CONFIG_PATH: &str = "mitplane.toml";
const CONFIG_ENV: &str = "MITPLANE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config at {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: RetryLimits,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `$MITPLANE_CONFIG`, falling back to `mitplane.toml` in the
    /// working directory.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load(&path)
    }
}
