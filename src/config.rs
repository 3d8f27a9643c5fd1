//! Runtime configuration.
//!
//! Read from `$XDG_CONFIG_HOME/sleuthxfer/config.toml` (or the platform
//! equivalent) when present. Every field has a default, so a missing file
//! or a partial one is fine.

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log external tool invocations before running them.
    pub verbose: bool,
    pub tools: Tools,
}

/// Program names (or paths) of the external forensic tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub icat: String,
    pub blkcat: String,
    pub blkls: String,
    pub ffind: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            icat: "icat".to_string(),
            blkcat: "blkcat".to_string(),
            blkls: "blkls".to_string(),
            ffind: "ffind".to_string(),
        }
    }
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sleuthxfer").join("config.toml"))
    }

    /// Load `path`, or the default location when `path` is `None`.
    /// An explicit path must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            TransferError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
            .map_err(|e| TransferError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
