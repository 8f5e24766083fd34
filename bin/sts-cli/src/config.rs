//! JSON configuration file loaded at startup.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use sts_chain::ChainConfig;
use sts_scanner::ScanWindow;
use sts_types::Network;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub network: Network,
    pub chain: ChainConfig,
    pub store_path: PathBuf,
    pub abi_dir: PathBuf,
    #[serde(default)]
    pub scan_window: ScanWindow,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }
}
