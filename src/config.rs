use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::transfer_engine::TransferEngineType;

pub const DEFAULT_RPC_BIND: &str = "127.0.0.1:7171";
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    pub rsync_binary: String,
    pub transfer_engine: TransferEngineType,
    pub rpc_bind: SocketAddr,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            rsync_binary: "rsync".to_string(),
            transfer_engine: TransferEngineType::Rsync,
            rpc_bind: DEFAULT_RPC_BIND
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 7171))),
            verbose: false,
            json_logs: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("syncpilot"))
        .unwrap_or_else(|| PathBuf::from(".syncpilot"))
}

/// `$SYNCPILOT_CONFIG`, else `<config dir>/syncpilot/config.toml`.
pub fn config_file_path() -> PathBuf {
    if let Ok(path) = std::env::var("SYNCPILOT_CONFIG") {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .map(|d| d.join("syncpilot").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("syncpilot.toml"))
}

impl AppConfig {
    /// Defaults, then the TOML file, then `SYNCPILOT_*` env vars, then `overrides`
    /// (usually CLI flags with unset values skipped).
    pub fn new<T: Serialize>(overrides: Option<&T>) -> Result<Self> {
        Self::from_figment(Self::figment(overrides))
    }

    pub fn figment<T: Serialize>(overrides: Option<&T>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(config_file_path()))
            .merge(Env::prefixed("SYNCPILOT_").ignore(&["config"]));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }
        figment
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: AppConfig = figment.extract().context("Invalid configuration")?;
        config.max_concurrent_jobs = config.max_concurrent_jobs.max(1);
        Ok(config)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(crate::core::history::HISTORY_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(crate::settings::SETTINGS_FILE)
    }
}
