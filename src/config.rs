//! Engine configuration.
//!
//! The config file is JSON with the same PascalCase keys the fleet already
//! deploys, eg:
//!
//! ```json
//! {
//!     "DeployUrl": "https://deploy.example.com/files",
//!     "BinDir": {
//!         "Remote": { "Path": "bin/stable" },
//!         "LocalPath": "/opt/app/bin",
//!         "LocalPathNext": "/opt/app/bin_next"
//!     },
//!     "CheckIntervalSeconds": 300
//! }
//! ```

use crate::error::{UpdateError, UpdateResult};
use crate::syncdir::SyncDir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL prefix every remote path is resolved against
    #[serde(rename = "DeployUrl")]
    pub deploy_url: String,

    /// Optional proxy applied to all fetches
    #[serde(rename = "HttpProxy", default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,

    /// Binary tree to synchronize
    #[serde(rename = "BinDir", default, skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<SyncDir>,

    /// Configuration tree to synchronize
    #[serde(rename = "ConfDir", default, skip_serializing_if = "Option::is_none")]
    pub conf_dir: Option<SyncDir>,

    /// Log sink; stderr when unset
    #[serde(rename = "LogFile", default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Poll interval between ticks
    #[serde(rename = "CheckIntervalSeconds", default = "default_check_interval")]
    pub check_interval_seconds: u64,

    /// How long the before-sync fence waits for services to stop
    #[serde(
        rename = "ServiceStopWaitSeconds",
        default = "default_service_stop_wait"
    )]
    pub service_stop_wait_seconds: u64,
}

fn default_check_interval() -> u64 {
    60 * 5
}

fn default_service_stop_wait() -> u64 {
    30
}

impl Config {
    /// Load config from a JSON file. Failures here are fatal: the engine
    /// refuses to run on a config it cannot read or parse.
    pub fn load(path: &Path) -> UpdateResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            UpdateError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            UpdateError::config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        if config.deploy_url.is_empty() {
            return Err(UpdateError::config("DeployUrl must not be empty"));
        }
        Ok(config)
    }

    /// Every configured SyncDir, in declaration order.
    pub fn sync_dirs(&self) -> Vec<&SyncDir> {
        self.bin_dir.iter().chain(self.conf_dir.iter()).collect()
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn service_stop_wait(&self) -> Duration {
        Duration::from_secs(self.service_stop_wait_seconds)
    }
}
