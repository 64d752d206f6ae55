use crate::MonitorError;
use fallwatch_protocol::DEFAULT_MONITOR_PORT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;

pub const CONFIG_ENV: &str = "FALLWATCH_MONITOR_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "monitor.yaml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub bind: String,
    pub port: u16,
    pub backlog: u32,
    /// Same-state messages closer together than this are not reported again
    pub repeat_window_secs: u64,
    /// Ring the terminal bell on a fall
    pub bell: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_MONITOR_PORT,
            backlog: 5,
            repeat_window_secs: 5,
            bell: true,
        }
    }
}

impl MonitorConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn repeat_window(&self) -> Duration {
        Duration::from_secs(self.repeat_window_secs)
    }
}

pub async fn load_config() -> Result<MonitorConfig, MonitorError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
    load_config_from(Path::new(&path)).await
}

pub async fn load_config_from(path: &Path) -> Result<MonitorConfig, MonitorError> {
    if !path.exists() {
        info!("No {} found, using default configuration", path.display());
        return Ok(MonitorConfig::default());
    }

    let txt = fs::read_to_string(path).await?;
    if txt.trim().is_empty() {
        return Ok(MonitorConfig::default());
    }
    serde_yaml::from_str(&txt).map_err(|source| MonitorError::Config {
        path: path.to_path_buf(),
        source,
    })
}
