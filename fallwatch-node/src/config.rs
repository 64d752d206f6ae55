//! Relay node configuration
//!
//! Everything here is fixed for the lifetime of the process:
//! - Sensor server port, backlog and worker pacing
//! - Monitor host endpoint and heartbeat cadence
//! - Output pin polarity and the boot lamp test
//! - Network readiness probe and health reporting

use crate::outputs::OutputPin;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "FALLWATCH_NODE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not find a config directory")]
    NoConfigDir,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub sensor: SensorConfig,
    pub monitor: MonitorLinkConfig,
    pub outputs: OutputsConfig,
    pub network: NetworkConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub listen_port: u16,
    pub backlog: u32,
    pub accept_backoff_ms: u64,
    pub recv_pacing_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorLinkConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    /// Unset means the OS connect timeout applies
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputsConfig {
    pub buzzer: PinConfig,
    pub alarm_led: PinConfig,
    pub normal_led: PinConfig,
    pub lamp_test: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinConfig {
    /// Board label, only used in logs
    pub label: String,
    pub active_low: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mode: ProbeMode,
    /// Restrict the probe to one interface (e.g. "wlan0")
    pub interface: Option<String>,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// Network is considered ready as soon as the node starts
    Always,
    /// Follow the presence of a usable IPv4 address
    Interface,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// 0 disables the periodic report
    pub report_interval_secs: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            listen_port: fallwatch_protocol::DEFAULT_SENSOR_PORT,
            backlog: 1,
            accept_backoff_ms: 1000,
            recv_pacing_ms: 100,
        }
    }
}

impl SensorConfig {
    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }

    pub fn recv_pacing(&self) -> Duration {
        Duration::from_millis(self.recv_pacing_ms)
    }
}

impl Default for MonitorLinkConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.109".to_string(),
            port: fallwatch_protocol::DEFAULT_MONITOR_PORT,
            heartbeat_interval_secs: 60,
            connect_timeout_ms: None,
        }
    }
}

impl MonitorLinkConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for OutputsConfig {
    fn default() -> Self {
        Self {
            buzzer: PinConfig::new("PB0", false),
            alarm_led: PinConfig::new("PF12", true),
            normal_led: PinConfig::new("PF11", true),
            lamp_test: true,
        }
    }
}

impl OutputsConfig {
    pub fn pin(&self, pin: OutputPin) -> &PinConfig {
        match pin {
            OutputPin::Buzzer => &self.buzzer,
            OutputPin::AlarmLed => &self.alarm_led,
            OutputPin::NormalLed => &self.normal_led,
        }
    }
}

impl PinConfig {
    pub fn new(label: &str, active_low: bool) -> Self {
        Self {
            label: label.to_string(),
            active_low,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mode: ProbeMode::Interface,
            interface: None,
            poll_interval_secs: 2,
        }
    }
}

impl NetworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 300,
        }
    }
}

impl HealthConfig {
    pub fn report_interval(&self) -> Option<Duration> {
        (self.report_interval_secs > 0).then(|| Duration::from_secs(self.report_interval_secs))
    }
}

impl NodeConfig {
    /// Load from `$FALLWATCH_NODE_CONFIG`, else the OS config directory.
    /// A missing file yields the defaults.
    pub async fn load() -> Result<Self, ConfigError> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::config_file_path()?,
        };
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config: NodeConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `<config_dir>/fallwatch/node.toml`
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("fallwatch");
        path.push("node.toml");
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensor.listen_port == 0 {
            return Err(ConfigError::Invalid("sensor.listen_port must be non-zero".into()));
        }
        if self.sensor.backlog == 0 {
            return Err(ConfigError::Invalid("sensor.backlog must be at least 1".into()));
        }
        if self.monitor.port == 0 {
            return Err(ConfigError::Invalid("monitor.port must be non-zero".into()));
        }
        if self.monitor.host.trim().is_empty() {
            return Err(ConfigError::Invalid("monitor.host is empty".into()));
        }
        if self.monitor.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor.heartbeat_interval_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
