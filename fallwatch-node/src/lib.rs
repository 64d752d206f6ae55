//! FallWatch relay node
//!
//! Relays the posture status of a vision sensor to local alarm outputs and
//! to a remote monitoring host:
//! - Sensor link: TCP server accepting one sensor at a time
//! - Monitor link: persistent TCP client with heartbeats and reconnects
//! - Alarm: shared state driving the buzzer/LEDs and monitor notifications
//! - Lifecycle: starts and tears down both links as the network comes and goes

pub mod alarm;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod monitor_link;
pub mod network;
pub mod outputs;
pub mod sensor_link;

pub use alarm::{Alarm, AlarmState};
pub use config::NodeConfig;
pub use health::{HealthSnapshot, LinkHealth};
pub use lifecycle::NetworkLifecycle;
pub use monitor_link::{DropReason, MonitorHandle, MonitorLink, MonitorState, NotifyOutcome};
pub use network::NetworkEvent;
pub use outputs::{Indicators, Level, OutputDriver, OutputPin};
pub use sensor_link::{SensorLink, SensorState};

use std::time::Duration;

/// Failures of the sensor and monitor links. All of them are transient
/// from the node's point of view.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("cannot listen on sensor port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("not connected")]
    NotConnected,
    #[error("link stopped")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
