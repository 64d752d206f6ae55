//! FallWatch wire protocol
//!
//! Two links carry FallWatch traffic:
//! - **Sensor link**: the vision sensor streams single status bytes to the
//!   relay node (`0x01` = fall, `0x00` = normal, anything else is ignored)
//! - **Monitor link**: the relay node pushes fixed ASCII notifications and a
//!   `PING` heartbeat to the monitoring host, with no framing between them

pub mod monitor;
pub mod sensor;

pub use monitor::{MessageTokenizer, MonitorMessage};
pub use sensor::Posture;

/// Default port the relay node listens on for the sensor
pub const DEFAULT_SENSOR_PORT: u16 = 8081;

/// Default port the monitoring host listens on for the relay node
pub const DEFAULT_MONITOR_PORT: u16 = 8888;

/// Errors raised while decoding wire data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown status byte: {0:#04x}")]
    UnknownStatus(u8),
}
