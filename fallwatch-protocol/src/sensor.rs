//! Status bytes sent by the vision sensor

use crate::ProtocolError;
use std::fmt;

pub const STATUS_NORMAL: u8 = 0x00;
pub const STATUS_FALL: u8 = 0x01;

/// Posture reported by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Posture {
    Normal,
    Fall,
}

impl Posture {
    /// Build the posture matching an alarm condition
    pub fn from_alarm(active: bool) -> Self {
        if active {
            Posture::Fall
        } else {
            Posture::Normal
        }
    }

    pub fn is_fall(self) -> bool {
        self == Posture::Fall
    }

    /// Byte written on the sensor link
    pub fn as_byte(self) -> u8 {
        match self {
            Posture::Normal => STATUS_NORMAL,
            Posture::Fall => STATUS_FALL,
        }
    }
}

impl TryFrom<u8> for Posture {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            STATUS_NORMAL => Ok(Posture::Normal),
            STATUS_FALL => Ok(Posture::Fall),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

impl fmt::Display for Posture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Posture::Normal => write!(f, "normal"),
            Posture::Fall => write!(f, "fall"),
        }
    }
}
