//! Physical alarm outputs
//!
//! The pin driver itself belongs to the board support layer; the relay only
//! needs the `set_output(pin, level)` capability, expressed as the
//! [`OutputDriver`] trait. [`Indicators`] turns logical alarm states into
//! pin levels using the configured polarity of each output.

use crate::config::OutputsConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Step of the boot lamp test
pub const LAMP_TEST_STEP: Duration = Duration::from_millis(500);

/// Logical outputs driven by the alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputPin {
    Buzzer,
    AlarmLed,
    NormalLed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Electrical level that turns an output on or off
    pub fn for_state(on: bool, active_low: bool) -> Self {
        if on != active_low {
            Level::High
        } else {
            Level::Low
        }
    }

    /// Inverse of [`Level::for_state`]
    pub fn is_on(self, active_low: bool) -> bool {
        (self == Level::High) != active_low
    }
}

/// Pin driver capability. Writes are fire-and-forget: a failing pin cannot
/// be reported back to the alarm.
pub trait OutputDriver: Send + Sync {
    fn set_output(&self, pin: OutputPin, level: Level);
}

/// Driver for hosts without GPIO: every write becomes a log line
pub struct LogOutputDriver {
    config: OutputsConfig,
}

impl LogOutputDriver {
    pub fn new(config: OutputsConfig) -> Self {
        Self { config }
    }
}

impl OutputDriver for LogOutputDriver {
    fn set_output(&self, pin: OutputPin, level: Level) {
        let pin_config = self.config.pin(pin);
        debug!(
            "GPIO {} ({:?}) -> {:?} [{}]",
            pin_config.label,
            pin,
            level,
            if level.is_on(pin_config.active_low) { "on" } else { "off" }
        );
    }
}

/// Buzzer and the two status LEDs
#[derive(Clone)]
pub struct Indicators {
    driver: Arc<dyn OutputDriver>,
    config: OutputsConfig,
}

impl Indicators {
    pub fn new(driver: Arc<dyn OutputDriver>, config: OutputsConfig) -> Self {
        Self { driver, config }
    }

    /// Alarm: buzzer and red LED on, normal LED off. Cleared: the inverse.
    pub fn show(&self, alarm: bool) {
        self.drive(OutputPin::Buzzer, alarm);
        self.drive(OutputPin::AlarmLed, alarm);
        self.drive(OutputPin::NormalLed, !alarm);
    }

    /// Blink the normal LED off/on twice, ending lit
    pub async fn lamp_test(&self) {
        debug!("Testing normal LED...");
        let steps = [false, true, false, true];
        for (i, on) in steps.into_iter().enumerate() {
            self.drive(OutputPin::NormalLed, on);
            if i + 1 < steps.len() {
                tokio::time::sleep(LAMP_TEST_STEP).await;
            }
        }
        debug!("Normal LED test completed");
    }

    fn drive(&self, pin: OutputPin, on: bool) {
        let level = Level::for_state(on, self.config.pin(pin).active_low);
        self.driver.set_output(pin, level);
    }
}
