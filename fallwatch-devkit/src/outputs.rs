/*!
GPIO double: records every pin write instead of driving hardware
*/

use fallwatch_node::config::OutputsConfig;
use fallwatch_node::{Level, OutputDriver, OutputPin};
use parking_lot::Mutex;

pub struct RecordingOutputs {
    config: OutputsConfig,
    writes: Mutex<Vec<(OutputPin, Level)>>,
}

impl RecordingOutputs {
    pub fn new(config: OutputsConfig) -> Self {
        Self {
            config,
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Last level written to `pin`
    pub fn level(&self, pin: OutputPin) -> Option<Level> {
        self.writes
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| *p == pin)
            .map(|(_, level)| *level)
    }

    /// Whether `pin` is currently on, given its polarity
    pub fn is_on(&self, pin: OutputPin) -> bool {
        self.level(pin)
            .is_some_and(|level| level.is_on(self.config.pin(pin).active_low))
    }

    /// Buzzer and alarm LED on, normal LED off
    pub fn shows_alarm(&self) -> bool {
        self.is_on(OutputPin::Buzzer) && self.is_on(OutputPin::AlarmLed) && !self.is_on(OutputPin::NormalLed)
    }

    /// Buzzer and alarm LED off, normal LED on
    pub fn shows_cleared(&self) -> bool {
        !self.is_on(OutputPin::Buzzer) && !self.is_on(OutputPin::AlarmLed) && self.is_on(OutputPin::NormalLed)
    }

    pub fn writes(&self) -> Vec<(OutputPin, Level)> {
        self.writes.lock().clone()
    }

    pub fn clear(&self) {
        self.writes.lock().clear();
    }
}

impl Default for RecordingOutputs {
    fn default() -> Self {
        Self::new(OutputsConfig::default())
    }
}

impl OutputDriver for RecordingOutputs {
    fn set_output(&self, pin: OutputPin, level: Level) {
        self.writes.lock().push((pin, level));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fallwatch_node::Indicators;
    use std::sync::Arc;

    #[test]
    fn test_polarity_is_applied() {
        let outputs = Arc::new(RecordingOutputs::default());
        let indicators = Indicators::new(outputs.clone(), OutputsConfig::default());

        indicators.show(true);
        assert_eq!(outputs.level(OutputPin::AlarmLed), Some(Level::Low));
        assert!(outputs.is_on(OutputPin::AlarmLed));
        assert!(outputs.shows_alarm());

        indicators.show(false);
        assert!(outputs.shows_cleared());
        assert_eq!(outputs.writes().len(), 6);
    }

    #[test]
    fn test_unwritten_pin_is_off() {
        let outputs = RecordingOutputs::default();
        assert_eq!(outputs.level(OutputPin::Buzzer), None);
        assert!(!outputs.is_on(OutputPin::Buzzer));
    }
}
