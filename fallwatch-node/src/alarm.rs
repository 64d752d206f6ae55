//! Shared alarm condition
//!
//! `set` is not deduplicated: every call re-drives the outputs and re-sends
//! the notification, even when the state did not change.

use crate::monitor_link::{MonitorHandle, NotifyOutcome};
use crate::outputs::Indicators;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

pub struct AlarmState {
    active: bool,
    indicators: Indicators,
}

impl AlarmState {
    /// Starts cleared, with the outputs showing the cleared pattern
    pub fn new(indicators: Indicators) -> Self {
        indicators.show(false);
        Self {
            active: false,
            indicators,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn apply(&mut self, active: bool) {
        self.active = active;
        self.indicators.show(active);
        if active {
            info!("Alarm triggered: abnormal posture detected!");
        } else {
            info!("Alarm released: posture returned to normal");
        }
    }
}

/// Handle given to the sensor link and the lifecycle
#[derive(Clone)]
pub struct Alarm {
    state: Arc<Mutex<AlarmState>>,
    monitor: MonitorHandle,
}

impl Alarm {
    pub fn new(state: AlarmState, monitor: MonitorHandle) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            monitor,
        }
    }

    /// Drive the outputs, then notify the monitor host. The lock is released
    /// before the notification goes out.
    pub async fn set(&self, active: bool) -> NotifyOutcome {
        self.state.lock().apply(active);
        self.monitor.notify(active).await
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().is_active()
    }
}
