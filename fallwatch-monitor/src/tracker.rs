//! Posture tracking across all relay connections
//!
//! Transitions are always reported. A message repeating the current state is
//! reported again only once the repeat window has elapsed since the last
//! report, so a relay re-asserting its alarm does not flood the console.

use fallwatch_protocol::{MonitorMessage, Posture};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type SharedTracker = Arc<Mutex<AlarmTracker>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub posture: Posture,
    /// Same state as the previous report
    pub repeat: bool,
}

impl Report {
    pub fn message(&self) -> MonitorMessage {
        MonitorMessage::for_alarm(self.posture.is_fall())
    }
}

#[derive(Debug)]
pub struct AlarmTracker {
    posture: Posture,
    last_report: Instant,
    repeat_window: Duration,
}

impl AlarmTracker {
    /// Starts in `Normal`; `now` counts as the last report
    pub fn new(repeat_window: Duration, now: Instant) -> Self {
        Self {
            posture: Posture::Normal,
            last_report: now,
            repeat_window,
        }
    }

    pub fn shared(self) -> SharedTracker {
        Arc::new(Mutex::new(self))
    }

    pub fn posture(&self) -> Posture {
        self.posture
    }

    pub fn observe(&mut self, message: MonitorMessage, now: Instant) -> Option<Report> {
        let posture = match message {
            MonitorMessage::Alarm => Posture::Fall,
            MonitorMessage::Cleared => Posture::Normal,
            MonitorMessage::Heartbeat => return None,
        };

        let repeat = posture == self.posture;
        if repeat && now.saturating_duration_since(self.last_report) <= self.repeat_window {
            return None;
        }

        self.posture = posture;
        self.last_report = now;
        Some(Report { posture, repeat })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(5);

    #[test]
    fn test_transitions_are_reported() {
        let start = Instant::now();
        let mut tracker = AlarmTracker::new(WINDOW, start);

        let fall = tracker.observe(MonitorMessage::Alarm, start);
        assert_eq!(fall, Some(Report { posture: Posture::Fall, repeat: false }));
        assert_eq!(tracker.posture(), Posture::Fall);

        let cleared = tracker.observe(MonitorMessage::Cleared, start + Duration::from_millis(100));
        assert_eq!(cleared, Some(Report { posture: Posture::Normal, repeat: false }));
        assert_eq!(cleared.unwrap().message(), MonitorMessage::Cleared);
    }

    #[test]
    fn test_repeats_inside_window_are_suppressed() {
        let start = Instant::now();
        let mut tracker = AlarmTracker::new(WINDOW, start);
        tracker.observe(MonitorMessage::Alarm, start);

        assert_eq!(tracker.observe(MonitorMessage::Alarm, start + Duration::from_secs(1)), None);
        assert_eq!(tracker.observe(MonitorMessage::Alarm, start + WINDOW), None);

        let later = tracker.observe(MonitorMessage::Alarm, start + Duration::from_secs(6));
        assert_eq!(later, Some(Report { posture: Posture::Fall, repeat: true }));

        // the window restarts from the repeated report
        assert_eq!(tracker.observe(MonitorMessage::Alarm, start + Duration::from_secs(8)), None);
    }

    #[test]
    fn test_initial_cleared_counts_as_repeat() {
        let start = Instant::now();
        let mut tracker = AlarmTracker::new(WINDOW, start);

        assert_eq!(tracker.observe(MonitorMessage::Cleared, start + Duration::from_secs(1)), None);
        let later = tracker.observe(MonitorMessage::Cleared, start + Duration::from_secs(10));
        assert_eq!(later, Some(Report { posture: Posture::Normal, repeat: true }));
    }

    #[test]
    fn test_heartbeat_never_reported() {
        let start = Instant::now();
        let mut tracker = AlarmTracker::new(WINDOW, start);

        assert_eq!(tracker.observe(MonitorMessage::Heartbeat, start + Duration::from_secs(60)), None);
        assert_eq!(tracker.posture(), Posture::Normal);
    }
}
