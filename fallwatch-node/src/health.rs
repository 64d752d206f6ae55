use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

/// Point-in-time view of the link counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub uptime_seconds: u64,
    pub sensor_sessions: u64,
    pub status_bytes: u64,
    pub unknown_bytes: u64,
    pub notifications_sent: u64,
    pub notifications_dropped: u64,
    pub monitor_connects: u64,
    pub monitor_connect_failures: u64,
    pub heartbeats_sent: u64,
}

#[derive(Default)]
struct Counters {
    sensor_sessions: AtomicU64,
    status_bytes: AtomicU64,
    unknown_bytes: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_dropped: AtomicU64,
    monitor_connects: AtomicU64,
    monitor_connect_failures: AtomicU64,
    heartbeats_sent: AtomicU64,
}

/// Counters shared by both links
#[derive(Clone)]
pub struct LinkHealth {
    start_time: Instant,
    counters: Arc<Counters>,
}

impl LinkHealth {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn sensor_session(&self) {
        bump(&self.counters.sensor_sessions);
    }

    pub fn status_byte(&self) {
        bump(&self.counters.status_bytes);
    }

    pub fn unknown_byte(&self) {
        bump(&self.counters.unknown_bytes);
    }

    pub fn notification_sent(&self) {
        bump(&self.counters.notifications_sent);
    }

    pub fn notification_dropped(&self) {
        bump(&self.counters.notifications_dropped);
    }

    pub fn monitor_connected(&self) {
        bump(&self.counters.monitor_connects);
    }

    pub fn monitor_connect_failed(&self) {
        bump(&self.counters.monitor_connect_failures);
    }

    pub fn heartbeat_sent(&self) {
        bump(&self.counters.heartbeats_sent);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let c = &self.counters;
        HealthSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            sensor_sessions: c.sensor_sessions.load(Ordering::Relaxed),
            status_bytes: c.status_bytes.load(Ordering::Relaxed),
            unknown_bytes: c.unknown_bytes.load(Ordering::Relaxed),
            notifications_sent: c.notifications_sent.load(Ordering::Relaxed),
            notifications_dropped: c.notifications_dropped.load(Ordering::Relaxed),
            monitor_connects: c.monitor_connects.load(Ordering::Relaxed),
            monitor_connect_failures: c.monitor_connect_failures.load(Ordering::Relaxed),
            heartbeats_sent: c.heartbeats_sent.load(Ordering::Relaxed),
        }
    }

    /// Log a JSON snapshot every `every`
    pub fn spawn_reporter(&self, every: Duration) -> JoinHandle<()> {
        let health = self.clone();
        task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                match serde_json::to_string(&health.snapshot()) {
                    Ok(json) => debug!(target: "fallwatch::health", "{json}"),
                    Err(e) => warn!("Failed to serialize health snapshot: {e}"),
                }
            }
        })
    }
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}
