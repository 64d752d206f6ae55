//! Network lifecycle: owns the start/stop sequencing of both links
//!
//! - Ready: start the sensor server; only if it is up, start the monitor
//!   link (eager connect plus heartbeats)
//! - Lost: close the monitor link to new connects, stop the sensor server and
//!   wait for its workers, force the alarm clear, then stop the monitor link
//!
//! The sensor workers are joined before the force-clear, so no sensor byte
//! can re-raise the alarm after the network is gone. Closing the monitor link
//! first keeps that join from waiting on a connect to an unreachable host;
//! the clear still goes out if the link is connected.

use crate::alarm::Alarm;
use crate::config::SensorConfig;
use crate::health::LinkHealth;
use crate::monitor_link::MonitorHandle;
use crate::network::NetworkEvent;
use crate::sensor_link::SensorLink;
use std::future::Future;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

enum Phase {
    Unready,
    /// `sensor` is `None` when the listener could not be created
    Ready { sensor: Option<SensorLink> },
}

pub struct NetworkLifecycle {
    config: SensorConfig,
    alarm: Alarm,
    monitor: MonitorHandle,
    health: LinkHealth,
    phase: Phase,
}

impl NetworkLifecycle {
    pub fn new(config: SensorConfig, alarm: Alarm, monitor: MonitorHandle, health: LinkHealth) -> Self {
        Self {
            config,
            alarm,
            monitor,
            health,
            phase: Phase::Unready,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.phase, Phase::Ready { .. })
    }

    /// Address of the running sensor server, if any
    pub fn sensor_addr(&self) -> Option<SocketAddr> {
        match &self.phase {
            Phase::Ready { sensor: Some(sensor) } => Some(sensor.local_addr()),
            _ => None,
        }
    }

    pub fn sensor(&self) -> Option<&SensorLink> {
        match &self.phase {
            Phase::Ready { sensor } => sensor.as_ref(),
            Phase::Unready => None,
        }
    }

    pub async fn handle(&mut self, event: NetworkEvent) {
        match (event, self.is_ready()) {
            (NetworkEvent::Ready, false) => self.on_ready().await,
            (NetworkEvent::Lost, true) => self.on_lost().await,
            (event, _) => debug!("Ignoring duplicate network event {:?}", event),
        }
    }

    async fn on_ready(&mut self) {
        info!("Network is ready");
        match SensorLink::start(&self.config, self.alarm.clone(), self.health.clone()).await {
            Ok(sensor) => {
                self.monitor.start().await;
                self.phase = Phase::Ready {
                    sensor: Some(sensor),
                };
            }
            Err(e) => {
                error!("=== Sensor server initialization failed: {} ===", e);
                self.phase = Phase::Ready { sensor: None };
            }
        }
    }

    async fn on_lost(&mut self) {
        info!("Network disconnected!");
        self.monitor.close();
        if let Phase::Ready {
            sensor: Some(sensor),
        } = std::mem::replace(&mut self.phase, Phase::Unready)
        {
            sensor.stop().await;
        }
        self.alarm.set(false).await;
        self.monitor.stop().await;
    }

    /// Follow `events` until `shutdown` resolves, then tear down as if the
    /// network had been lost
    pub async fn run<F>(mut self, mut events: mpsc::Receiver<NetworkEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                Some(event) = events.recv() => self.handle(event).await,
                _ = &mut shutdown => break,
            }
        }

        info!("Shutting down relay");
        if self.is_ready() {
            self.on_lost().await;
        }
    }
}
