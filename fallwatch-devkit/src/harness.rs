/*!
Test harness wiring a complete relay node on loopback

The relay gets a recording GPIO driver, an ephemeral sensor port and a mock
monitoring host. Network signals are raised by the test itself through
`network_ready` / `network_lost`.
*/

use crate::monitor_host::MockMonitorHost;
use crate::outputs::RecordingOutputs;
use crate::sensor::MockSensor;
use anyhow::{Context, Result};
use fallwatch_node::config::{MonitorLinkConfig, OutputsConfig, SensorConfig};
use fallwatch_node::{
    Alarm, AlarmState, HealthSnapshot, Indicators, LinkHealth, MonitorHandle, MonitorLink, MonitorState,
    NetworkEvent, NetworkLifecycle, SensorState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default wait of the harness helpers
pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestHarness {
    pub outputs: Arc<RecordingOutputs>,
    pub monitor_host: MockMonitorHost,
    alarm: Alarm,
    monitor: MonitorHandle,
    health: LinkHealth,
    lifecycle: NetworkLifecycle,
}

impl TestHarness {
    /// Relay with heartbeats effectively disabled
    pub async fn start() -> Result<Self> {
        Self::start_with_heartbeat(Duration::from_secs(3600)).await
    }

    pub async fn start_with_heartbeat(heartbeat: Duration) -> Result<Self> {
        crate::init_tracing();

        let monitor_host = MockMonitorHost::start().await?;
        let monitor_config = MonitorLinkConfig {
            host: "127.0.0.1".to_string(),
            port: monitor_host.port(),
            heartbeat_interval_secs: heartbeat.as_secs().max(1),
            connect_timeout_ms: Some(1000),
        };
        let sensor_config = SensorConfig {
            listen_port: 0,
            backlog: 1,
            accept_backoff_ms: 50,
            recv_pacing_ms: 1,
        };

        let health = LinkHealth::new();
        let outputs = Arc::new(RecordingOutputs::default());
        let indicators = Indicators::new(outputs.clone(), OutputsConfig::default());
        let monitor = MonitorLink::spawn(monitor_config, health.clone());
        let alarm = Alarm::new(AlarmState::new(indicators), monitor.clone());
        let lifecycle = NetworkLifecycle::new(sensor_config, alarm.clone(), monitor.clone(), health.clone());

        info!("🧪 Test relay ready, monitor host on {}", monitor_host.addr());
        Ok(Self {
            outputs,
            monitor_host,
            alarm,
            monitor,
            health,
            lifecycle,
        })
    }

    pub async fn network_ready(&mut self) {
        self.lifecycle.handle(NetworkEvent::Ready).await;
    }

    pub async fn network_lost(&mut self) {
        self.lifecycle.handle(NetworkEvent::Lost).await;
    }

    /// Loopback address of the relay's sensor server, while it runs
    pub fn sensor_addr(&self) -> Option<SocketAddr> {
        self.lifecycle
            .sensor_addr()
            .map(|addr| SocketAddr::from(([127, 0, 0, 1], addr.port())))
    }

    pub fn sensor_state(&self) -> SensorState {
        self.lifecycle
            .sensor()
            .map(|sensor| sensor.state())
            .unwrap_or(SensorState::Down)
    }

    pub async fn connect_sensor(&self) -> Result<MockSensor> {
        let addr = self.sensor_addr().context("sensor server is not running")?;
        MockSensor::connect(addr).await
    }

    pub fn alarm(&self) -> &Alarm {
        &self.alarm
    }

    pub fn monitor_state(&self) -> MonitorState {
        self.monitor.state()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    /// Wait for the alarm to reach `active`
    pub async fn wait_for_alarm(&self, active: bool) -> Result<()> {
        let alarm = &self.alarm;
        if !crate::wait_until(WAIT, || async move { alarm.is_active() == active }).await {
            anyhow::bail!("alarm never became {}", if active { "active" } else { "cleared" });
        }
        Ok(())
    }

    pub async fn wait_for_sensor_state(&self, state: SensorState) -> Result<()> {
        if !crate::wait_until(WAIT, || async move { self.sensor_state() == state }).await {
            anyhow::bail!("sensor link stuck in {:?}, expected {:?}", self.sensor_state(), state);
        }
        Ok(())
    }

    pub async fn wait_for_monitor_state(&self, state: MonitorState) -> Result<()> {
        if !crate::wait_until(WAIT, || async move { self.monitor_state() == state }).await {
            anyhow::bail!("monitor link stuck in {:?}, expected {:?}", self.monitor_state(), state);
        }
        Ok(())
    }
}
