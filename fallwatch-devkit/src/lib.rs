/*!
# FallWatch DevKit - Test doubles for relay development

Lets the relay be exercised on a workstation without the board or the
monitoring PC:
- GPIO double recording every output write
- Monitoring host double capturing monitor-link traffic
- Sensor double streaming status bytes
- Harness wiring a complete relay on loopback ports
*/

pub mod harness;
pub mod monitor_host;
pub mod outputs;
pub mod sensor;

pub use harness::TestHarness;
pub use monitor_host::MockMonitorHost;
pub use outputs::RecordingOutputs;
pub use sensor::MockSensor;

use std::future::Future;
use std::time::Duration;

/// Poll interval of the `wait_for_*` helpers
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Install a test-friendly tracing subscriber (idempotent)
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init()
        .ok();
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check().await {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    check().await
}
