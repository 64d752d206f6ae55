//! Network readiness signals
//!
//! On the target board the WiFi stack raises ready/lost events itself. On a
//! host OS this probe stands in for it by watching interface addresses and
//! reporting only the edges.

use crate::config::{NetworkConfig, ProbeMode};
use std::net::IpAddr;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Ready,
    Lost,
}

/// Turns periodic up/down observations into ready/lost edges.
/// Starts from "down", so an initial down observation emits nothing.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    up: bool,
}

impl EdgeDetector {
    pub fn observe(&mut self, up: bool) -> Option<NetworkEvent> {
        if up == self.up {
            return None;
        }
        self.up = up;
        Some(if up { NetworkEvent::Ready } else { NetworkEvent::Lost })
    }
}

/// Non-loopback IPv4 address, optionally on one named interface
pub fn is_usable(name: &str, ip: IpAddr, wanted: Option<&str>) -> bool {
    if wanted.is_some_and(|wanted| wanted != name) {
        return false;
    }
    matches!(ip, IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() && !v4.is_link_local())
}

fn network_up(config: &NetworkConfig) -> bool {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .iter()
            .any(|iface| is_usable(&iface.name, iface.ip(), config.interface.as_deref())),
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {}", e);
            false
        }
    }
}

/// Spawn the probe feeding `events`
pub fn spawn_probe(config: NetworkConfig, events: mpsc::Sender<NetworkEvent>) -> JoinHandle<()> {
    task::spawn(async move {
        match config.mode {
            ProbeMode::Always => {
                info!("Network probe disabled, assuming network is ready");
                let _ = events.send(NetworkEvent::Ready).await;
            }
            ProbeMode::Interface => {
                info!(
                    "Watching {} for an IPv4 address",
                    config.interface.as_deref().unwrap_or("all interfaces")
                );
                let mut edges = EdgeDetector::default();
                let mut ticker = tokio::time::interval(config.poll_interval());
                loop {
                    ticker.tick().await;
                    if let Some(event) = edges.observe(network_up(&config)) {
                        debug!("Network probe: {:?}", event);
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_edges_only() {
        let mut edges = EdgeDetector::default();
        assert_eq!(edges.observe(false), None);
        assert_eq!(edges.observe(true), Some(NetworkEvent::Ready));
        assert_eq!(edges.observe(true), None);
        assert_eq!(edges.observe(false), Some(NetworkEvent::Lost));
        assert_eq!(edges.observe(false), None);
    }

    #[test]
    fn test_usable_addresses() {
        let lan = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        assert!(is_usable("wlan0", lan, None));
        assert!(is_usable("wlan0", lan, Some("wlan0")));
        assert!(!is_usable("eth0", lan, Some("wlan0")));
        assert!(!is_usable("lo", IpAddr::V4(Ipv4Addr::LOCALHOST), None));
        assert!(!is_usable("wlan0", IpAddr::V4(Ipv4Addr::new(169, 254, 3, 4)), None));
        assert!(!is_usable("wlan0", IpAddr::V6(Ipv6Addr::LOCALHOST), None));
    }

    #[tokio::test]
    async fn test_always_mode_signals_ready_once() {
        let config = NetworkConfig {
            mode: ProbeMode::Always,
            ..NetworkConfig::default()
        };
        let (tx, mut rx) = mpsc::channel(4);

        spawn_probe(config, tx).await.unwrap();

        assert_eq!(rx.recv().await, Some(NetworkEvent::Ready));
        assert_eq!(rx.recv().await, None);
    }
}
