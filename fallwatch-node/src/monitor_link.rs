//! Outbound link to the monitoring host
//!
//! A single task owns the socket. Notifications, heartbeats and start/stop
//! requests are all serialized through it, so a send can never race a
//! reconnect or a teardown:
//! - `notify` reconnects once if needed, then sends or drops the message
//! - the heartbeat timer reconnects when down, otherwise sends `PING`
//! - any send failure closes the socket; the next notify or tick reconnects
//!
//! Dropped notifications are never queued or retried.
//!
//! Teardown is two-step. `close` abandons an in-flight connect and forbids new
//! ones, while an open socket still carries notifications; `stop` then drops
//! the socket and everything after it.

use crate::config::MonitorLinkConfig;
use crate::health::LinkHealth;
use crate::LinkError;
use fallwatch_protocol::MonitorMessage;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Not started, or stopped by network loss
    Stopped,
    Disconnected,
    Connected,
}

/// Result of a notification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The link is stopped (network down)
    Stopped,
    /// The reconnect attempt failed
    Unreachable,
    /// The socket broke while sending
    SendFailed,
}

/// Connect and send permissions, shared between the handle and the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    /// No new connects; the current socket, if any, is still used
    Closing,
    Shut,
}

enum Command {
    Start,
    Stop { done: oneshot::Sender<()> },
    Notify { active: bool, reply: oneshot::Sender<NotifyOutcome> },
}

/// Cloneable access to the monitor link task
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
    gate: Arc<watch::Sender<Gate>>,
    state: watch::Receiver<MonitorState>,
}

impl MonitorHandle {
    /// Enable the link: eager connect, then heartbeats
    pub async fn start(&self) {
        self.gate.send_replace(Gate::Open);
        if self.commands.send(Command::Start).await.is_err() {
            error!("Monitor link task is gone, cannot start");
        }
    }

    /// Abandon an in-flight connect and refuse new ones. A connected socket
    /// keeps working until `stop`. Takes effect immediately, even while the
    /// task is busy.
    pub fn close(&self) {
        self.gate.send_if_modified(|gate| {
            let open = *gate == Gate::Open;
            if open {
                *gate = Gate::Closing;
            }
            open
        });
    }

    /// Close the socket and disable the link. An in-flight connect is
    /// abandoned. Returns once the task has released the socket.
    pub async fn stop(&self) {
        self.gate.send_replace(Gate::Shut);
        let (done, stopped) = oneshot::channel();
        if self.commands.send(Command::Stop { done }).await.is_ok() {
            let _ = stopped.await;
        }
    }

    /// Send the notification for `active`, reconnecting once if needed.
    /// Never fails: an undeliverable message is dropped and reported.
    pub async fn notify(&self, active: bool) -> NotifyOutcome {
        let (reply, outcome) = oneshot::channel();
        if self.commands.send(Command::Notify { active, reply }).await.is_err() {
            return NotifyOutcome::Dropped(DropReason::Stopped);
        }
        outcome
            .await
            .unwrap_or(NotifyOutcome::Dropped(DropReason::Stopped))
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state.clone()
    }
}

pub struct MonitorLink {
    config: MonitorLinkConfig,
    stream: Option<TcpStream>,
    heartbeat: Option<Interval>,
    gate: watch::Receiver<Gate>,
    state: watch::Sender<MonitorState>,
    health: LinkHealth,
}

impl MonitorLink {
    /// Spawn the link task in the `Stopped` state
    pub fn spawn(config: MonitorLinkConfig, health: LinkHealth) -> MonitorHandle {
        let (commands, receiver) = mpsc::channel(16);
        let (gate_tx, gate) = watch::channel(Gate::Shut);
        let (state, state_rx) = watch::channel(MonitorState::Stopped);

        let link = MonitorLink {
            config,
            stream: None,
            heartbeat: None,
            gate,
            state,
            health,
        };
        tokio::spawn(link.run(receiver));

        MonitorHandle {
            commands,
            gate: Arc::new(gate_tx),
            state: state_rx,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("Monitor link task started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = next_heartbeat(&mut self.heartbeat) => self.send_heartbeat().await,
            }
        }
        self.stream = None;
        debug!("Monitor link task finished");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start => self.start().await,
            Command::Stop { done } => {
                self.stop();
                let _ = done.send(());
            }
            Command::Notify { active, reply } => {
                let outcome = self.notify(active).await;
                let _ = reply.send(outcome);
            }
        }
    }

    fn is_running(&self) -> bool {
        self.heartbeat.is_some() && *self.gate.borrow() != Gate::Shut
    }

    fn may_connect(&self) -> bool {
        *self.gate.borrow() == Gate::Open
    }

    async fn start(&mut self) {
        if self.heartbeat.is_some() {
            debug!("Monitor link already started");
            return;
        }
        let period = self.config.heartbeat_interval();
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(timer);
        self.state.send_replace(MonitorState::Disconnected);

        self.connect().await;
    }

    fn stop(&mut self) {
        self.heartbeat = None;
        if self.stream.take().is_some() {
            info!("Closed monitor host connection");
        }
        self.state.send_replace(MonitorState::Stopped);
    }

    /// One connect attempt. Abandoned if the link gets closed meanwhile.
    async fn connect(&mut self) -> bool {
        self.stream = None;
        if !self.may_connect() {
            debug!("Monitor link closing, not connecting");
            return false;
        }
        debug!("Attempting to connect to monitor host at {}", self.config.endpoint());

        let mut gate = self.gate.clone();
        let result = tokio::select! {
            result = open_stream(&self.config) => result,
            _ = closed(&mut gate) => Err(LinkError::Cancelled),
        };

        match result {
            Ok(stream) => {
                info!("✅ Connected to monitor host at {}", self.config.endpoint());
                self.stream = Some(stream);
                self.health.monitor_connected();
                self.state.send_replace(MonitorState::Connected);
                true
            }
            Err(LinkError::Cancelled) => {
                debug!("Connect to monitor host abandoned, link stopping");
                false
            }
            Err(e) => {
                error!("Connect to monitor host {} failed: {}", self.config.endpoint(), e);
                self.health.monitor_connect_failed();
                self.state.send_replace(MonitorState::Disconnected);
                false
            }
        }
    }

    async fn notify(&mut self, active: bool) -> NotifyOutcome {
        let message = MonitorMessage::for_alarm(active);
        let outcome = self.deliver(message).await;
        match outcome {
            NotifyOutcome::Sent => self.health.notification_sent(),
            NotifyOutcome::Dropped(_) => self.health.notification_dropped(),
        }
        outcome
    }

    async fn deliver(&mut self, message: MonitorMessage) -> NotifyOutcome {
        if !self.is_running() {
            debug!("Monitor link stopped, dropping \"{}\"", message);
            return NotifyOutcome::Dropped(DropReason::Stopped);
        }

        if self.stream.is_none() {
            warn!("Monitor host connection not available, attempting to reconnect...");
            if !self.connect().await {
                if !self.may_connect() {
                    debug!("Monitor link closing, dropping \"{}\"", message);
                    return NotifyOutcome::Dropped(DropReason::Stopped);
                }
                error!("❌ Cannot send alarm: no connection to monitor host");
                return NotifyOutcome::Dropped(DropReason::Unreachable);
            }
        }

        match self.send(message).await {
            Ok(()) => {
                info!("📨 Alarm sent to monitor host: {}", message);
                NotifyOutcome::Sent
            }
            Err(e) => {
                error!("Failed to send alarm to monitor host: {}", e);
                NotifyOutcome::Dropped(DropReason::SendFailed)
            }
        }
    }

    async fn send_heartbeat(&mut self) {
        if self.stream.is_none() {
            debug!("Attempting to reconnect to monitor host...");
            self.connect().await;
            return;
        }

        match self.send(MonitorMessage::Heartbeat).await {
            Ok(()) => {
                self.health.heartbeat_sent();
                debug!("Heartbeat sent to monitor host");
            }
            Err(e) => warn!("Monitor host connection lost, will reconnect: {}", e),
        }
    }

    /// Write one message; on failure the socket is closed
    async fn send(&mut self, message: MonitorMessage) -> Result<(), LinkError> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream.write_all(message.as_bytes()).await,
            None => return Err(LinkError::NotConnected),
        };

        if let Err(e) = result {
            self.stream = None;
            self.state.send_replace(MonitorState::Disconnected);
            return Err(e.into());
        }
        Ok(())
    }
}

async fn open_stream(config: &MonitorLinkConfig) -> Result<TcpStream, LinkError> {
    let connect = TcpStream::connect((config.host.as_str(), config.port));
    let stream = match config.connect_timeout() {
        Some(limit) => timeout(limit, connect)
            .await
            .map_err(|_| LinkError::ConnectTimeout(limit))??,
        None => connect.await?,
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn next_heartbeat(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn closed(gate: &mut watch::Receiver<Gate>) {
    let _ = gate.wait_for(|gate| *gate != Gate::Open).await;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpSocket};

    fn config_for(port: u16) -> MonitorLinkConfig {
        MonitorLinkConfig {
            host: "127.0.0.1".to_string(),
            port,
            heartbeat_interval_secs: 3600,
            connect_timeout_ms: Some(2000),
        }
    }

    /// A port with nothing listening on it
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// A listener that never accepts, with its queue already full. Connects
    /// to it hang until the OS gives up.
    pub(crate) async fn unresponsive_host() -> (TcpListener, Vec<TcpStream>) {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        let listener = socket.listen(0).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut queued = Vec::new();
        while queued.len() < 16 {
            match timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => queued.push(stream),
                _ => break,
            }
        }
        (listener, queued)
    }

    async fn wait_for_state(handle: &MonitorHandle, wanted: MonitorState) {
        let mut states = handle.subscribe();
        timeout(Duration::from_secs(5), states.wait_for(|s| *s == wanted))
            .await
            .expect("monitor state change")
            .unwrap();
    }

    async fn read_exact_text(stream: &mut TcpStream, len: usize) -> String {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_notify_before_start_is_dropped() {
        let health = LinkHealth::new();
        let handle = MonitorLink::spawn(config_for(closed_port().await), health.clone());

        assert_eq!(handle.state(), MonitorState::Stopped);
        assert_eq!(handle.notify(true).await, NotifyOutcome::Dropped(DropReason::Stopped));
        assert_eq!(health.snapshot().notifications_dropped, 1);
    }

    #[tokio::test]
    async fn test_start_connects_eagerly_and_notify_sends_literal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = MonitorLink::spawn(config_for(port), LinkHealth::new());

        handle.start().await;
        let (mut peer, _) = listener.accept().await.unwrap();

        assert_eq!(handle.notify(true).await, NotifyOutcome::Sent);
        assert_eq!(handle.state(), MonitorState::Connected);
        let expected = MonitorMessage::Alarm.as_str();
        assert_eq!(read_exact_text(&mut peer, expected.len()).await, expected);

        assert_eq!(handle.notify(false).await, NotifyOutcome::Sent);
        let expected = MonitorMessage::Cleared.as_str();
        assert_eq!(read_exact_text(&mut peer, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_unreachable_monitor_drops_without_error() {
        let health = LinkHealth::new();
        let handle = MonitorLink::spawn(config_for(closed_port().await), health.clone());

        handle.start().await;
        assert_eq!(handle.notify(true).await, NotifyOutcome::Dropped(DropReason::Unreachable));
        assert_eq!(handle.state(), MonitorState::Disconnected);

        let snapshot = health.snapshot();
        // eager connect at start + one reconnect attempt for the notify
        assert_eq!(snapshot.monitor_connect_failures, 2);
        assert_eq!(snapshot.notifications_dropped, 1);
    }

    #[tokio::test]
    async fn test_notify_reconnects_when_monitor_comes_back() {
        let port = closed_port().await;
        let handle = MonitorLink::spawn(config_for(port), LinkHealth::new());
        handle.start().await;

        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        assert_eq!(handle.notify(true).await, NotifyOutcome::Sent);
        let mut peer = accept.await.unwrap();
        let expected = MonitorMessage::Alarm.as_str();
        assert_eq!(read_exact_text(&mut peer, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_stop_closes_socket_and_blocks_notifications() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = MonitorLink::spawn(config_for(port), LinkHealth::new());

        handle.start().await;
        let (mut peer, _) = listener.accept().await.unwrap();
        handle.stop().await;

        assert_eq!(handle.state(), MonitorState::Stopped);
        assert_eq!(handle.notify(true).await, NotifyOutcome::Dropped(DropReason::Stopped));

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), peer.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0, "peer should see EOF after stop");
    }

    #[tokio::test]
    async fn test_heartbeat_sends_ping_each_interval() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut config = config_for(port);
        config.heartbeat_interval_secs = 60;
        config.connect_timeout_ms = None;
        let health = LinkHealth::new();
        let handle = MonitorLink::spawn(config, health.clone());

        handle.start().await;
        let (mut peer, _) = listener.accept().await.unwrap();
        // only timers are pending from here on
        tokio::time::pause();

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(read_exact_text(&mut peer, 8).await, "PINGPING");
        assert_eq!(health.snapshot().heartbeats_sent, 2);
        assert_eq!(handle.state(), MonitorState::Connected);
    }

    #[tokio::test]
    async fn test_send_failure_returns_to_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let health = LinkHealth::new();
        let handle = MonitorLink::spawn(config_for(port), health.clone());

        handle.start().await;
        let (peer, _) = listener.accept().await.unwrap();
        drop(listener);
        drop(peer);

        // the first write may still land in the dead socket's buffer
        let mut outcome = NotifyOutcome::Sent;
        for _ in 0..50 {
            outcome = handle.notify(true).await;
            if outcome != NotifyOutcome::Sent {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(outcome, NotifyOutcome::Dropped(DropReason::SendFailed));
        assert_eq!(handle.state(), MonitorState::Disconnected);
        assert!(health.snapshot().notifications_dropped >= 1);
    }

    #[tokio::test]
    async fn test_failed_heartbeat_closes_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut config = config_for(port);
        config.heartbeat_interval_secs = 1;
        let handle = MonitorLink::spawn(config, LinkHealth::new());

        handle.start().await;
        let (peer, _) = listener.accept().await.unwrap();
        drop(listener);
        drop(peer);

        wait_for_state(&handle, MonitorState::Disconnected).await;
    }

    #[tokio::test]
    async fn test_heartbeat_tick_reconnects() {
        let port = closed_port().await;
        let mut config = config_for(port);
        config.heartbeat_interval_secs = 1;
        let health = LinkHealth::new();
        let handle = MonitorLink::spawn(config, health.clone());

        handle.start().await;
        let failed = timeout(Duration::from_secs(5), async {
            while health.snapshot().monitor_connect_failures == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        failed.await.expect("eager connect should fail");
        assert_eq!(handle.state(), MonitorState::Disconnected);

        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let accepted = timeout(Duration::from_secs(5), listener.accept()).await;
        assert!(accepted.is_ok(), "the next tick should reconnect");
        wait_for_state(&handle, MonitorState::Connected).await;
        assert_eq!(health.snapshot().monitor_connects, 1);
        assert_eq!(health.snapshot().notifications_sent, 0);
    }

    #[tokio::test]
    async fn test_close_abandons_pending_connect() {
        let (host, _queued) = unresponsive_host().await;
        let mut config = config_for(host.local_addr().unwrap().port());
        config.connect_timeout_ms = None;
        let handle = MonitorLink::spawn(config, LinkHealth::new());

        // the eager connect hangs inside the task
        handle.start().await;
        let pending = tokio::spawn({
            let handle = handle.clone();
            async move { handle.notify(true).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.close();
        let outcome = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
        assert_eq!(outcome, NotifyOutcome::Dropped(DropReason::Stopped));

        timeout(Duration::from_secs(5), handle.stop()).await.unwrap();
        assert_eq!(handle.state(), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_close_keeps_connected_socket_usable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = MonitorLink::spawn(config_for(port), LinkHealth::new());

        handle.start().await;
        let (mut peer, _) = listener.accept().await.unwrap();
        wait_for_state(&handle, MonitorState::Connected).await;
        handle.close();

        assert_eq!(handle.notify(false).await, NotifyOutcome::Sent);
        let expected = MonitorMessage::Cleared.as_str();
        assert_eq!(read_exact_text(&mut peer, expected.len()).await, expected);

        handle.stop().await;
        handle.start().await;
        assert!(timeout(Duration::from_secs(5), listener.accept()).await.is_ok());
    }
}
