/*!
Monitoring host double

Listens on loopback and records everything relays send, decoded with the
same tokenizer as the real monitoring host.
*/

use anyhow::{Context, Result};
use fallwatch_protocol::{MessageTokenizer, MonitorMessage};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Default)]
struct Recorded {
    messages: Vec<MonitorMessage>,
    connections: usize,
    open: usize,
}

pub struct MockMonitorHost {
    addr: SocketAddr,
    recorded: Arc<Mutex<Recorded>>,
    clients: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accept_task: JoinHandle<()>,
}

impl MockMonitorHost {
    /// Listen on an ephemeral loopback port
    pub async fn start() -> Result<Self> {
        Self::start_on(0).await
    }

    /// Listen on a given loopback port, e.g. to bring a host back on the
    /// port a relay is already configured for
    pub async fn start_on(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("cannot bind mock monitor host on port {}", port))?;
        let addr = listener.local_addr()?;
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let clients = Arc::new(Mutex::new(Vec::new()));

        let accept_task = tokio::spawn(accept_relays(listener, recorded.clone(), clients.clone()));
        info!("[MOCK] Monitor host listening on {}", addr);

        Ok(Self {
            addr,
            recorded,
            clients,
            accept_task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every decoded message, heartbeats included, in arrival order
    pub fn messages(&self) -> Vec<MonitorMessage> {
        self.recorded.lock().messages.clone()
    }

    /// Alarm and cleared messages only
    pub fn notifications(&self) -> Vec<MonitorMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.is_notification())
            .collect()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.recorded.lock().connections
    }

    /// Connections still open from the relay side
    pub fn open_connections(&self) -> usize {
        self.recorded.lock().open
    }

    /// Wait until at least `count` notifications arrived
    pub async fn wait_for_notifications(&self, count: usize, timeout: Duration) -> Result<Vec<MonitorMessage>> {
        let reached = crate::wait_until(timeout, || async move { self.notifications().len() >= count }).await;
        if !reached {
            anyhow::bail!(
                "expected {} notifications, got {:?}",
                count,
                self.notifications()
            );
        }
        Ok(self.notifications())
    }

    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> Result<()> {
        let reached = crate::wait_until(timeout, || async move { self.connections() >= count }).await;
        if !reached {
            anyhow::bail!("expected {} connections, got {}", count, self.connections());
        }
        Ok(())
    }

    /// Wait until the relay has closed every connection
    pub async fn wait_for_close(&self, timeout: Duration) -> Result<()> {
        let closed = crate::wait_until(timeout, || async move { self.open_connections() == 0 }).await;
        if !closed {
            anyhow::bail!("{} connections still open", self.open_connections());
        }
        Ok(())
    }

    /// Drop every relay connection from the host side
    pub fn disconnect_all(&self) {
        for client in self.clients.lock().drain(..) {
            client.abort();
        }
        self.recorded.lock().open = 0;
    }

    pub fn clear(&self) {
        self.recorded.lock().messages.clear();
    }
}

impl Drop for MockMonitorHost {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.disconnect_all();
    }
}

async fn accept_relays(
    listener: TcpListener,
    recorded: Arc<Mutex<Recorded>>,
    clients: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    while let Ok((stream, peer)) = listener.accept().await {
        debug!("[MOCK] Relay connected from {}", peer);
        {
            let mut recorded = recorded.lock();
            recorded.connections += 1;
            recorded.open += 1;
        }
        let task = tokio::spawn(record_relay(stream, recorded.clone()));
        clients.lock().push(task);
    }
}

async fn record_relay(mut stream: TcpStream, recorded: Arc<Mutex<Recorded>>) {
    let mut tokenizer = MessageTokenizer::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let messages = tokenizer.feed(&buf[..n]);
                recorded.lock().messages.extend(messages);
            }
        }
    }
    let mut recorded = recorded.lock();
    recorded.open = recorded.open.saturating_sub(1);
}
