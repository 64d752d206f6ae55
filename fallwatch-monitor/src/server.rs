//! TCP side of the monitoring host: one task per connected relay

use crate::config::MonitorConfig;
use crate::tracker::{Report, SharedTracker};
use crate::MonitorError;
use fallwatch_protocol::{MessageTokenizer, MonitorMessage};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Largest chunk read from a relay at once
pub const READ_CHUNK: usize = 1024;

/// Pause after a failed accept, e.g. when out of file descriptors
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub fn bind(config: &MonitorConfig) -> Result<TcpListener, MonitorError> {
    let addr = config.listen_addr();
    let bind_error = |source: std::io::Error| MonitorError::Bind {
        addr: addr.clone(),
        source,
    };

    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|_| MonitorError::InvalidAddress(addr.clone()))?;
    let socket = if socket_addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;
    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(socket_addr).map_err(bind_error)?;
    socket.listen(config.backlog).map_err(bind_error)
}

/// Accept relays forever, feeding their reports to `reports`
pub async fn serve(listener: TcpListener, tracker: SharedTracker, reports: mpsc::UnboundedSender<Report>) {
    let listener = &listener;
    accept_relays(move || listener.accept(), tracker, reports).await
}

async fn accept_relays<A, F>(mut accept: A, tracker: SharedTracker, reports: mpsc::UnboundedSender<Report>)
where
    A: FnMut() -> F,
    F: Future<Output = io::Result<(TcpStream, SocketAddr)>>,
{
    loop {
        match accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_client(stream, peer, tracker.clone(), reports.clone()));
            }
            Err(e) => {
                error!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    tracker: SharedTracker,
    reports: mpsc::UnboundedSender<Report>,
) {
    info!("Relay connected: {}", peer);
    let mut tokenizer = MessageTokenizer::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Connection with {} failed: {}", peer, e);
                break;
            }
        };

        for message in tokenizer.feed(&buf[..n]) {
            if message == MonitorMessage::Heartbeat {
                debug!("Heartbeat from {}", peer);
                continue;
            }
            let report = tracker.lock().observe(message, Instant::now());
            match report {
                Some(report) => {
                    let _ = reports.send(report);
                }
                None => debug!("Repeated '{}' from {} suppressed", message, peer),
            }
        }
    }

    if tokenizer.skipped_bytes() > 0 {
        warn!("Skipped {} unrecognised bytes from {}", tokenizer.skipped_bytes(), peer);
    }
    info!("Relay disconnected: {}", peer);
}
