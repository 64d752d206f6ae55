//! Server side of the sensor link
//!
//! Two workers share one listener:
//! - the accept worker holds a single-permit semaphore while a client is
//!   alive, so a second connection stays in the backlog until the first
//!   one is closed
//! - the receive worker reads one status byte at a time and drives the
//!   alarm; losing the client forces the alarm clear
//!
//! Stopping raises a shutdown flag and joins both workers, which drops the
//! client and the listener.

use crate::alarm::Alarm;
use crate::config::SensorConfig;
use crate::health::LinkHealth;
use crate::LinkError;
use fallwatch_protocol::Posture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Down,
    Listening,
    Connected,
}

/// Accepted sensor connection. Dropping it closes the socket and frees the
/// accept slot.
struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    session: Uuid,
    _slot: OwnedSemaphorePermit,
}

enum SessionEnd {
    PeerClosed,
    Failed(std::io::Error),
    Shutdown,
}

/// A running sensor server, one per network-ready period
pub struct SensorLink {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<SensorState>,
    workers: Vec<JoinHandle<()>>,
}

impl SensorLink {
    /// Bind the listener and spawn the accept and receive workers.
    /// Nothing is spawned if the listener cannot be created.
    pub async fn start(
        config: &SensorConfig,
        alarm: Alarm,
        health: LinkHealth,
    ) -> Result<Self, LinkError> {
        let listener = bind_listener(config)?;
        let local_addr = listener.local_addr()?;
        info!("Sensor server started, listening on {}", local_addr);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (state_tx, state) = watch::channel(SensorState::Listening);
        let state_tx = Arc::new(state_tx);
        let (clients_tx, clients_rx) = mpsc::channel(1);

        let accept = tokio::spawn(accept_loop(
            listener,
            Arc::new(Semaphore::new(1)),
            clients_tx,
            state_tx.clone(),
            shutdown_rx.clone(),
            config.accept_backoff(),
            health.clone(),
        ));
        let receive = tokio::spawn(receive_loop(
            clients_rx,
            alarm,
            state_tx,
            shutdown_rx,
            config.recv_pacing(),
            health,
        ));

        Ok(Self {
            local_addr,
            shutdown,
            state,
            workers: vec![accept, receive],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> SensorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SensorState> {
        self.state.clone()
    }

    /// Shut both workers down and wait for them. Does not touch the alarm.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("Sensor worker ended abnormally: {}", e);
            }
        }
        info!("Sensor server on {} stopped", self.local_addr);
    }
}

fn bind_listener(config: &SensorConfig) -> Result<TcpListener, LinkError> {
    let port = config.listen_port;
    let bind_error = |source: std::io::Error| LinkError::Bind { port, source };

    let socket = TcpSocket::new_v4().map_err(bind_error)?;
    debug!("Step 1/3: sensor socket created");

    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket
        .bind(SocketAddr::from(([0, 0, 0, 0], port)))
        .map_err(bind_error)?;
    debug!("Step 2/3: port {} bound", port);

    let listener = socket.listen(config.backlog).map_err(bind_error)?;
    debug!("Step 3/3: listening with backlog {}", config.backlog);
    Ok(listener)
}

async fn accept_loop(
    listener: TcpListener,
    slot: Arc<Semaphore>,
    clients: mpsc::Sender<Client>,
    state: Arc<watch::Sender<SensorState>>,
    mut shutdown: watch::Receiver<bool>,
    backoff: Duration,
    health: LinkHealth,
) {
    debug!("Accept worker started, waiting for connection...");
    loop {
        let permit = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            permit = slot.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let session = Uuid::new_v4();
                info!("✅ Sensor connected from {} (session {})", peer, session);
                health.sensor_session();
                state.send_replace(SensorState::Connected);
                let client = Client {
                    stream,
                    peer,
                    session,
                    _slot: permit,
                };
                if clients.send(client).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Accept connection failed: {}", e);
                drop(permit);
                tokio::select! {
                    _ = stopped(&mut shutdown) => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
    state.send_replace(SensorState::Down);
    debug!("Accept worker stopped");
}

async fn receive_loop(
    mut clients: mpsc::Receiver<Client>,
    alarm: Alarm,
    state: Arc<watch::Sender<SensorState>>,
    mut shutdown: watch::Receiver<bool>,
    pacing: Duration,
    health: LinkHealth,
) {
    debug!("Sensor receive worker started");
    loop {
        let mut client = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            client = clients.recv() => match client {
                Some(client) => client,
                None => break,
            },
        };

        let span = info_span!("sensor", session = %client.session);
        let end = serve_client(&mut client.stream, &alarm, &mut shutdown, pacing, &health)
            .instrument(span)
            .await;

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::PeerClosed => warn!("Sensor {} disconnected", client.peer),
            SessionEnd::Failed(e) => error!("Failed to receive data from {}: {}", client.peer, e),
        }
        state.send_replace(SensorState::Listening);
        alarm.set(false).await;
        // frees the accept slot; the next client is only taken after the clear
        drop(client);

        if !pace(pacing, &mut shutdown).await {
            break;
        }
    }
    state.send_replace(SensorState::Down);
    debug!("Sensor receive worker stopped");
}

/// Process bytes until the client goes away or the link is stopped
async fn serve_client(
    stream: &mut TcpStream,
    alarm: &Alarm,
    shutdown: &mut watch::Receiver<bool>,
    pacing: Duration,
    health: &LinkHealth,
) -> SessionEnd {
    let mut buf = [0u8; 1];
    loop {
        let read = tokio::select! {
            _ = stopped(shutdown) => return SessionEnd::Shutdown,
            read = stream.read(&mut buf) => read,
        };

        match read {
            Ok(0) => return SessionEnd::PeerClosed,
            Ok(_) => {
                health.status_byte();
                debug!("Received data: {:#04x}", buf[0]);
                match Posture::try_from(buf[0]) {
                    Ok(posture) => {
                        alarm.set(posture.is_fall()).await;
                    }
                    Err(e) => {
                        health.unknown_byte();
                        warn!("Ignoring sensor data: {}", e);
                    }
                }
            }
            Err(e) => return SessionEnd::Failed(e),
        }

        if !pace(pacing, shutdown).await {
            return SessionEnd::Shutdown;
        }
    }
}

/// Pacing delay between reads; false if the link was stopped meanwhile
async fn pace(pacing: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = stopped(shutdown) => false,
        _ = tokio::time::sleep(pacing) => true,
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
