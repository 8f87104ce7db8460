//! TTCP packet listener
//!
//! Accepts TCP connections, decodes every packet each peer sends and
//! reports them as [`ListenerEvent`]s. It keeps no user registry and
//! routes nothing; that belongs to the chat server built on top.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};

use super::connection::{Connection, ConnectionError};
use crate::config::NetworkConfig;
use crate::protocol::{Packet, Payload, DEFAULT_MAX_PACKET_SIZE};

/// Listener errors
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Listener already running")]
    AlreadyRunning,

    #[error("Listener not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ListenerResult<T> = Result<T, ListenerError>;

/// Events emitted by the listener
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    /// Listener started
    Started { bind_addr: SocketAddr },
    /// A new peer has connected
    PeerConnected { addr: SocketAddr },
    /// A packet was decoded
    PacketReceived { addr: SocketAddr, packet: Packet },
    /// A packet could not be decoded; the peer is dropped unless recoverable
    DecodeFailed {
        addr: SocketAddr,
        error: String,
        recoverable: bool,
    },
    /// A peer has disconnected
    PeerDisconnected { addr: SocketAddr, reason: String },
    /// Listener stopped
    Stopped,
}

/// Accepts connections and decodes what peers send
pub struct Listener {
    config: NetworkConfig,
    max_packet_size: usize,
    /// Connected peers and when they connected
    peers: Arc<RwLock<HashMap<SocketAddr, Instant>>>,
    event_tx: mpsc::Sender<ListenerEvent>,
    event_rx: Option<mpsc::Receiver<ListenerEvent>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    local_addr: Option<SocketAddr>,
}

impl Listener {
    pub fn new(config: NetworkConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            peers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            local_addr: None,
        }
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ListenerEvent>> {
        self.event_rx.take()
    }

    /// Address actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Start accepting connections
    pub async fn start(&mut self) -> ListenerResult<SocketAddr> {
        if self.is_running() {
            return Err(ListenerError::AlreadyRunning);
        }

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ListenerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        let _ = self
            .event_tx
            .send(ListenerEvent::Started {
                bind_addr: local_addr,
            })
            .await;

        let peers = self.peers.clone();
        let event_tx = self.event_tx.clone();
        let max_packet_size = self.max_packet_size;

        // Spawn the accept loop
        tokio::spawn(async move {
            let mut shutdown = shutdown_rx.clone();
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("New connection from {}", addr);

                                let peers = peers.clone();
                                let event_tx = event_tx.clone();
                                let shutdown = shutdown_rx.clone();

                                tokio::spawn(async move {
                                    handle_peer(stream, addr, max_packet_size, peers, event_tx, shutdown).await;
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Listener shutdown requested");
                        break;
                    }
                }
            }

            let _ = event_tx.send(ListenerEvent::Stopped).await;
        });

        Ok(local_addr)
    }

    /// Stop accepting and disconnect every peer
    pub async fn stop(&mut self) -> ListenerResult<()> {
        let tx = self.shutdown_tx.take().ok_or(ListenerError::NotRunning)?;
        let _ = tx.send(true);
        self.local_addr = None;
        Ok(())
    }

    /// Addresses of connected peers
    pub async fn peers(&self) -> Vec<SocketAddr> {
        let peers = self.peers.read().await;
        peers.keys().copied().collect()
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }
}

/// Decode packets from one peer until it leaves or breaks the stream
async fn handle_peer(
    stream: TcpStream,
    addr: SocketAddr,
    max_packet_size: usize,
    peers: Arc<RwLock<HashMap<SocketAddr, Instant>>>,
    event_tx: mpsc::Sender<ListenerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut conn = Connection::new(stream, addr).with_max_packet_size(max_packet_size);

    {
        let mut peers = peers.write().await;
        peers.insert(addr, Instant::now());
    }

    let _ = event_tx.send(ListenerEvent::PeerConnected { addr }).await;

    let disconnect_reason = loop {
        tokio::select! {
            result = conn.recv() => {
                match result {
                    Ok(Some(packet)) => {
                        let termination = match &packet.payload {
                            Payload::ConnectionTermination { kind } => Some(*kind),
                            _ => None,
                        };

                        let _ = event_tx.send(ListenerEvent::PacketReceived { addr, packet }).await;

                        if let Some(kind) = termination {
                            break format!("Terminated ({:?})", kind);
                        }
                    }
                    Ok(None) => {
                        break "Connection closed".to_string();
                    }
                    Err(ConnectionError::Codec(e)) => {
                        let recoverable = e.is_recoverable();
                        if recoverable {
                            tracing::warn!("Skipping bad packet from {}: {}", addr, e);
                        }
                        let _ = event_tx.send(ListenerEvent::DecodeFailed {
                            addr,
                            error: e.to_string(),
                            recoverable,
                        }).await;
                        if !recoverable {
                            break format!("Error: {}", e);
                        }
                    }
                    Err(e) => {
                        break format!("Error: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                break "Listener shutting down".to_string();
            }
        }
    };

    {
        let mut peers = peers.write().await;
        peers.remove(&addr);
    }

    tracing::info!("Peer {} disconnected: {}", addr, disconnect_reason);
    let _ = event_tx
        .send(ListenerEvent::PeerDisconnected {
            addr,
            reason: disconnect_reason,
        })
        .await;
}
