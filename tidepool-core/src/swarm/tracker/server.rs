//! UDP tracker service: datagram dispatch plus periodic eviction.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::PeerRegistry;
use crate::config::TrackerConfig;
use crate::swarm::protocol::{MAX_DATAGRAM_SIZE, UNREGISTERED_REPLY, decode_text};
use crate::swarm::{PeerIdentity, PeerList, TrackerRequest};
use crate::{Result, TidepoolError};

/// Tracker request handler bound to a registry.
///
/// Stateless apart from the registry, so datagram handling can be driven
/// directly in tests without a socket.
#[derive(Debug, Clone)]
pub struct TrackerServer {
    registry: Arc<PeerRegistry>,
}

impl TrackerServer {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    /// Binds the UDP socket and spawns the receive and sweep tasks.
    ///
    /// # Errors
    ///
    /// - `TidepoolError::Bind` - If the configured address cannot be bound
    pub async fn start(config: &TrackerConfig) -> Result<TrackerHandle> {
        let socket = UdpSocket::bind(config.bind_address)
            .await
            .map_err(|source| TidepoolError::Bind {
                address: config.bind_address,
                source,
            })?;
        let local_addr = socket.local_addr()?;

        let registry = Arc::new(PeerRegistry::new(config.peer_timeout));
        let server = Self::new(Arc::clone(&registry));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = JoinSet::new();
        tasks.spawn(server.run_receive_loop(socket, shutdown_rx.clone()));
        tasks.spawn(Self::run_sweep_loop(
            Arc::clone(&registry),
            config.sweep_interval(),
            shutdown_rx,
        ));

        tracing::info!(
            "Tracker listening on {} (peer timeout {:?})",
            local_addr,
            config.peer_timeout
        );

        Ok(TrackerHandle {
            local_addr,
            registry,
            shutdown_tx,
            tasks,
        })
    }

    /// Processes one datagram and returns the reply to send, if any.
    ///
    /// The peer's IP is taken from the datagram source; the IP token of a
    /// JOIN is only informational. Malformed datagrams and UPDATEs from
    /// unregistered peers are logged and dropped; a PEERS query from an
    /// unregistered peer is answered with `UNREGISTERED` so it can re-JOIN.
    pub fn handle_datagram(&self, data: &[u8], source: SocketAddr) -> Option<String> {
        let request = match decode_text(data).and_then(TrackerRequest::parse) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Dropping datagram from {}: {}", source, e);
                return None;
            }
        };
        let identity = PeerIdentity::new(source.ip().to_canonical(), request.port());

        match request {
            TrackerRequest::Join { advertised_ip, .. } => {
                if advertised_ip != identity.ip.to_string() {
                    tracing::debug!(
                        "Peer {} advertised address {}; using source address",
                        identity,
                        advertised_ip
                    );
                }
                let others = self.registry.join(identity);
                tracing::info!("Peer {} joined ({} other peers)", identity, others.len());
                Some(PeerList::new(others).to_string())
            }
            TrackerRequest::Update { pieces, .. } => {
                let count = pieces.len();
                if self.registry.update(identity, pieces) {
                    tracing::debug!("Peer {} now advertises {} pieces", identity, count);
                } else {
                    tracing::warn!("Dropping UPDATE from unregistered peer {}", identity);
                }
                None
            }
            TrackerRequest::Peers { .. } => {
                if !self.registry.contains(&identity) {
                    tracing::warn!("Peer list requested by unregistered peer {}", identity);
                    return Some(UNREGISTERED_REPLY.to_string());
                }
                let others = self.registry.snapshot_excluding(&identity);
                tracing::debug!("Peer {} requested peer list ({} peers)", identity, others.len());
                Some(PeerList::new(others).to_string())
            }
        }
    }

    async fn run_receive_loop(self, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = socket.recv_from(&mut buffer) => {
                    let (len, source) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            tracing::warn!("Tracker receive failed: {}", e);
                            continue;
                        }
                    };
                    let Some(reply) = self.handle_datagram(&buffer[..len], source) else {
                        continue;
                    };
                    if reply.len() > MAX_DATAGRAM_SIZE {
                        tracing::warn!(
                            "Reply to {} is {} bytes, over the datagram limit; not sent",
                            source,
                            reply.len()
                        );
                        continue;
                    }
                    if let Err(e) = socket.send_to(reply.as_bytes(), source).await {
                        tracing::warn!("Failed to reply to {}: {}", source, e);
                    }
                }
            }
        }
        tracing::debug!("Tracker receive loop stopped");
    }

    async fn run_sweep_loop(
        registry: Arc<PeerRegistry>,
        period: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    for identity in registry.sweep() {
                        tracing::info!("Evicted idle peer {}", identity);
                    }
                }
            }
        }
        tracing::debug!("Tracker sweep loop stopped");
    }
}

/// Handle to a running tracker.
#[derive(Debug)]
pub struct TrackerHandle {
    local_addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    shutdown_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl TrackerHandle {
    /// Address the tracker socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Signals both tasks to stop and waits for them.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Tracker task failed: {}", e);
            }
        }
        tracing::info!("Tracker on {} stopped", self.local_addr);
    }
}
