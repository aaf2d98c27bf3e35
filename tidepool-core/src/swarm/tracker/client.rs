//! Peer-side tracker client over UDP.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::swarm::protocol::{MAX_DATAGRAM_SIZE, UNREGISTERED_REPLY, decode_text};
use crate::swarm::{PeerIdentity, PeerList, PieceSet, SwarmError, TrackerRequest};

/// Client for one tracker, sending on behalf of one local identity.
///
/// The socket is connected to the tracker, so only its datagrams are
/// received. Request/reply exchanges are serialized so a reply is never
/// consumed by the wrong caller.
#[derive(Debug)]
pub struct TrackerClient {
    socket: UdpSocket,
    tracker: SocketAddr,
    local: PeerIdentity,
    response_timeout: Duration,
    exchange_lock: Mutex<()>,
}

impl TrackerClient {
    /// Opens a socket routed to the tracker.
    ///
    /// Without an explicit `advertised_ip` the local identity uses the
    /// address the OS routes tracker traffic from, which is also the source
    /// address the tracker records.
    ///
    /// # Errors
    ///
    /// - `SwarmError::Io` - If the socket cannot be bound or has no route to
    ///   the tracker
    pub async fn connect(
        tracker: SocketAddr,
        listen_port: u16,
        advertised_ip: Option<IpAddr>,
        response_timeout: Duration,
    ) -> Result<Self, SwarmError> {
        let bind_address: SocketAddr = match tracker {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind_address).await?;
        socket.connect(tracker).await?;

        let ip = match advertised_ip {
            Some(ip) => ip,
            None => route_ip(&socket),
        };
        let local = PeerIdentity::new(ip, listen_port);
        tracing::debug!("Tracker client for {} using identity {}", tracker, local);

        Ok(Self {
            socket,
            tracker,
            local,
            response_timeout,
            exchange_lock: Mutex::new(()),
        })
    }

    pub fn local_identity(&self) -> PeerIdentity {
        self.local
    }

    pub fn tracker_address(&self) -> SocketAddr {
        self.tracker
    }

    /// Registers with the tracker and returns the other peers.
    ///
    /// # Errors
    ///
    /// - `SwarmError::TrackerTimedOut` - If no reply arrives in time
    /// - `SwarmError::Parse` - If the reply is not a PEERLIST
    pub async fn join(&self) -> Result<PeerList, SwarmError> {
        self.exchange(TrackerRequest::Join {
            advertised_ip: self.local.ip.to_string(),
            port: self.local.port,
        })
        .await
    }

    /// Pushes the full owned piece set. The tracker does not reply.
    ///
    /// # Errors
    ///
    /// - `SwarmError::Io` - If the datagram cannot be sent
    pub async fn update(&self, pieces: &PieceSet) -> Result<(), SwarmError> {
        let request = TrackerRequest::Update {
            port: self.local.port,
            pieces: pieces.clone(),
        };
        self.socket.send(request.to_string().as_bytes()).await?;
        tracing::debug!("Sent UPDATE with {} pieces to {}", pieces.len(), self.tracker);
        Ok(())
    }

    /// Fetches the current peer list without changing tracker state.
    ///
    /// # Errors
    ///
    /// - `SwarmError::NotRegistered` - If the tracker has no record of this
    ///   peer, for example after eviction or a tracker restart
    /// - `SwarmError::TrackerTimedOut` - If no reply arrives in time
    /// - `SwarmError::Parse` - If the reply is not a PEERLIST
    pub async fn peers(&self) -> Result<PeerList, SwarmError> {
        self.exchange(TrackerRequest::Peers {
            port: self.local.port,
        })
        .await
    }

    async fn exchange(&self, request: TrackerRequest) -> Result<PeerList, SwarmError> {
        let _guard = self.exchange_lock.lock().await;
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        // Replies to earlier requests that timed out are stale
        while let Ok(len) = self.socket.try_recv(&mut buffer) {
            tracing::debug!("Discarded {} byte stale tracker reply", len);
        }

        self.socket.send(request.to_string().as_bytes()).await?;

        let len = tokio::time::timeout(self.response_timeout, self.socket.recv(&mut buffer))
            .await
            .map_err(|_| SwarmError::TrackerTimedOut {
                address: self.tracker,
            })??;

        let reply = decode_text(&buffer[..len])?;
        if reply == UNREGISTERED_REPLY {
            return Err(SwarmError::NotRegistered {
                address: self.tracker,
            });
        }
        let peers = PeerList::parse(reply)?.excluding(&self.local);
        tracing::debug!("Tracker returned {} peers", peers.len());
        Ok(peers)
    }
}

fn route_ip(socket: &UdpSocket) -> IpAddr {
    match socket.local_addr() {
        Ok(address) if !address.ip().is_unspecified() => address.ip(),
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
