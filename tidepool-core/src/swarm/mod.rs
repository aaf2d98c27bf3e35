//! Swarm protocol implementation: tracker, piece scheduling and transfers

pub mod piece_picker;
pub mod protocol;
pub mod state;
pub mod tracker;
pub mod transfer;

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

pub use piece_picker::{PiecePick, RarestFirstPicker};
pub use protocol::{ParseError, PeerList, PeerRequest, TrackerRequest};
pub use state::{KnownPeers, OwnedPieces};
pub use tracker::{PeerRegistry, TrackerClient, TrackerHandle, TrackerServer};
pub use transfer::{PieceClient, PieceServer};

use crate::storage::StorageError;

/// Zero-based index of a piece within the shared file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered set of piece indices. Ordering keeps wire renderings sorted.
pub type PieceSet = BTreeSet<PieceIndex>;

/// Network identity of a peer: the IP it is reached at plus its TCP port.
///
/// Rendered as `ip:port` and used as the key for every peer lookup on both
/// the tracker and the peer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerIdentity {
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerIdentity {
    /// Creates identity from address and TCP listening port.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Socket address for opening transfer connections.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A peer and the pieces it advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub identity: PeerIdentity,
    pub pieces: PieceSet,
}

impl PeerEntry {
    pub fn new(identity: PeerIdentity, pieces: PieceSet) -> Self {
        Self { identity, pieces }
    }

    /// Checks whether the peer advertises the piece.
    pub fn has_piece(&self, index: PieceIndex) -> bool {
        self.pieces.contains(&index)
    }
}

/// Errors that can occur during swarm operations.
///
/// Network failures here are scoped to a single tracker exchange or a single
/// (piece, peer) attempt; the coordinator backs off and retries.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("Malformed message: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error")]
    Storage(#[from] StorageError),

    #[error("Connecting to peer {peer} timed out")]
    ConnectTimedOut { peer: PeerIdentity },

    #[error("Reading from peer {peer} timed out")]
    ReadTimedOut { peer: PeerIdentity },

    #[error("Piece {index} from {peer} incomplete: received {received} of {expected} bytes")]
    IncompletePiece {
        index: PieceIndex,
        peer: PeerIdentity,
        received: usize,
        expected: usize,
    },

    #[error("Piece {index} from {peer} exceeds expected {expected} bytes")]
    OversizedPiece {
        index: PieceIndex,
        peer: PeerIdentity,
        expected: usize,
    },

    #[error("Tracker {address} did not respond in time")]
    TrackerTimedOut { address: SocketAddr },

    #[error("Tracker {address} has no record of this peer")]
    NotRegistered { address: SocketAddr },

    #[error("Unexpected response: {response}")]
    UnexpectedResponse { response: String },

    #[error("No peers available")]
    NoPeersAvailable,

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn test_peer_identity_display() {
        let identity = PeerIdentity::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 6000);
        assert_eq!(identity.to_string(), "10.0.0.2:6000");
        assert_eq!(identity.socket_addr(), "10.0.0.2:6000".parse().unwrap());
    }

    #[test]
    fn test_piece_index_ordering() {
        let piece1 = PieceIndex::new(5);
        let piece2 = PieceIndex::new(10);
        assert!(piece1 < piece2);
        assert_eq!(piece1.as_u32(), 5);
        assert_eq!(piece2.to_string(), "10");
    }

    #[test]
    fn test_peer_entry_has_piece() {
        let identity = PeerIdentity::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7000);
        let entry = PeerEntry::new(identity, [PieceIndex(1), PieceIndex(3)].into());
        assert!(entry.has_piece(PieceIndex(3)));
        assert!(!entry.has_piece(PieceIndex(2)));
    }
}
