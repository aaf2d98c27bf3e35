//! Shared peer-side state: the locally owned pieces and the known peer view.
//!
//! Both are touched by the upload server, the refresh task and the download
//! loop. Each wraps its container in a single lock and only exposes
//! synchronized accessors; no guard is ever held across an `.await`.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{PeerEntry, PeerIdentity, PieceIndex, PieceSet};

/// Pieces the local agent holds in full.
///
/// Only grows: pieces are added after a successful full-size write or when
/// a seeder starts with the complete file.
#[derive(Debug)]
pub struct OwnedPieces {
    pieces: RwLock<PieceSet>,
    total_pieces: u32,
}

impl OwnedPieces {
    /// Creates an empty set for content of `total_pieces` pieces.
    pub fn empty(total_pieces: u32) -> Self {
        Self {
            pieces: RwLock::new(PieceSet::new()),
            total_pieces,
        }
    }

    /// Creates a set holding every piece.
    pub fn complete(total_pieces: u32) -> Self {
        Self {
            pieces: RwLock::new((0..total_pieces).map(PieceIndex::new).collect()),
            total_pieces,
        }
    }

    /// Records a piece as owned. Returns false when it was already owned or
    /// is out of range.
    pub fn insert(&self, index: PieceIndex) -> bool {
        if index.as_u32() >= self.total_pieces {
            return false;
        }
        self.pieces.write().insert(index)
    }

    pub fn contains(&self, index: PieceIndex) -> bool {
        self.pieces.read().contains(&index)
    }

    pub fn len(&self) -> usize {
        self.pieces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.read().is_empty()
    }

    pub fn total_pieces(&self) -> u32 {
        self.total_pieces
    }

    pub fn is_complete(&self) -> bool {
        self.len() == self.total_pieces as usize
    }

    /// Copy of the owned set, for advertising to the tracker.
    pub fn snapshot(&self) -> PieceSet {
        self.pieces.read().clone()
    }

    /// Pieces still missing, in ascending order.
    pub fn missing(&self) -> Vec<PieceIndex> {
        let pieces = self.pieces.read();
        (0..self.total_pieces)
            .map(PieceIndex::new)
            .filter(|index| !pieces.contains(index))
            .collect()
    }
}

/// Local cache of the other peers in the swarm and their advertised pieces.
///
/// Refreshed wholesale from tracker snapshots. Never contains the local
/// identity, even if the tracker reports it.
#[derive(Debug)]
pub struct KnownPeers {
    local: PeerIdentity,
    peers: RwLock<HashMap<PeerIdentity, PieceSet>>,
}

impl KnownPeers {
    pub fn new(local: PeerIdentity) -> Self {
        Self {
            local,
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn local_identity(&self) -> PeerIdentity {
        self.local
    }

    /// Replaces the view with a fresh tracker snapshot.
    ///
    /// Peers absent from the snapshot have been evicted and are dropped.
    pub fn replace(&self, entries: Vec<PeerEntry>) {
        let fresh: HashMap<PeerIdentity, PieceSet> = entries
            .into_iter()
            .filter(|entry| entry.identity != self.local)
            .map(|entry| (entry.identity, entry.pieces))
            .collect();
        let count = fresh.len();
        *self.peers.write() = fresh;
        tracing::debug!("Known peers refreshed: {} peers", count);
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Identities of all known peers, in a stable order.
    pub fn identities(&self) -> Vec<PeerIdentity> {
        let mut identities: Vec<PeerIdentity> = self.peers.read().keys().copied().collect();
        identities.sort();
        identities
    }

    /// Runs `f` over the peer map while holding the read lock for its
    /// whole duration.
    pub fn with_peers<R>(&self, f: impl FnOnce(&HashMap<PeerIdentity, PieceSet>) -> R) -> R {
        let peers = self.peers.read();
        f(&peers)
    }
}
