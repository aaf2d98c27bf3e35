//! In-memory registry of swarm members kept by the tracker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::swarm::{PeerEntry, PeerIdentity, PieceSet};

#[derive(Debug, Clone)]
struct PeerRecord {
    pieces: PieceSet,
    last_seen: Instant,
}

/// Registry of peers and the pieces they advertise.
///
/// Keyed by [`PeerIdentity`], so each identity has at most one record.
/// A single mutex guards the map; the datagram handler and the eviction
/// sweep contend for it. Every method has an `_at` variant taking the
/// current instant explicitly.
#[derive(Debug)]
pub struct PeerRegistry {
    records: Mutex<HashMap<PeerIdentity, PeerRecord>>,
    timeout: Duration,
}

impl PeerRegistry {
    /// Creates registry that evicts peers idle for longer than `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers a peer, replacing any previous record for the identity
    /// with an empty piece set. Returns every other registered peer.
    pub fn join(&self, identity: PeerIdentity) -> Vec<PeerEntry> {
        self.join_at(identity, Instant::now())
    }

    pub fn join_at(&self, identity: PeerIdentity, now: Instant) -> Vec<PeerEntry> {
        let mut records = self.records.lock();
        let previous = records.insert(
            identity,
            PeerRecord {
                pieces: PieceSet::new(),
                last_seen: now,
            },
        );
        if previous.is_some() {
            tracing::debug!("Peer {} re-joined; piece set reset", identity);
        }
        Self::collect_excluding(&records, &identity)
    }

    /// Replaces the advertised piece set of a registered peer and refreshes
    /// its liveness. Returns false, leaving the registry untouched, when the
    /// identity is not registered.
    pub fn update(&self, identity: PeerIdentity, pieces: PieceSet) -> bool {
        self.update_at(identity, pieces, Instant::now())
    }

    pub fn update_at(&self, identity: PeerIdentity, pieces: PieceSet, now: Instant) -> bool {
        let mut records = self.records.lock();
        match records.get_mut(&identity) {
            Some(record) => {
                record.pieces = pieces;
                record.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Removes every peer idle for longer than the timeout and returns the
    /// evicted identities.
    pub fn sweep(&self) -> Vec<PeerIdentity> {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> Vec<PeerIdentity> {
        let mut records = self.records.lock();
        let mut evicted = Vec::new();
        records.retain(|identity, record| {
            let alive = now.saturating_duration_since(record.last_seen) <= self.timeout;
            if !alive {
                evicted.push(*identity);
            }
            alive
        });
        evicted.sort();
        evicted
    }

    /// Every registered peer except `identity`, ordered by identity.
    pub fn snapshot_excluding(&self, identity: &PeerIdentity) -> Vec<PeerEntry> {
        let records = self.records.lock();
        Self::collect_excluding(&records, identity)
    }

    pub fn contains(&self, identity: &PeerIdentity) -> bool {
        self.records.lock().contains_key(identity)
    }

    /// Pieces last advertised by the peer, if registered.
    pub fn pieces_of(&self, identity: &PeerIdentity) -> Option<PieceSet> {
        self.records
            .lock()
            .get(identity)
            .map(|record| record.pieces.clone())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn collect_excluding(
        records: &HashMap<PeerIdentity, PeerRecord>,
        identity: &PeerIdentity,
    ) -> Vec<PeerEntry> {
        let mut entries: Vec<PeerEntry> = records
            .iter()
            .filter(|(other, _)| *other != identity)
            .map(|(other, record)| PeerEntry::new(*other, record.pieces.clone()))
            .collect();
        entries.sort_by_key(|entry| entry.identity);
        entries
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    use super::*;
    use crate::swarm::PieceIndex;

    fn identity(last_octet: u8, port: u16) -> PeerIdentity {
        PeerIdentity::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), port)
    }

    fn pieces(indices: &[u32]) -> PieceSet {
        indices.iter().copied().map(PieceIndex::new).collect()
    }

    #[test]
    fn test_join_returns_other_peers() {
        let registry = PeerRegistry::new(Duration::from_secs(60));
        assert!(registry.join(identity(1, 6000)).is_empty());

        let others = registry.join(identity(2, 6000));
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].identity, identity(1, 6000));
        assert!(others[0].pieces.is_empty());
    }

    #[test]
    fn test_rejoin_keeps_single_record_and_resets_pieces() {
        let registry = PeerRegistry::new(Duration::from_secs(60));
        let peer = identity(1, 6000);
        registry.join(peer);
        assert!(registry.update(peer, pieces(&[0, 1, 2])));

        registry.join(peer);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pieces_of(&peer), Some(PieceSet::new()));
    }

    #[test]
    fn test_same_ip_different_port_are_distinct() {
        let registry = PeerRegistry::new(Duration::from_secs(60));
        registry.join(identity(1, 6000));
        registry.join(identity(1, 6001));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_update_unknown_peer_is_dropped() {
        let registry = PeerRegistry::new(Duration::from_secs(60));
        assert!(!registry.update(identity(9, 6000), pieces(&[1])));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_replaces_piece_set() {
        let registry = PeerRegistry::new(Duration::from_secs(60));
        let peer = identity(1, 6000);
        registry.join(peer);
        registry.update(peer, pieces(&[0, 1]));
        registry.update(peer, pieces(&[3]));
        assert_eq!(registry.pieces_of(&peer), Some(pieces(&[3])));
    }

    #[test]
    fn test_sweep_evicts_idle_peers() {
        let registry = PeerRegistry::new(Duration::from_secs(60));
        let start = Instant::now();
        let quiet = identity(1, 6000);
        let chatty = identity(2, 6000);
        registry.join_at(quiet, start);
        registry.join_at(chatty, start);
        registry.update_at(chatty, pieces(&[0]), start + Duration::from_secs(40));

        assert!(registry.sweep_at(start + Duration::from_secs(60)).is_empty());

        let evicted = registry.sweep_at(start + Duration::from_secs(61));
        assert_eq!(evicted, vec![quiet]);
        assert!(!registry.contains(&quiet));
        assert!(registry.contains(&chatty));

        let evicted = registry.sweep_at(start + Duration::from_secs(101));
        assert_eq!(evicted, vec![chatty]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_excluding_is_ordered() {
        let registry = PeerRegistry::new(Duration::from_secs(60));
        registry.join(identity(3, 6000));
        registry.join(identity(1, 6000));
        registry.join(identity(2, 6000));

        let snapshot = registry.snapshot_excluding(&identity(2, 6000));
        let identities: Vec<_> = snapshot.iter().map(|entry| entry.identity).collect();
        assert_eq!(identities, vec![identity(1, 6000), identity(3, 6000)]);
    }

    #[test]
    fn test_concurrent_updates_all_applied() {
        let registry = Arc::new(PeerRegistry::new(Duration::from_secs(60)));
        let peers: Vec<PeerIdentity> = (0..50).map(|i| identity(1, 6000 + i)).collect();
        for peer in &peers {
            registry.join(*peer);
        }

        let handles: Vec<_> = peers
            .iter()
            .enumerate()
            .map(|(i, peer)| {
                let registry = Arc::clone(&registry);
                let peer = *peer;
                std::thread::spawn(move || registry.update(peer, pieces(&[i as u32])))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        for (i, peer) in peers.iter().enumerate() {
            assert_eq!(registry.pieces_of(peer), Some(pieces(&[i as u32])));
        }
    }
}
