//! Piece selection for swarm downloads.
//!
//! Rarest-first: the needed piece advertised by the fewest known peers is
//! fetched next, so rare pieces spread before their holders leave. Ties are
//! broken at random so independent peers do not all converge on the same
//! piece, and the source peer is drawn at random among its holders to
//! spread upload load.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::state::{KnownPeers, OwnedPieces};
use super::{PeerIdentity, PieceIndex, PieceSet};

/// Outcome of one scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiecePick {
    /// Every piece is owned.
    Complete,
    /// The rarest needed piece has no known holder; back off and retry.
    Unavailable { piece: PieceIndex },
    /// Fetch `piece` from `peer`.
    Selected { piece: PieceIndex, peer: PeerIdentity },
}

/// Rarest-first piece picker with randomized tiebreaks.
///
/// Holds no swarm state of its own; every decision reads the owned set and
/// the known peer view fresh, so it can be called repeatedly with no side
/// effects beyond advancing its RNG.
pub struct RarestFirstPicker {
    rng: Mutex<ChaCha8Rng>,
}

impl RarestFirstPicker {
    /// Creates picker; a seed makes every decision reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Number of peers advertising each piece, indexed by piece.
    ///
    /// Indices outside `[0, total_pieces)` are ignored. An empty view gives
    /// zero rarity everywhere.
    pub fn rarity_table(peers: &HashMap<PeerIdentity, PieceSet>, total_pieces: u32) -> Vec<u32> {
        let mut table = vec![0u32; total_pieces as usize];
        for pieces in peers.values() {
            for piece in pieces {
                if let Some(count) = table.get_mut(piece.as_u32() as usize) {
                    *count += 1;
                }
            }
        }
        table
    }

    /// Chooses the next piece to download and the peer to fetch it from.
    pub fn choose_next(&self, owned: &OwnedPieces, known: &KnownPeers) -> PiecePick {
        let needed = owned.missing();
        if needed.is_empty() {
            return PiecePick::Complete;
        }

        known.with_peers(|peers| self.pick(needed, peers, owned.total_pieces()))
    }

    fn pick(
        &self,
        mut needed: Vec<PieceIndex>,
        peers: &HashMap<PeerIdentity, PieceSet>,
        total_pieces: u32,
    ) -> PiecePick {
        let rarity = Self::rarity_table(peers, total_pieces);
        let mut rng = self.rng.lock();

        needed.sort_by_cached_key(|piece| (rarity[piece.as_u32() as usize], rng.random::<u64>()));
        let piece = needed[0];

        let mut holders: Vec<PeerIdentity> = peers
            .iter()
            .filter(|(_, pieces)| pieces.contains(&piece))
            .map(|(identity, _)| *identity)
            .collect();

        if holders.is_empty() {
            tracing::warn!(
                "No known peer holds rarest needed piece {} ({} peers known)",
                piece,
                peers.len()
            );
            return PiecePick::Unavailable { piece };
        }

        // HashMap order is arbitrary; sort so seeded runs are reproducible
        holders.sort();
        let peer = holders[rng.random_range(0..holders.len())];

        tracing::debug!(
            "Chose piece {} (rarity {}) from peer {} among {} holders",
            piece,
            rarity[piece.as_u32() as usize],
            peer,
            holders.len()
        );
        PiecePick::Selected { piece, peer }
    }
}
