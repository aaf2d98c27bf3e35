//! Piece geometry: how a file of a given size divides into pieces.

use super::StorageError;
use crate::swarm::PieceIndex;

/// Division of a file into fixed-size, index-addressed pieces.
///
/// Every piece is `piece_size` bytes except the last, which holds the
/// remainder and is never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceLayout {
    file_size: u64,
    piece_size: u64,
    total_pieces: u32,
}

impl PieceLayout {
    /// Creates layout for a file.
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidLayout` - If either size is zero or the piece
    ///   count does not fit a `u32`
    pub fn new(file_size: u64, piece_size: u64) -> Result<Self, StorageError> {
        if piece_size == 0 {
            return Err(StorageError::InvalidLayout {
                reason: "piece size must be positive".to_string(),
            });
        }
        if file_size == 0 {
            return Err(StorageError::InvalidLayout {
                reason: "file size must be positive".to_string(),
            });
        }
        let total_pieces = u32::try_from(file_size.div_ceil(piece_size)).map_err(|_| {
            StorageError::InvalidLayout {
                reason: format!("{file_size} bytes is too many pieces of {piece_size}"),
            }
        })?;

        Ok(Self {
            file_size,
            piece_size,
            total_pieces,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn piece_size(&self) -> u64 {
        self.piece_size
    }

    pub fn total_pieces(&self) -> u32 {
        self.total_pieces
    }

    /// Checks that the index addresses an existing piece.
    pub fn contains(&self, index: PieceIndex) -> bool {
        index.as_u32() < self.total_pieces
    }

    /// Byte offset at which the piece begins.
    pub fn offset(&self, index: PieceIndex) -> u64 {
        u64::from(index.as_u32()) * self.piece_size
    }

    /// Exact payload length of the piece, or `None` past the last piece.
    pub fn expected_size(&self, index: PieceIndex) -> Option<u64> {
        if !self.contains(index) {
            return None;
        }
        if index.as_u32() + 1 == self.total_pieces {
            Some(self.file_size - self.offset(index))
        } else {
            Some(self.piece_size)
        }
    }

    /// Same as [`expected_size`](Self::expected_size) but as an error.
    ///
    /// # Errors
    ///
    /// - `StorageError::PieceOutOfRange` - If the index is past the last piece
    pub fn checked_size(&self, index: PieceIndex) -> Result<u64, StorageError> {
        self.expected_size(index)
            .ok_or(StorageError::PieceOutOfRange {
                index,
                total: self.total_pieces,
            })
    }

    /// Every piece index in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = PieceIndex> + use<> {
        (0..self.total_pieces).map(PieceIndex::new)
    }
}
