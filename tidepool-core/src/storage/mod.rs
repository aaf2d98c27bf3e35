//! Storage layer for shared file data.
//!
//! Maps piece indices onto byte ranges of a single backing file. The upload
//! path reads through [`PieceStore`]; the download path writes through it.

pub mod file_storage;
pub mod layout;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;

use std::path::PathBuf;

use async_trait::async_trait;
pub use file_storage::FileStorage;
pub use layout::PieceLayout;

use crate::swarm::PieceIndex;

/// Abstract interface for piece storage and retrieval.
///
/// Each call is a self-contained, offset-bounded operation, so concurrent
/// reads and writes of different pieces need no file-level lock.
#[async_trait]
pub trait PieceStore: Send + Sync {
    /// Piece geometry of the backing content.
    fn layout(&self) -> PieceLayout;

    /// Reads the full payload of a piece.
    ///
    /// # Errors
    ///
    /// - `StorageError::PieceOutOfRange` - If the index is past the last piece
    /// - `StorageError::ShortRead` - If the backing file ends early
    /// - `StorageError::Io` - If file system operation failed
    async fn read_piece(&self, index: PieceIndex) -> Result<Vec<u8>, StorageError>;

    /// Writes the full payload of a piece in place.
    ///
    /// # Errors
    ///
    /// - `StorageError::PieceOutOfRange` - If the index is past the last piece
    /// - `StorageError::SizeMismatch` - If the payload is not exactly the piece size
    /// - `StorageError::Io` - If file system operation failed
    async fn write_piece(&self, index: PieceIndex, piece_bytes: &[u8]) -> Result<(), StorageError>;
}

/// Errors that occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Index is not within `[0, total_pieces)`
    #[error("Piece {index} out of range (total {total})")]
    PieceOutOfRange { index: PieceIndex, total: u32 },

    /// Payload length differs from the piece's expected size
    #[error("Piece {index} has {actual} bytes, expected {expected}")]
    SizeMismatch {
        index: PieceIndex,
        expected: u64,
        actual: u64,
    },

    /// Backing file ended before the piece was fully read
    #[error("Short read for piece {index}: expected {expected} bytes")]
    ShortRead { index: PieceIndex, expected: u64 },

    /// Content to share is empty
    #[error("File {path} is empty")]
    EmptyFile { path: PathBuf },

    /// Piece geometry cannot be derived
    #[error("Invalid piece layout: {reason}")]
    InvalidLayout { reason: String },

    /// Standard I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
