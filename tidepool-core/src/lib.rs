//! Tidepool Core - tracker-coordinated peer-to-peer file distribution
//!
//! This crate provides the building blocks of a small swarm: a UDP tracker
//! registry, rarest-first piece scheduling, TCP piece transfers, flat-file
//! piece storage and the peer lifecycle that ties them together.

pub mod config;
pub mod engine;
pub mod storage;
pub mod swarm;
pub mod tracing_setup;

use std::net::SocketAddr;

// Re-export main types for convenient access
pub use config::{SizeMismatchPolicy, TidepoolConfig};
pub use engine::{LifecycleState, PeerAgent, PeerHandle, PeerSession, Progress, Role};
pub use storage::{FileStorage, StorageError};
pub use swarm::{PeerIdentity, PieceIndex, SwarmError, TrackerHandle, TrackerServer};

/// Core errors that can bubble up from any Tidepool subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TidepoolError {
    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TidepoolError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            TidepoolError::Swarm(e) => match e {
                SwarmError::TrackerTimedOut { address } => {
                    format!("Tracker at {address} did not respond")
                }
                SwarmError::NoPeersAvailable => {
                    "No peer could report the file size; start a seeder first".to_string()
                }
                _ => "Network error occurred".to_string(),
            },
            TidepoolError::Storage(e) => match e {
                StorageError::EmptyFile { path } => {
                    format!("Cannot share empty file {}", path.display())
                }
                _ => "Storage error occurred".to_string(),
            },
            TidepoolError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            TidepoolError::Bind { address, .. } => format!("Address {address} is unavailable"),
            TidepoolError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if the error stops the process rather than a single attempt.
    ///
    /// Everything returned from startup is fatal; per-attempt network
    /// failures are only fatal when they leave nothing to retry against.
    pub fn is_fatal(&self) -> bool {
        match self {
            TidepoolError::Swarm(e) => matches!(
                e,
                SwarmError::TrackerTimedOut { .. } | SwarmError::NoPeersAvailable
            ),
            TidepoolError::Storage(_)
            | TidepoolError::Configuration { .. }
            | TidepoolError::Bind { .. } => true,
            TidepoolError::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TidepoolError>;
