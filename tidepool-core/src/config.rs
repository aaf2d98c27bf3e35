//! Centralized configuration for Tidepool.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Central configuration for all Tidepool components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct TidepoolConfig {
    pub tracker: TrackerConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
}

/// Tracker service configuration.
///
/// Controls where the tracker listens and how long an idle peer survives
/// before it is evicted from the registry.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// UDP address the tracker binds to
    pub bind_address: SocketAddr,
    /// Idle time after which a peer record is evicted
    pub peer_timeout: Duration,
}

impl TrackerConfig {
    /// Period of the eviction sweep, half the peer timeout.
    pub fn sweep_interval(&self) -> Duration {
        self.peer_timeout / 2
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 10000)),
            peer_timeout: Duration::from_secs(60),
        }
    }
}

/// Peer network communication configuration.
///
/// Controls tracker refresh cadence, per-operation deadlines and the
/// upload concurrency limit.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Interval between periodic UPDATE pushes to the tracker
    pub update_interval: Duration,
    /// Deadline for connecting to a peer and for each read on a transfer
    pub request_timeout: Duration,
    /// Deadline for the tracker's reply to JOIN and PEERS
    pub tracker_response_timeout: Duration,
    /// Maximum concurrent upload connections served
    pub max_upload_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            tracker_response_timeout: Duration::from_secs(5),
            max_upload_connections: 5,
        }
    }
}

/// File storage configuration.
///
/// Controls piece geometry and the naming of in-progress downloads.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Size of every piece except possibly the last
    pub piece_size: u64,
    /// Suffix appended to the target path while a download is incomplete
    pub temp_file_suffix: &'static str,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            piece_size: 100 * 1024, // 100 KiB
            temp_file_suffix: ".incomplete",
        }
    }
}

/// How a download treats a peer that sends more bytes than the piece holds.
///
/// Short payloads are always failures regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SizeMismatchPolicy {
    /// Fail the attempt and retry elsewhere
    #[default]
    Reject,
    /// Keep the expected prefix and drop the surplus
    Truncate,
}

/// Download scheduling configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wait after a failed (piece, peer) attempt
    pub failure_backoff: Duration,
    /// Wait when no known peer holds the rarest needed piece
    pub starvation_backoff: Duration,
    /// Seed for the tiebreak RNG; random when unset
    pub deterministic_seed: Option<u64>,
    /// Handling of oversized piece payloads
    pub size_mismatch_policy: SizeMismatchPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failure_backoff: Duration::from_secs(5),
            starvation_backoff: Duration::from_secs(10),
            deterministic_seed: None,
            size_mismatch_policy: SizeMismatchPolicy::Reject,
        }
    }
}

impl TidepoolConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(timeout) = std::env::var("TIDEPOOL_PEER_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.tracker.peer_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(interval) = std::env::var("TIDEPOOL_UPDATE_INTERVAL") {
            if let Ok(seconds) = interval.parse::<u64>() {
                config.network.update_interval = Duration::from_secs(seconds);
            }
        }

        if let Ok(max_uploads) = std::env::var("TIDEPOOL_MAX_UPLOADS") {
            if let Ok(count) = max_uploads.parse::<usize>() {
                config.network.max_upload_connections = count;
            }
        }

        if let Ok(piece_size) = std::env::var("TIDEPOOL_PIECE_SIZE") {
            if let Ok(bytes) = piece_size.parse::<u64>() {
                if bytes > 0 {
                    config.storage.piece_size = bytes;
                }
            }
        }

        if let Ok(seed) = std::env::var("TIDEPOOL_SEED") {
            if let Ok(seed_value) = seed.parse::<u64>() {
                config.scheduler.deterministic_seed = Some(seed_value);
            }
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Small pieces, short deadlines and a fixed RNG seed so swarms on
    /// localhost converge in well under a second.
    pub fn for_testing() -> Self {
        Self {
            tracker: TrackerConfig {
                bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
                peer_timeout: Duration::from_secs(5),
            },
            network: NetworkConfig {
                update_interval: Duration::from_millis(200),
                request_timeout: Duration::from_secs(2),
                tracker_response_timeout: Duration::from_millis(500),
                max_upload_connections: 8,
            },
            storage: StorageConfig {
                piece_size: 1024,
                temp_file_suffix: ".incomplete",
            },
            scheduler: SchedulerConfig {
                failure_backoff: Duration::from_millis(50),
                starvation_backoff: Duration::from_millis(100),
                deterministic_seed: Some(42),
                size_mismatch_policy: SizeMismatchPolicy::Reject,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = TidepoolConfig::default();

        assert_eq!(config.storage.piece_size, 102_400);
        assert_eq!(config.storage.temp_file_suffix, ".incomplete");
        assert_eq!(config.tracker.peer_timeout, Duration::from_secs(60));
        assert_eq!(config.tracker.bind_address.port(), 10000);
        assert_eq!(config.network.update_interval, Duration::from_secs(30));
        assert_eq!(config.network.request_timeout, Duration::from_secs(60));
        assert_eq!(config.network.max_upload_connections, 5);
        assert_eq!(config.scheduler.failure_backoff, Duration::from_secs(5));
        assert_eq!(config.scheduler.starvation_backoff, Duration::from_secs(10));
        assert_eq!(
            config.scheduler.size_mismatch_policy,
            SizeMismatchPolicy::Reject
        );
        assert!(config.scheduler.deterministic_seed.is_none());
    }

    #[test]
    fn test_sweep_runs_at_half_timeout() {
        let config = TrackerConfig {
            peer_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_testing_preset() {
        let config = TidepoolConfig::for_testing();
        assert_eq!(config.scheduler.deterministic_seed, Some(42));
        assert!(config.network.request_timeout < Duration::from_secs(60));
        assert_eq!(config.tracker.bind_address.port(), 0);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("TIDEPOOL_PEER_TIMEOUT", "90");
            std::env::set_var("TIDEPOOL_UPDATE_INTERVAL", "10");
            std::env::set_var("TIDEPOOL_MAX_UPLOADS", "12");
            std::env::set_var("TIDEPOOL_PIECE_SIZE", "4096");
            std::env::set_var("TIDEPOOL_SEED", "12345");
        }

        let config = TidepoolConfig::from_env();

        assert_eq!(config.tracker.peer_timeout, Duration::from_secs(90));
        assert_eq!(config.network.update_interval, Duration::from_secs(10));
        assert_eq!(config.network.max_upload_connections, 12);
        assert_eq!(config.storage.piece_size, 4096);
        assert_eq!(config.scheduler.deterministic_seed, Some(12345));

        // Cleanup
        unsafe {
            std::env::remove_var("TIDEPOOL_PEER_TIMEOUT");
            std::env::remove_var("TIDEPOOL_UPDATE_INTERVAL");
            std::env::remove_var("TIDEPOOL_MAX_UPLOADS");
            std::env::remove_var("TIDEPOOL_PIECE_SIZE");
            std::env::remove_var("TIDEPOOL_SEED");
        }
    }
}
