//! CLI command implementations

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;
use tidepool_core::{
    LifecycleState, PeerAgent, PeerSession, SizeMismatchPolicy, TidepoolConfig, TidepoolError,
    TrackerServer,
};

/// Interval between progress lines while downloading.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the swarm tracker
    Tracker {
        /// UDP address to listen on
        #[arg(long, default_value = "0.0.0.0:10000")]
        bind: SocketAddr,
        /// Seconds of silence before a peer is evicted
        #[arg(long)]
        peer_timeout: Option<u64>,
    },
    /// Run a peer: seeds the target if it exists, otherwise downloads it
    Peer {
        /// Shared file path
        target: PathBuf,
        /// Tracker address as host:port
        #[arg(long)]
        tracker: String,
        /// TCP port for uploads; 0 picks a free port
        #[arg(long, default_value_t = 0)]
        listen_port: u16,
        /// Address to advertise instead of the detected one
        #[arg(long)]
        advertise_ip: Option<IpAddr>,
        /// Piece size in bytes; must match the rest of the swarm
        #[arg(long)]
        piece_size: Option<u64>,
        /// Handling of peers that send oversized pieces
        #[arg(long, value_enum)]
        size_mismatch: Option<SizeMismatchPolicy>,
        /// Maximum concurrent uploads
        #[arg(long)]
        max_uploads: Option<usize>,
    },
}

impl Commands {
    /// Name for this run's log file.
    pub fn run_name(&self) -> String {
        match self {
            Commands::Tracker { bind, .. } => format!("tracker-{}", bind.port()),
            Commands::Peer { listen_port, .. } => format!("peer-{listen_port}"),
        }
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns the startup failure of the tracker or peer, with a user-facing
/// message as its outermost context.
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Tracker { bind, peer_timeout } => run_tracker(bind, peer_timeout).await,
        Commands::Peer {
            target,
            tracker,
            listen_port,
            advertise_ip,
            piece_size,
            size_mismatch,
            max_uploads,
        } => {
            let mut config = TidepoolConfig::from_env();
            if let Some(piece_size) = piece_size {
                config.storage.piece_size = piece_size;
            }
            if let Some(policy) = size_mismatch {
                config.scheduler.size_mismatch_policy = policy;
            }
            if let Some(max_uploads) = max_uploads {
                config.network.max_upload_connections = max_uploads;
            }
            run_peer(target, &tracker, listen_port, advertise_ip, config).await
        }
    }
}

/// Run the tracker until Ctrl-C.
///
/// # Errors
/// - `TidepoolError::Bind` - The UDP address is unavailable
pub async fn run_tracker(bind: SocketAddr, peer_timeout: Option<u64>) -> anyhow::Result<()> {
    let mut config = TidepoolConfig::from_env();
    config.tracker.bind_address = bind;
    if let Some(seconds) = peer_timeout {
        config.tracker.peer_timeout = Duration::from_secs(seconds);
    }

    let handle = TrackerServer::start(&config.tracker)
        .await
        .map_err(report)?;
    println!("Tracker listening on {}", handle.local_addr());
    println!("  Peers are evicted after {:?} of silence", config.tracker.peer_timeout);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    let registered = handle.registry().len();
    handle.stop().await;
    println!("Tracker stopped with {registered} registered peers");
    Ok(())
}

/// Run a peer until Ctrl-C, printing progress while downloading.
///
/// # Errors
/// - `TidepoolError::Configuration` - The tracker address or piece size is invalid
/// - Any startup failure from [`PeerAgent::start`]
pub async fn run_peer(
    target: PathBuf,
    tracker: &str,
    listen_port: u16,
    advertise_ip: Option<IpAddr>,
    config: TidepoolConfig,
) -> anyhow::Result<()> {
    if config.storage.piece_size == 0 {
        return Err(report(TidepoolError::Configuration {
            reason: "piece size must be positive".to_string(),
        }));
    }
    let tracker_address = resolve_tracker(tracker).await.map_err(report)?;

    let mut session = PeerSession::new(&target, tracker_address, listen_port);
    if let Some(ip) = advertise_ip {
        session = session.with_advertised_ip(ip);
    }

    let handle = PeerAgent::start(session, config).await.map_err(report)?;
    println!("Peer {} sharing {}", handle.local_identity(), target.display());
    println!("  {}", handle.progress());

    let mut states = handle.subscribe();
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let mut failed = false;
    loop {
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => {
                interrupted.context("failed to listen for Ctrl-C")?;
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                if state == LifecycleState::Seeding {
                    println!("Download complete, now seeding: {}", handle.progress());
                } else if state >= LifecycleState::ShuttingDown {
                    failed = true;
                    break;
                }
            }
            _ = ticker.tick() => {
                if handle.state() == LifecycleState::Downloading {
                    println!("  {}", handle.progress());
                }
            }
        }
    }

    let progress = handle.progress();
    handle.stop().await;
    println!("Stopped at {progress}");
    if failed {
        anyhow::bail!("peer shut down after a fatal error; see the log for details");
    }
    Ok(())
}

async fn resolve_tracker(tracker: &str) -> Result<SocketAddr, TidepoolError> {
    let invalid = |detail: String| TidepoolError::Configuration {
        reason: format!("tracker address '{tracker}' {detail}"),
    };
    let mut addresses = tokio::net::lookup_host(tracker)
        .await
        .map_err(|e| invalid(format!("cannot be resolved: {e}")))?;
    let address = addresses
        .next()
        .ok_or_else(|| invalid("resolved to no addresses".to_string()))?;
    tracing::debug!("Resolved tracker {} to {}", tracker, address);
    Ok(address)
}

fn report(error: TidepoolError) -> anyhow::Error {
    let message = error.user_message();
    anyhow::Error::new(error).context(message)
}
