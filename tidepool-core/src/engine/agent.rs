//! Peer agent: wires storage, tracker, scheduler and transfers together and
//! drives one peer through its lifecycle.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::handle::PeerHandle;
use super::session::{PeerSession, Role};
use super::state::{LifecycleState, Progress};
use crate::config::TidepoolConfig;
use crate::storage::{FileStorage, PieceStore};
use crate::swarm::{
    KnownPeers, OwnedPieces, PeerIdentity, PieceClient, PieceIndex, PiecePick, PieceServer,
    RarestFirstPicker, SwarmError, TrackerClient,
};
use crate::{Result, TidepoolError};

/// Shared state of one running peer.
///
/// Owned behind an `Arc` by the upload, refresh and download tasks and by
/// the [`PeerHandle`].
pub struct PeerAgent {
    session: PeerSession,
    config: TidepoolConfig,
    store: Arc<FileStorage>,
    owned: Arc<OwnedPieces>,
    known: KnownPeers,
    tracker: TrackerClient,
    picker: RarestFirstPicker,
    pieces: PieceClient,
    state: watch::Sender<LifecycleState>,
    shutdown: watch::Sender<bool>,
    seeded: AtomicBool,
}

impl PeerAgent {
    /// Brings a peer up and returns once it is downloading or seeding.
    ///
    /// Binds the upload listener, registers with the tracker, opens or
    /// preallocates storage and spawns the background tasks.
    ///
    /// # Errors
    ///
    /// - `TidepoolError::Bind` - If the listen port is unavailable
    /// - `TidepoolError::Storage` - If the seed file is empty or unreadable,
    ///   or the download file cannot be preallocated
    /// - `TidepoolError::Swarm` - If the tracker does not answer JOIN, or no
    ///   known peer reports the file size
    pub async fn start(session: PeerSession, config: TidepoolConfig) -> Result<PeerHandle> {
        match Self::bring_up(session, config).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                tracing::error!("Peer failed to start: {}", e);
                Err(e)
            }
        }
    }

    async fn bring_up(session: PeerSession, config: TidepoolConfig) -> Result<PeerHandle> {
        let (state, _) = watch::channel(LifecycleState::Initializing);
        let role = session.role();

        let bind_address: SocketAddr = match session.tracker_address {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, session.listen_port).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, session.listen_port).into(),
        };
        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|source| TidepoolError::Bind {
                address: bind_address,
                source,
            })?;
        let listen_port = listener.local_addr()?.port();

        let seed_store = match role {
            Role::Seeder => Some(
                FileStorage::open_complete(&session.target_path, config.storage.piece_size).await?,
            ),
            Role::Leecher => None,
        };

        state.send_replace(LifecycleState::Registering);
        let tracker = TrackerClient::connect(
            session.tracker_address,
            listen_port,
            session.advertised_ip,
            config.network.tracker_response_timeout,
        )
        .await?;
        let known = KnownPeers::new(tracker.local_identity());
        let peers = tracker.join().await?;
        tracing::info!(
            "Joined tracker {} as {} ({}, {} peers)",
            session.tracker_address,
            tracker.local_identity(),
            role,
            peers.len()
        );
        known.replace(peers.entries);

        let pieces = PieceClient::new(
            config.network.request_timeout,
            config.scheduler.size_mismatch_policy,
        );
        let (store, owned) = match seed_store {
            Some(store) => {
                let total = store.layout().total_pieces();
                (store, OwnedPieces::complete(total))
            }
            None => {
                let file_size = discover_file_size(&pieces, &known).await?;
                let store = FileStorage::create_download(
                    &session.target_path,
                    file_size,
                    config.storage.piece_size,
                    config.storage.temp_file_suffix,
                )
                .await?;
                let total = store.layout().total_pieces();
                (store, OwnedPieces::empty(total))
            }
        };
        tracker.update(&owned.snapshot()).await?;

        let store = Arc::new(store);
        let owned = Arc::new(owned);
        let layout = store.layout();
        tracing::info!(
            "Sharing {} ({} bytes, {} pieces of {} bytes)",
            session.target_path.display(),
            layout.file_size(),
            layout.total_pieces(),
            layout.piece_size()
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let agent = Arc::new(Self {
            picker: RarestFirstPicker::new(config.scheduler.deterministic_seed),
            session,
            store: Arc::clone(&store),
            owned: Arc::clone(&owned),
            known,
            tracker,
            pieces,
            state,
            shutdown,
            seeded: AtomicBool::new(false),
            config,
        });

        let mut tasks = JoinSet::new();

        let server = Arc::new(PieceServer::new(
            store,
            owned,
            agent.config.network.request_timeout,
            agent.config.network.max_upload_connections,
        ));
        tasks.spawn(server.run(listener, shutdown_rx.clone()));
        tasks.spawn(Arc::clone(&agent).run_refresh(shutdown_rx.clone()));

        if agent.owned.is_complete() {
            agent.transition(LifecycleState::Seeding);
        } else {
            agent.transition(LifecycleState::Downloading);
            tasks.spawn(Arc::clone(&agent).run_download(shutdown_rx));
        }

        Ok(PeerHandle::new(agent, tasks))
    }

    pub fn local_identity(&self) -> PeerIdentity {
        self.known.local_identity()
    }

    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Owned and total piece counts.
    ///
    /// The role turns to seeder with the transition to `Seeding`, not when
    /// the last piece arrives, so it never disagrees with [`state`](Self::state).
    pub fn progress(&self) -> Progress {
        let role = if self.seeded.load(Ordering::Acquire) {
            Role::Seeder
        } else {
            Role::Leecher
        };
        Progress {
            owned: self.owned.len(),
            total: self.owned.total_pieces(),
            role,
        }
    }

    /// Peers currently known from the tracker, excluding this agent.
    pub fn known_peers(&self) -> Vec<PeerIdentity> {
        self.known.identities()
    }

    /// Moves the lifecycle forward. Requests to move backwards are ignored.
    pub(super) fn transition(&self, next: LifecycleState) {
        let mut previous = next;
        let moved = self.state.send_if_modified(|current| {
            previous = *current;
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
        if !moved {
            return;
        }
        if next == LifecycleState::Seeding {
            self.seeded.store(true, Ordering::Release);
        }
        tracing::info!("Peer {}: {} -> {}", self.local_identity(), previous, next);
    }

    /// Enters `ShuttingDown` and signals every background task to stop.
    pub(super) fn shut_down(&self) {
        self.transition(LifecycleState::ShuttingDown);
        self.shutdown.send_replace(true);
    }

    // Shutdown is only observed between attempts. A fetch in progress runs
    // to completion or to its own deadline.
    async fn run_download(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let backoff = match self.picker.choose_next(&self.owned, &self.known) {
                PiecePick::Complete => {
                    self.complete().await;
                    return;
                }
                PiecePick::Unavailable { piece } => {
                    tracing::debug!("Piece {} has no known holder; refreshing peers", piece);
                    self.refresh_peers().await;
                    Some(self.config.scheduler.starvation_backoff)
                }
                PiecePick::Selected { piece, peer } => {
                    match self.download_piece(piece, peer).await {
                        Ok(()) => None,
                        Err(e) => {
                            tracing::warn!("Failed to fetch piece {} from {}: {}", piece, peer, e);
                            Some(self.config.scheduler.failure_backoff)
                        }
                    }
                }
            };

            if let Some(delay) = backoff {
                if wait_or_shutdown(delay, &mut shutdown).await {
                    return;
                }
            }
        }
    }

    async fn download_piece(
        &self,
        piece: PieceIndex,
        peer: PeerIdentity,
    ) -> std::result::Result<(), SwarmError> {
        let expected = self.store.layout().checked_size(piece)?;
        let payload = self.pieces.fetch_piece(peer, piece, expected as usize).await?;
        self.store.write_piece(piece, &payload).await?;

        if self.owned.insert(piece) {
            tracing::info!(
                "Downloaded piece {} from {} ({}/{})",
                piece,
                peer,
                self.owned.len(),
                self.owned.total_pieces()
            );
        }
        self.push_update().await;
        Ok(())
    }

    async fn complete(&self) {
        match self.store.finalize().await {
            Ok(path) => {
                tracing::info!("Download complete: {}", path.display());
                self.transition(LifecycleState::Seeding);
                self.push_update().await;
            }
            Err(e) => {
                tracing::error!(
                    "All pieces downloaded but {} could not be finalized: {}",
                    self.store.final_path().display(),
                    e
                );
                self.shut_down();
            }
        }
    }

    async fn run_refresh(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.network.update_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.push_update().await;
                    self.refresh_peers().await;
                }
            }
        }
        tracing::debug!("Refresh task stopped");
    }

    async fn push_update(&self) {
        if let Err(e) = self.tracker.update(&self.owned.snapshot()).await {
            tracing::warn!("Failed to send UPDATE to tracker: {}", e);
        }
    }

    async fn refresh_peers(&self) {
        match self.tracker.peers().await {
            Ok(peers) => self.known.replace(peers.entries),
            Err(SwarmError::NotRegistered { address }) => {
                tracing::warn!("Tracker {} lost our registration; joining again", address);
                self.rejoin().await;
            }
            Err(e) => tracing::warn!("Failed to refresh peer list: {}", e),
        }
    }

    /// JOIN resets the tracker's record, so the owned set follows at once.
    async fn rejoin(&self) {
        match self.tracker.join().await {
            Ok(peers) => {
                self.known.replace(peers.entries);
                self.push_update().await;
            }
            Err(e) => tracing::warn!("Failed to re-join tracker: {}", e),
        }
    }
}

/// Asks known peers for the file size, one at a time, until one answers.
async fn discover_file_size(
    pieces: &PieceClient,
    known: &KnownPeers,
) -> std::result::Result<u64, SwarmError> {
    for peer in known.identities() {
        match pieces.query_size(peer).await {
            Ok(size) => {
                tracing::info!("Peer {} reports file size {} bytes", peer, size);
                return Ok(size);
            }
            Err(e) => tracing::warn!("Size query to {} failed: {}", peer, e),
        }
    }
    Err(SwarmError::NoPeersAvailable)
}

/// Sleeps for `delay`; returns true if shutdown was signalled first.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
    }
}
