//! End-to-end tests for a swarm running on localhost.
//!
//! These tests start a real tracker and real peer agents through the public
//! API and verify that files propagate intact, that startup failures are
//! reported, and that the tracker keeps its registry consistent under load.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tidepool_core::swarm::{PeerIdentity, PieceIndex, PieceSet, TrackerClient};
use tidepool_core::{
    LifecycleState, PeerAgent, PeerHandle, PeerSession, Role, StorageError, SwarmError,
    TidepoolConfig, TidepoolError, TrackerHandle, TrackerServer,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(20);

/// Deterministic content whose pieces all differ.
fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 1024) % 251) as u8).collect()
}

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Test fixture owning a tracker and scratch directories for its peers.
struct SwarmFixture {
    config: TidepoolConfig,
    tracker: TrackerHandle,
    dirs: Vec<TempDir>,
}

impl SwarmFixture {
    async fn new() -> Self {
        Self::with_config(TidepoolConfig::for_testing()).await
    }

    async fn with_config(config: TidepoolConfig) -> Self {
        let tracker = TrackerServer::start(&config.tracker).await.unwrap();
        Self {
            config,
            tracker,
            dirs: Vec::new(),
        }
    }

    /// Fresh directory and the target path inside it.
    fn target(&mut self, name: &str) -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        self.dirs.push(dir);
        path
    }

    fn session(&self, target: &Path) -> PeerSession {
        PeerSession::new(target, self.tracker.local_addr(), 0).with_advertised_ip(localhost())
    }

    async fn start_seeder(&mut self, data: &[u8]) -> (PeerHandle, PathBuf) {
        let path = self.target("shared.bin");
        std::fs::write(&path, data).unwrap();
        let handle = PeerAgent::start(self.session(&path), self.config.clone())
            .await
            .unwrap();
        (handle, path)
    }

    async fn start_leecher(&mut self) -> (PeerHandle, PathBuf) {
        let path = self.target("downloaded.bin");
        let handle = PeerAgent::start(self.session(&path), self.config.clone())
            .await
            .unwrap();
        (handle, path)
    }
}

/// Hand-driven peer serving a 2048 byte file whose pieces arrive in two
/// halves separated by a pause.
struct SlowPeer {
    port: u16,
    /// Signalled after the first half of a piece is written.
    halfway: mpsc::UnboundedReceiver<()>,
    /// Whether each GET was answered with the whole piece.
    finished: mpsc::UnboundedReceiver<bool>,
}

impl SlowPeer {
    const FILE_SIZE: usize = 2048;

    async fn spawn(pause: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (halfway_tx, halfway) = mpsc::unbounded_channel();
        let (finished_tx, finished) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let halfway_tx = halfway_tx.clone();
                let finished_tx = finished_tx.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut byte = [0u8; 1];
                    while stream.read(&mut byte).await.unwrap_or(0) == 1 && byte[0] != b'\n' {
                        request.push(byte[0]);
                    }
                    if request == b"SIZE" {
                        let _ = stream.write_all(Self::FILE_SIZE.to_string().as_bytes()).await;
                        return;
                    }

                    let piece = [7u8; 1024];
                    let first = stream.write_all(&piece[..512]).await.is_ok();
                    let _ = halfway_tx.send(());
                    tokio::time::sleep(pause).await;
                    let rest = stream.write_all(&piece[512..]).await.is_ok();
                    let _ = stream.shutdown().await;
                    let _ = finished_tx.send(first && rest);
                });
            }
        });

        Self {
            port,
            halfway,
            finished,
        }
    }

    /// Registers with the tracker as holding both pieces.
    async fn announce(&self, tracker: SocketAddr) -> TrackerClient {
        let client = TrackerClient::connect(
            tracker,
            self.port,
            Some(localhost()),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        client.join().await.unwrap();
        let pieces: PieceSet = (0..2).map(PieceIndex::new).collect();
        client.update(&pieces).await.unwrap();
        client
    }
}

async fn wait_for_completion(handle: &PeerHandle) {
    let seeding = timeout(COMPLETION_TIMEOUT, handle.wait_until_seeding())
        .await
        .expect("download did not finish in time");
    assert!(seeding);
}

fn incomplete(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".incomplete");
    PathBuf::from(name)
}

#[tokio::test]
async fn test_seeder_starts_seeding() {
    let mut swarm = SwarmFixture::new().await;
    let (seeder, _path) = swarm.start_seeder(&content(5000)).await;

    assert_eq!(seeder.state(), LifecycleState::Seeding);
    let progress = seeder.progress();
    assert_eq!(progress.total, 5);
    assert_eq!(progress.role, Role::Seeder);
    assert!(progress.is_complete());

    let identity = seeder.local_identity();
    let registry = swarm.tracker.registry();
    let expected: PieceSet = (0..5).map(PieceIndex::new).collect();
    let mut advertised = None;
    for _ in 0..50 {
        advertised = registry.pieces_of(&identity);
        if advertised.as_ref() == Some(&expected) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(advertised, Some(expected));

    seeder.stop().await;
    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_single_leecher_downloads_file() {
    let data = content(5000);
    let mut swarm = SwarmFixture::new().await;
    let (seeder, _) = swarm.start_seeder(&data).await;
    let (leecher, target) = swarm.start_leecher().await;

    assert_eq!(leecher.known_peers(), vec![seeder.local_identity()]);
    wait_for_completion(&leecher).await;

    assert_eq!(std::fs::read(&target).unwrap(), data);
    assert!(!incomplete(&target).exists());
    let progress = leecher.progress();
    assert_eq!(progress.owned, 5);
    assert_eq!(progress.role, Role::Seeder);

    leecher.stop().await;
    seeder.stop().await;
    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_multiple_leechers_complete() {
    let data = content(40 * 1024 + 123);
    let mut swarm = SwarmFixture::new().await;
    let (seeder, _) = swarm.start_seeder(&data).await;

    let mut leechers = Vec::new();
    for _ in 0..3 {
        leechers.push(swarm.start_leecher().await);
    }

    for (handle, target) in &leechers {
        wait_for_completion(handle).await;
        assert_eq!(std::fs::read(target).unwrap(), data);
    }

    for (handle, _) in leechers {
        handle.stop().await;
    }
    seeder.stop().await;
    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_leecher_continues_from_other_leecher() {
    let data = content(8 * 1024);
    let mut swarm = SwarmFixture::new().await;
    let (seeder, _) = swarm.start_seeder(&data).await;
    let (first, _) = swarm.start_leecher().await;
    wait_for_completion(&first).await;

    seeder.stop().await;

    let (second, target) = swarm.start_leecher().await;
    wait_for_completion(&second).await;
    assert_eq!(std::fs::read(&target).unwrap(), data);

    second.stop().await;
    first.stop().await;
    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_leecher_without_peers_fails() {
    let mut swarm = SwarmFixture::new().await;
    let target = swarm.target("nothing.bin");

    let result = PeerAgent::start(swarm.session(&target), swarm.config.clone()).await;
    assert!(matches!(
        result,
        Err(TidepoolError::Swarm(SwarmError::NoPeersAvailable))
    ));
    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_empty_seed_file_fails() {
    let mut swarm = SwarmFixture::new().await;
    let target = swarm.target("empty.bin");
    std::fs::write(&target, b"").unwrap();

    let result = PeerAgent::start(swarm.session(&target), swarm.config.clone()).await;
    assert!(matches!(
        result,
        Err(TidepoolError::Storage(StorageError::EmptyFile { .. }))
    ));
    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_silent_tracker_fails_registration() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("seed.bin");
    std::fs::write(&target, content(100)).unwrap();

    let session = PeerSession::new(&target, silent.local_addr().unwrap(), 0);
    let result = PeerAgent::start(session, TidepoolConfig::for_testing()).await;
    assert!(matches!(
        result,
        Err(TidepoolError::Swarm(SwarmError::TrackerTimedOut { .. }))
    ));
}

#[tokio::test]
async fn test_listen_port_in_use_fails() {
    let mut swarm = SwarmFixture::new().await;
    let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let target = swarm.target("seed.bin");
    std::fs::write(&target, content(100)).unwrap();

    let session = PeerSession::new(&target, swarm.tracker.local_addr(), port);
    let result = PeerAgent::start(session, swarm.config.clone()).await;
    assert!(matches!(result, Err(TidepoolError::Bind { .. })));
    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_stop_reaches_stopped_state() {
    let mut swarm = SwarmFixture::new().await;
    let (seeder, _) = swarm.start_seeder(&content(3000)).await;
    let states = seeder.subscribe();

    timeout(Duration::from_secs(5), seeder.stop()).await.unwrap();
    assert_eq!(*states.borrow(), LifecycleState::Stopped);
    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_tracker_evicts_stopped_peer() {
    let mut config = TidepoolConfig::for_testing();
    config.tracker.peer_timeout = Duration::from_millis(300);
    let mut swarm = SwarmFixture::with_config(config).await;
    let (seeder, _) = swarm.start_seeder(&content(2048)).await;
    let identity = seeder.local_identity();
    assert!(swarm.tracker.registry().contains(&identity));

    seeder.stop().await;

    let registry = swarm.tracker.registry();
    let evicted = timeout(Duration::from_secs(3), async {
        while registry.contains(&identity) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(evicted.is_ok());
    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_concurrent_updates_over_udp() {
    let swarm = SwarmFixture::new().await;
    let tracker_address: SocketAddr = swarm.tracker.local_addr();

    let mut clients = Vec::new();
    for port in 7000..7050u16 {
        let client = TrackerClient::connect(
            tracker_address,
            port,
            Some(localhost()),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        client.join().await.unwrap();
        clients.push(client);
    }

    let mut tasks = tokio::task::JoinSet::new();
    for client in clients {
        tasks.spawn(async move {
            let port = client.local_identity().port;
            let pieces: PieceSet = [PieceIndex::new(u32::from(port - 7000))].into();
            client.update(&pieces).await.unwrap();
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    let registry = swarm.tracker.registry();
    let all_applied = timeout(Duration::from_secs(3), async {
        loop {
            let applied = (7000..7050u16).all(|port| {
                let identity = PeerIdentity::new(localhost(), port);
                registry.pieces_of(&identity)
                    == Some([PieceIndex::new(u32::from(port - 7000))].into())
            });
            if applied {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(all_applied.is_ok());
    assert_eq!(registry.len(), 50);

    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_stop_lets_piece_in_flight_finish() {
    let pause = Duration::from_millis(600);
    let mut swarm = SwarmFixture::new().await;
    let mut peer = SlowPeer::spawn(pause).await;
    let _registration = peer.announce(swarm.tracker.local_addr()).await;

    let (leecher, target) = swarm.start_leecher().await;
    timeout(Duration::from_secs(5), peer.halfway.recv())
        .await
        .unwrap()
        .unwrap();

    let started = tokio::time::Instant::now();
    leecher.stop().await;
    assert!(started.elapsed() >= pause / 2);

    let finished = timeout(Duration::from_secs(1), peer.finished.recv())
        .await
        .unwrap();
    assert_eq!(finished, Some(true));

    // Exactly the one interrupted piece reached the disk
    let on_disk = std::fs::read(incomplete(&target)).unwrap();
    assert_eq!(on_disk.len(), SlowPeer::FILE_SIZE);
    assert_eq!(on_disk.iter().filter(|byte| **byte == 7).count(), 1024);

    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_failed_finalize_shuts_peer_down() {
    let mut swarm = SwarmFixture::new().await;
    let (seeder, _) = swarm.start_seeder(&content(3000)).await;

    // A non-empty directory at the target path makes the final rename fail
    let target = swarm.target("occupied");
    std::fs::create_dir(&target).unwrap();
    std::fs::write(target.join("keep.txt"), b"keep").unwrap();

    let leecher = PeerAgent::start(swarm.session(&target), swarm.config.clone())
        .await
        .unwrap();
    let seeding = timeout(COMPLETION_TIMEOUT, leecher.wait_until_seeding())
        .await
        .unwrap();
    assert!(!seeding);
    assert_eq!(leecher.state(), LifecycleState::ShuttingDown);

    // Every piece is owned, but the peer never became a seeder
    let progress = leecher.progress();
    assert_eq!(progress.owned, 3);
    assert!(progress.is_complete());
    assert_eq!(progress.role, Role::Leecher);
    assert!(incomplete(&target).is_file());

    timeout(Duration::from_secs(5), leecher.stop()).await.unwrap();
    seeder.stop().await;
    swarm.tracker.stop().await;
}

#[tokio::test]
async fn test_peer_rejoins_after_tracker_forgets_it() {
    let mut swarm = SwarmFixture::new().await;
    let (seeder, _) = swarm.start_seeder(&content(2048)).await;
    let identity = seeder.local_identity();
    let registry = std::sync::Arc::clone(swarm.tracker.registry());

    let later = std::time::Instant::now() + Duration::from_secs(60);
    assert!(registry.sweep_at(later).contains(&identity));
    assert!(!registry.contains(&identity));

    let expected: PieceSet = (0..2).map(PieceIndex::new).collect();
    let restored = timeout(Duration::from_secs(3), async {
        while registry.pieces_of(&identity).as_ref() != Some(&expected) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(restored.is_ok());

    seeder.stop().await;
    swarm.tracker.stop().await;
}
