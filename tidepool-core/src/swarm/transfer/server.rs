//! Upload path: serves SIZE and GET requests from other peers.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use crate::storage::PieceStore;
use crate::swarm::protocol::peer::MAX_REQUEST_LINE;
use crate::swarm::protocol::decode_text;
use crate::swarm::{OwnedPieces, PeerRequest, SwarmError};

/// Serves owned pieces over one-request-per-connection TCP.
///
/// Each accepted connection runs on its own task; a semaphore caps how many
/// run at once and further connections wait in the listen backlog.
pub struct PieceServer<S: PieceStore> {
    store: Arc<S>,
    owned: Arc<OwnedPieces>,
    request_timeout: Duration,
    upload_slots: Arc<Semaphore>,
}

impl<S: PieceStore + 'static> PieceServer<S> {
    pub fn new(
        store: Arc<S>,
        owned: Arc<OwnedPieces>,
        request_timeout: Duration,
        max_uploads: usize,
    ) -> Self {
        Self {
            store,
            owned,
            request_timeout,
            upload_slots: Arc::new(Semaphore::new(max_uploads.max(1))),
        }
    }

    /// Accepts connections until shutdown is signalled, then waits for the
    /// in-flight uploads to finish or time out.
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        let mut uploads = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = Arc::clone(&self.upload_slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, remote) = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Failed to accept upload connection: {}", e);
                        continue;
                    }
                },
            };

            let server = Arc::clone(&self);
            uploads.spawn(async move {
                let _permit = permit;
                if let Err(e) = server.handle_connection(stream, remote).await {
                    tracing::debug!("Upload to {} ended: {}", remote, e);
                }
            });

            while let Some(finished) = uploads.try_join_next() {
                if let Err(e) = finished {
                    tracing::error!("Upload task failed: {}", e);
                }
            }
        }

        if !uploads.is_empty() {
            tracing::info!("Waiting for {} in-flight uploads", uploads.len());
        }
        while let Some(finished) = uploads.join_next().await {
            if let Err(e) = finished {
                tracing::error!("Upload task failed: {}", e);
            }
        }
        tracing::debug!("Upload server stopped");
    }

    /// Reads one request line and answers it.
    ///
    /// Malformed requests and requests for pieces not owned are closed
    /// without a payload; neither is an error.
    ///
    /// # Errors
    ///
    /// - `SwarmError::Io` - If reading, writing or a deadline fails
    /// - `SwarmError::Storage` - If an owned piece cannot be read back
    pub async fn handle_connection<T>(
        &self,
        mut stream: T,
        remote: SocketAddr,
    ) -> Result<(), SwarmError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(line) = self.read_request_line(&mut stream, remote).await? else {
            return Ok(());
        };

        let request = match decode_text(&line).and_then(PeerRequest::parse) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Closing connection from {}: {}", remote, e);
                return Ok(());
            }
        };

        match request {
            PeerRequest::Size => {
                let size = self.store.layout().file_size().to_string();
                self.send(&mut stream, size.as_bytes()).await?;
                tracing::debug!("Sent file size {} to {}", size, remote);
            }
            PeerRequest::Get(index) => {
                if !self.owned.contains(index) {
                    tracing::debug!("Peer {} requested unowned piece {}", remote, index);
                    return Ok(());
                }
                let payload = self.store.read_piece(index).await?;
                self.send(&mut stream, &payload).await?;
                tracing::info!("Uploaded piece {} ({} bytes) to {}", index, payload.len(), remote);
            }
        }
        Ok(())
    }

    /// Reads up to the first newline, or to EOF when the sender half-closes
    /// without one. Returns `None` for oversized lines.
    async fn read_request_line<T>(
        &self,
        stream: &mut T,
        remote: SocketAddr,
    ) -> Result<Option<Vec<u8>>, SwarmError>
    where
        T: AsyncRead + Unpin,
    {
        let mut line = Vec::with_capacity(64);
        let mut chunk = [0u8; 256];

        loop {
            let read = tokio::time::timeout(self.request_timeout, stream.read(&mut chunk))
                .await
                .map_err(|_| timed_out("request line"))??;
            if read == 0 {
                break;
            }

            let searched = line.len();
            line.extend_from_slice(&chunk[..read]);
            if let Some(newline) = line[searched..].iter().position(|&byte| byte == b'\n') {
                line.truncate(searched + newline);
                break;
            }
            if line.len() > MAX_REQUEST_LINE {
                tracing::warn!("Request line from {} exceeds {} bytes", remote, MAX_REQUEST_LINE);
                return Ok(None);
            }
        }

        Ok(Some(line))
    }

    async fn send<T>(&self, stream: &mut T, bytes: &[u8]) -> Result<(), SwarmError>
    where
        T: AsyncWrite + Unpin,
    {
        tokio::time::timeout(self.request_timeout, async {
            stream.write_all(bytes).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| timed_out("response write"))??;
        Ok(())
    }
}

fn timed_out(operation: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{operation} timed out"))
}
