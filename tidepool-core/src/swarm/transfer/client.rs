//! Download path: fetches pieces and the file size from other peers.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::SizeMismatchPolicy;
use crate::swarm::protocol::decode_text;
use crate::swarm::{PeerIdentity, PeerRequest, PieceIndex, SwarmError};

/// Longest SIZE reply accepted; a `u64` needs at most 20 digits.
const MAX_SIZE_REPLY: usize = 32;

/// Issues one request per connection to a remote peer.
///
/// Connecting and every individual read are bounded by the request
/// timeout, so a stalled peer fails only the current attempt.
#[derive(Debug, Clone)]
pub struct PieceClient {
    request_timeout: Duration,
    policy: SizeMismatchPolicy,
}

impl PieceClient {
    pub fn new(request_timeout: Duration, policy: SizeMismatchPolicy) -> Self {
        Self {
            request_timeout,
            policy,
        }
    }

    /// Downloads one piece of exactly `expected` bytes.
    ///
    /// # Errors
    ///
    /// - `SwarmError::ConnectTimedOut` / `ReadTimedOut` - If a deadline passes
    /// - `SwarmError::IncompletePiece` - If the peer closes early
    /// - `SwarmError::OversizedPiece` - If the peer sends surplus bytes under
    ///   [`SizeMismatchPolicy::Reject`]
    /// - `SwarmError::Io` - If the connection fails
    pub async fn fetch_piece(
        &self,
        peer: PeerIdentity,
        index: PieceIndex,
        expected: usize,
    ) -> Result<Vec<u8>, SwarmError> {
        let mut stream = self.connect(peer).await?;
        self.send_request(&mut stream, peer, PeerRequest::Get(index)).await?;
        self.read_payload(&mut stream, peer, index, expected).await
    }

    /// Asks a peer for the total size of the shared file.
    ///
    /// # Errors
    ///
    /// - `SwarmError::UnexpectedResponse` - If the reply is not a decimal size
    /// - Any connection or deadline error from [`fetch_piece`](Self::fetch_piece)
    pub async fn query_size(&self, peer: PeerIdentity) -> Result<u64, SwarmError> {
        let mut stream = self.connect(peer).await?;
        self.send_request(&mut stream, peer, PeerRequest::Size).await?;

        let mut reply = Vec::new();
        let mut chunk = [0u8; MAX_SIZE_REPLY];
        loop {
            let read = self.timed_read(&mut stream, peer, &mut chunk).await?;
            if read == 0 {
                break;
            }
            reply.extend_from_slice(&chunk[..read]);
            if reply.len() > MAX_SIZE_REPLY {
                return Err(SwarmError::UnexpectedResponse {
                    response: String::from_utf8_lossy(&reply).into_owned(),
                });
            }
        }

        let text = decode_text(&reply)?;
        text.parse::<u64>()
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| SwarmError::UnexpectedResponse {
                response: text.to_string(),
            })
    }

    /// Reads a piece payload of `expected` bytes from an open stream and
    /// applies the size-mismatch policy to any surplus.
    ///
    /// Nothing is returned unless the full piece arrived.
    ///
    /// # Errors
    ///
    /// See [`fetch_piece`](Self::fetch_piece).
    pub async fn read_payload<R>(
        &self,
        reader: &mut R,
        peer: PeerIdentity,
        index: PieceIndex,
        expected: usize,
    ) -> Result<Vec<u8>, SwarmError>
    where
        R: AsyncRead + Unpin,
    {
        let mut payload = vec![0u8; expected];
        let mut received = 0;
        while received < expected {
            let read = self.timed_read(reader, peer, &mut payload[received..]).await?;
            if read == 0 {
                return Err(SwarmError::IncompletePiece {
                    index,
                    peer,
                    received,
                    expected,
                });
            }
            received += read;
        }

        // The sender closes after the payload; anything more is surplus
        let mut surplus = [0u8; 1];
        match tokio::time::timeout(self.request_timeout, reader.read(&mut surplus)).await {
            Ok(Ok(0)) | Err(_) => {}
            Ok(Ok(_)) => match self.policy {
                SizeMismatchPolicy::Reject => {
                    return Err(SwarmError::OversizedPiece {
                        index,
                        peer,
                        expected,
                    });
                }
                SizeMismatchPolicy::Truncate => {
                    tracing::warn!(
                        "Peer {} sent more than {} bytes for piece {}; truncating",
                        peer,
                        expected,
                        index
                    );
                }
            },
            Ok(Err(e)) => {
                tracing::debug!("Read after piece {} from {} failed: {}", index, peer, e);
            }
        }

        Ok(payload)
    }

    async fn connect(&self, peer: PeerIdentity) -> Result<TcpStream, SwarmError> {
        let connecting = TcpStream::connect(peer.socket_addr());
        let stream = tokio::time::timeout(self.request_timeout, connecting)
            .await
            .map_err(|_| SwarmError::ConnectTimedOut { peer })??;
        Ok(stream)
    }

    async fn send_request(
        &self,
        stream: &mut TcpStream,
        peer: PeerIdentity,
        request: PeerRequest,
    ) -> Result<(), SwarmError> {
        tokio::time::timeout(self.request_timeout, stream.write_all(request.to_line().as_bytes()))
            .await
            .map_err(|_| SwarmError::ReadTimedOut { peer })??;
        tracing::debug!("Sent '{}' to {}", request, peer);
        Ok(())
    }

    async fn timed_read<R>(
        &self,
        reader: &mut R,
        peer: PeerIdentity,
        buffer: &mut [u8],
    ) -> Result<usize, SwarmError>
    where
        R: AsyncRead + Unpin,
    {
        let read = tokio::time::timeout(self.request_timeout, reader.read(buffer))
            .await
            .map_err(|_| SwarmError::ReadTimedOut { peer })??;
        Ok(read)
    }
}
