//! Peer-to-peer piece transfer over TCP.
//!
//! One request per connection: the client sends a single request line, the
//! server answers and closes. Piece payloads are raw bytes whose length is
//! implied by the piece layout, so end of stream delimits the reply.

pub mod client;
pub mod server;

pub use client::PieceClient;
pub use server::PieceServer;
