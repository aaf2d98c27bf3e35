//! Tracker registry, its UDP service and the peer-side client.
//!
//! The tracker keeps a soft-state view of the swarm: peers register with
//! JOIN, keep their record alive with UPDATE, and are evicted once idle for
//! longer than the configured timeout. The tracker never sees file content.

pub mod client;
pub mod registry;
pub mod server;

pub use client::TrackerClient;
pub use registry::PeerRegistry;
pub use server::{TrackerHandle, TrackerServer};
