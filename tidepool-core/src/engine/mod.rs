//! Peer lifecycle coordination.
//!
//! A [`PeerAgent`] takes one peer from startup through registration to
//! downloading and seeding, and the returned [`PeerHandle`] is how the
//! process boundary observes progress and stops it.

pub mod agent;
pub mod handle;
pub mod session;
pub mod state;

pub use agent::PeerAgent;
pub use handle::PeerHandle;
pub use session::{PeerSession, Role};
pub use state::{LifecycleState, Progress};
