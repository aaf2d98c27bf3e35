//! Lifecycle states and progress reporting.

use std::fmt;

use super::session::Role;

/// Phase of a peer agent's lifecycle.
///
/// Moves forward only: `Initializing`, `Registering`, then `Downloading`
/// or `Seeding`, with `Downloading` becoming `Seeding` once on completion,
/// and finally `ShuttingDown` and `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Initializing,
    Registering,
    Downloading,
    Seeding,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Initializing => "initializing",
            LifecycleState::Registering => "registering",
            LifecycleState::Downloading => "downloading",
            LifecycleState::Seeding => "seeding",
            LifecycleState::ShuttingDown => "shutting down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Observable download progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub owned: usize,
    pub total: u32,
    pub role: Role,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.owned == self.total as usize
    }

    /// Completion as a percentage in `[0, 100]`.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.owned as f64 * 100.0 / f64::from(self.total)
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} pieces ({:.1}%, {})",
            self.owned,
            self.total,
            self.percent(),
            self.role
        )
    }
}
