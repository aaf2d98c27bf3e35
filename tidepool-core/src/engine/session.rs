//! Per-process peer session parameters.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Whether the agent starts with the complete file or has to fetch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Seeder,
    Leecher,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Seeder => write!(f, "seeder"),
            Role::Leecher => write!(f, "leecher"),
        }
    }
}

/// Everything the process boundary supplies to one peer agent.
#[derive(Debug, Clone)]
pub struct PeerSession {
    /// Canonical path of the shared file
    pub target_path: PathBuf,
    /// Resolved tracker UDP address
    pub tracker_address: SocketAddr,
    /// TCP port for uploads; 0 picks an ephemeral port
    pub listen_port: u16,
    /// Address advertised to the swarm; detected from the route to the
    /// tracker when unset
    pub advertised_ip: Option<IpAddr>,
}

impl PeerSession {
    pub fn new(
        target_path: impl Into<PathBuf>,
        tracker_address: SocketAddr,
        listen_port: u16,
    ) -> Self {
        Self {
            target_path: target_path.into(),
            tracker_address,
            listen_port,
            advertised_ip: None,
        }
    }

    pub fn with_advertised_ip(mut self, ip: IpAddr) -> Self {
        self.advertised_ip = Some(ip);
        self
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// An existing target file makes this agent a seeder.
    pub fn role(&self) -> Role {
        if self.target_path.is_file() {
            Role::Seeder
        } else {
            Role::Leecher
        }
    }
}
