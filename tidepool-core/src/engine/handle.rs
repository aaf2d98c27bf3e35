//! Handle for observing and stopping a running peer agent.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;

use super::agent::PeerAgent;
use super::session::Role;
use super::state::{LifecycleState, Progress};
use crate::swarm::PeerIdentity;

/// Owner of a running peer agent's background tasks.
///
/// Dropping the handle without calling [`stop`](Self::stop) aborts the
/// tasks instead of draining them.
pub struct PeerHandle {
    agent: Arc<PeerAgent>,
    tasks: JoinSet<()>,
}

impl PeerHandle {
    pub(super) fn new(agent: Arc<PeerAgent>, tasks: JoinSet<()>) -> Self {
        Self { agent, tasks }
    }

    /// Identity other peers reach this agent at.
    pub fn local_identity(&self) -> PeerIdentity {
        self.agent.local_identity()
    }

    pub fn state(&self) -> LifecycleState {
        self.agent.state()
    }

    /// Owned and total piece counts plus the current role.
    pub fn progress(&self) -> Progress {
        self.agent.progress()
    }

    pub fn known_peers(&self) -> Vec<PeerIdentity> {
        self.agent.known_peers()
    }

    /// Receiver notified on every lifecycle transition.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.agent.subscribe()
    }

    /// Waits until the agent is seeding.
    ///
    /// Returns false if the agent shuts down first.
    pub async fn wait_until_seeding(&self) -> bool {
        let mut states = self.subscribe();
        match states
            .wait_for(|state| *state >= LifecycleState::Seeding)
            .await
        {
            Ok(_) => self.progress().role == Role::Seeder,
            Err(_) => false,
        }
    }

    /// Stops accepting uploads and the refresh task, then waits for the
    /// download loop and in-flight uploads to finish.
    ///
    /// A piece transfer already under way completes or hits its request
    /// deadline before the download loop exits.
    pub async fn stop(mut self) {
        self.agent.shut_down();

        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Peer task failed: {}", e);
            }
        }

        self.agent.transition(LifecycleState::Stopped);
        tracing::info!("Peer {} stopped at {}", self.local_identity(), self.progress());
    }
}
