use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use zelect_core::Candidate;

/// Where an election participant currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElectionState {
    /// Candidate node creation in flight
    Registering,
    /// Blocked on a child watch
    Watching,
    /// A watch fired; the child list is being re-ranked
    Evaluating,
    /// Terminal: this candidate won
    Leader,
    /// Terminal: cancelled or failed
    Aborted,
}

impl ElectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Leader | Self::Aborted)
    }
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registering => "registering",
            Self::Watching => "watching",
            Self::Evaluating => "evaluating",
            Self::Leader => "leader",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Which rule granted leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaderReason {
    /// Only one candidate left under the election path
    SoleCandidate,
    /// Smallest order key among several candidates
    SmallestKey,
}

/// Details of a won election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leadership {
    pub candidate: Candidate,
    pub reason: LeaderReason,
    /// Watch notifications consumed before winning
    pub notifications: u64,
    pub elected_at: u64,
}

/// Terminal outcome of [`ElectionEngine::run`](crate::ElectionEngine::run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipResult {
    Leader(Leadership),
    Aborted,
}

impl LeadershipResult {
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader(_))
    }

    pub fn leadership(&self) -> Option<&Leadership> {
        match self {
            Self::Leader(leadership) => Some(leadership),
            Self::Aborted => None,
        }
    }
}

/// Statistics about one election run
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionStats {
    pub registrations: u64,
    pub fetches: u64,
    pub watches_installed: u64,
    pub notifications_received: u64,
    pub evaluations: u64,
    pub rearms: u64,
    pub foreign_children_ignored: u64,
}

/// Publishes state transitions and accumulates statistics.
#[derive(Debug, Clone)]
pub struct StateTracker {
    state_tx: Arc<watch::Sender<ElectionState>>,
    stats: Arc<RwLock<ElectionStats>>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ElectionState::Registering);
        Self {
            state_tx: Arc::new(state_tx),
            stats: Arc::new(RwLock::new(ElectionStats::default())),
        }
    }

    pub fn state(&self) -> ElectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ElectionState> {
        self.state_tx.subscribe()
    }

    pub fn transition(&self, next: ElectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!("Election state {} -> {}", previous, next);
        }
    }

    pub fn stats(&self) -> ElectionStats {
        self.stats.read().clone()
    }

    pub fn record(&self, update: impl FnOnce(&mut ElectionStats)) {
        update(&mut self.stats.write());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ElectionState::Leader.is_terminal());
        assert!(ElectionState::Aborted.is_terminal());
        assert!(!ElectionState::Watching.is_terminal());
        assert!(!ElectionState::Evaluating.is_terminal());
    }

    #[test]
    fn test_tracker_publishes_transitions() {
        let tracker = StateTracker::new();
        let mut rx = tracker.subscribe();
        assert_eq!(tracker.state(), ElectionState::Registering);

        tracker.transition(ElectionState::Watching);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ElectionState::Watching);

        tracker.record(|stats| stats.rearms += 2);
        assert_eq!(tracker.stats().rearms, 2);
    }
}
