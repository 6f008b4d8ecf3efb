use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use zelect_core::{
    now_millis, Candidate, ChildWatch, CoordinationError, CoordinationService, ElectionError,
    ElectionPath, Result, SiblingSet, WatchEvent,
};

use crate::{
    CancelSignal, ElectionConfig, ElectionState, ElectionStats, LeaderReason, Leadership,
    LeadershipResult, StateTracker,
};

/// Outcome of ranking one freshly fetched child list.
enum Ranking {
    Won(LeaderReason),
    Behind,
}

/// Drives one candidate from registration to leadership.
///
/// The engine inspects the sibling set, arms a one-shot child watch, waits
/// for it (or for cancellation), and re-ranks a freshly fetched child list
/// whenever it fires. It never retries a failed service call: every error is
/// returned to the caller, which decides whether to start over.
pub struct ElectionEngine<S>
where
    S: CoordinationService + ?Sized,
{
    service: Arc<S>,
    path: ElectionPath,
    evaluate_before_wait: bool,
    tracker: StateTracker,
    cancel: CancelSignal,
}

impl<S> ElectionEngine<S>
where
    S: CoordinationService + ?Sized,
{
    pub fn new(service: Arc<S>, config: &ElectionConfig, cancel: CancelSignal) -> Result<Self> {
        Ok(Self {
            service,
            path: config.path()?,
            evaluate_before_wait: config.evaluate_before_wait,
            tracker: StateTracker::new(),
            cancel,
        })
    }

    /// Shares an existing tracker so observers can follow registration too.
    pub fn with_tracker(mut self, tracker: StateTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn state(&self) -> ElectionState {
        self.tracker.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ElectionState> {
        self.tracker.subscribe()
    }

    pub fn stats(&self) -> ElectionStats {
        self.tracker.stats()
    }

    /// Runs the election for `candidate` until it wins or is cancelled.
    pub async fn run(&self, candidate: &Candidate) -> Result<LeadershipResult> {
        info!(
            "Entering election at {} as {}",
            self.path, candidate.global_id
        );

        match self.election_loop(candidate).await {
            Ok(Some(leadership)) => {
                self.tracker.transition(ElectionState::Leader);
                info!(
                    "Candidate {} elected leader ({:?}) after {} notifications",
                    candidate.global_id, leadership.reason, leadership.notifications
                );
                Ok(LeadershipResult::Leader(leadership))
            }
            Ok(None) => {
                self.tracker.transition(ElectionState::Aborted);
                info!("Election for {} cancelled", candidate.global_id);
                Ok(LeadershipResult::Aborted)
            }
            Err(e) => {
                self.tracker.transition(ElectionState::Aborted);
                match &e {
                    ElectionError::ProtocolViolation { .. } => {
                        error!("Election for {} aborted: {}", candidate.global_id, e)
                    }
                    _ => warn!("Election for {} failed: {}", candidate.global_id, e),
                }
                Err(e)
            }
        }
    }

    async fn election_loop(&self, candidate: &Candidate) -> Result<Option<Leadership>> {
        let mut notifications = 0u64;

        loop {
            self.tracker.transition(ElectionState::Watching);
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            let (children, watch) = self
                .service
                .children_watch(self.path.as_str())
                .await
                .map_err(|source| self.watch_failed(source))?;
            self.tracker.record(|stats| {
                stats.fetches += 1;
                stats.watches_installed += 1;
            });

            let siblings = self.siblings(candidate, &children)?;
            if siblings.len() == 1 {
                debug!("{} is the only candidate at {}", candidate.name, self.path);
                return Ok(Some(self.leadership(candidate, LeaderReason::SoleCandidate, notifications)));
            }
            if self.evaluate_before_wait && siblings.is_leader(candidate) {
                return Ok(Some(self.leadership(candidate, LeaderReason::SmallestKey, notifications)));
            }
            if let Some(ahead) = siblings.predecessor_of(candidate) {
                debug!(
                    "{} waiting behind {} ({} candidates)",
                    candidate.name,
                    ahead.name,
                    siblings.len()
                );
            }

            let Some(event) = self.wait(watch).await? else {
                return Ok(None);
            };

            match event {
                WatchEvent::NodeChildrenChanged { .. } => {}
                WatchEvent::SessionExpired => {
                    return Err(self.watch_failed(CoordinationError::SessionExpired {
                        session_id: self.service.session_id(),
                    }));
                }
                WatchEvent::Disconnected => {
                    debug!("Watch on {} saw a disconnect, re-arming", self.path);
                    self.tracker.record(|stats| stats.rearms += 1);
                    continue;
                }
            }

            notifications += 1;
            self.tracker.transition(ElectionState::Evaluating);
            self.tracker.record(|stats| stats.notifications_received += 1);
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            if let Ranking::Won(reason) = self.evaluate(candidate).await? {
                return Ok(Some(self.leadership(candidate, reason, notifications)));
            }
            self.tracker.record(|stats| stats.rearms += 1);
        }
    }

    /// Blocks on the watch. `None` means cancellation won the race; the
    /// watch is dropped so the service can discard the registration.
    async fn wait(&self, watch: ChildWatch) -> Result<Option<WatchEvent>> {
        let mut cancel = self.cancel.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            fired = watch.fired() => fired
                .map(Some)
                .map_err(|source| self.watch_failed(source)),
        }
    }

    /// Re-fetches the full child list and ranks it.
    async fn evaluate(&self, candidate: &Candidate) -> Result<Ranking> {
        let children = self
            .service
            .children(self.path.as_str())
            .await
            .map_err(|source| self.watch_failed(source))?;
        self.tracker.record(|stats| {
            stats.fetches += 1;
            stats.evaluations += 1;
        });

        let siblings = self.siblings(candidate, &children)?;
        if siblings.len() == 1 {
            debug!("{} is the only child left at {}", candidate.name, self.path);
            return Ok(Ranking::Won(LeaderReason::SoleCandidate));
        }

        if siblings.is_leader(candidate) {
            return Ok(Ranking::Won(LeaderReason::SmallestKey));
        }

        if let Some(minimum) = siblings.minimum() {
            debug!(
                "Smallest key at {} is {} ({}), ours is {}",
                self.path, minimum.order_key, minimum.name, candidate.order_key
            );
        }
        Ok(Ranking::Behind)
    }

    fn siblings(&self, candidate: &Candidate, children: &[String]) -> Result<SiblingSet> {
        let siblings = SiblingSet::from_children(children)?;
        if !siblings.ignored().is_empty() {
            warn!(
                "Ignoring {} non-candidate children at {}: {:?}",
                siblings.ignored().len(),
                self.path,
                siblings.ignored()
            );
            let ignored = siblings.ignored().len() as u64;
            self.tracker
                .record(|stats| stats.foreign_children_ignored += ignored);
        }
        siblings.ensure_member(candidate)?;
        Ok(siblings)
    }

    fn leadership(&self, candidate: &Candidate, reason: LeaderReason, notifications: u64) -> Leadership {
        Leadership {
            candidate: candidate.clone(),
            reason,
            notifications,
            elected_at: now_millis(),
        }
    }

    fn watch_failed(&self, source: CoordinationError) -> ElectionError {
        ElectionError::watch_failed(self.path.as_str(), source)
    }
}
