//! Caller-side composition of connect, bootstrap, registration and election,
//! with the retry policy the engine itself deliberately lacks.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use zelect_core::{
    ensure_path, CoordinationService, ElectionError, ElectionPath, Result, SessionConnector,
};

use crate::{
    CancelSignal, CandidateRegistrar, ElectionConfig, ElectionEngine, ElectionState,
    ElectionStats, Leadership, LeadershipResult, RetryPolicy, StateTracker,
};

/// Final result of an [`Elector`] run.
#[derive(Debug)]
pub enum ElectionOutcome<S> {
    /// Won. The session must stay open for the candidate node to survive.
    Leader {
        session: Arc<S>,
        leadership: Leadership,
    },
    Aborted,
}

impl<S> ElectionOutcome<S> {
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader { .. })
    }
}

/// Runs complete election attempts until one succeeds, is cancelled, or
/// fails in a way the [`RetryPolicy`] does not cover.
///
/// Every attempt opens a fresh session: a registration made on a session
/// that saw errors may no longer be valid.
pub struct Elector<C>
where
    C: SessionConnector,
{
    connector: C,
    config: ElectionConfig,
    path: ElectionPath,
    retry: RetryPolicy,
    cancel: CancelSignal,
    tracker: StateTracker,
}

impl<C> Elector<C>
where
    C: SessionConnector,
{
    pub fn new(connector: C, config: ElectionConfig) -> Result<Self> {
        config.validate()?;
        let path = config.path()?;
        Ok(Self {
            connector,
            config,
            path,
            retry: RetryPolicy::default(),
            cancel: CancelSignal::never(),
            tracker: StateTracker::new(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
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

    pub async fn run(&self) -> Result<ElectionOutcome<C::Session>> {
        let mut retries = 0;

        loop {
            if self.cancel.is_cancelled() {
                self.tracker.transition(ElectionState::Aborted);
                return Ok(ElectionOutcome::Aborted);
            }

            let error = match self.attempt().await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            };

            if !error.is_retryable() || retries >= self.retry.max_retries {
                return Err(error);
            }

            let delay = self.retry.delay_for(retries);
            retries += 1;
            warn!(
                "Election attempt failed ({}), retry {}/{} in {:?}",
                error, retries, self.retry.max_retries, delay
            );

            let mut cancel = self.cancel.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.tracker.transition(ElectionState::Aborted);
                    return Ok(ElectionOutcome::Aborted);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self) -> Result<ElectionOutcome<C::Session>> {
        self.tracker.transition(ElectionState::Registering);

        let session = self
            .connector
            .connect(&self.config.endpoint, self.config.session_timeout)
            .await
            .map_err(|source| {
                self.tracker.transition(ElectionState::Aborted);
                ElectionError::registration_failed(self.path.as_str(), source)
            })?;
        let session = Arc::new(session);
        info!(
            "Connected to {} with session {}",
            self.config.endpoint,
            session.session_id()
        );

        match self.elect_on(&session).await {
            Ok(LeadershipResult::Leader(leadership)) => Ok(ElectionOutcome::Leader {
                session,
                leadership,
            }),
            Ok(LeadershipResult::Aborted) => {
                self.close(&session).await;
                Ok(ElectionOutcome::Aborted)
            }
            Err(e) => {
                self.tracker.transition(ElectionState::Aborted);
                self.close(&session).await;
                Err(e)
            }
        }
    }

    async fn elect_on(&self, session: &Arc<C::Session>) -> Result<LeadershipResult> {
        if self.config.bootstrap {
            ensure_path(session.as_ref(), &self.path).await?;
        }
        if self.cancel.is_cancelled() {
            self.tracker.transition(ElectionState::Aborted);
            return Ok(LeadershipResult::Aborted);
        }

        let candidate = CandidateRegistrar::new(Arc::clone(session), &self.config)?
            .register()
            .await?;
        self.tracker.record(|stats| stats.registrations += 1);

        ElectionEngine::new(Arc::clone(session), &self.config, self.cancel.clone())?
            .with_tracker(self.tracker.clone())
            .run(&candidate)
            .await
    }

    async fn close(&self, session: &Arc<C::Session>) {
        if let Err(e) = session.close().await {
            warn!("Failed to close session {}: {}", session.session_id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation;
    use std::time::Duration;
    use zelect_core::{CoordinationError, InMemoryEnsemble};

    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new()
            .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn test_elector_bootstraps_and_wins() {
        init_logging();
        let ensemble = InMemoryEnsemble::new();
        let elector = Elector::new(ensemble.connector(), ElectionConfig::default()).unwrap();

        let outcome = elector.run().await.unwrap();
        let ElectionOutcome::Leader { session, leadership } = outcome else {
            panic!("expected leadership");
        };
        assert_eq!(elector.state(), ElectionState::Leader);
        assert_eq!(
            ensemble.children_of("/election"),
            vec![leadership.candidate.name.clone()]
        );
        assert!(ensemble.is_session_live(session.session_id()));
        assert_eq!(elector.stats().registrations, 1);
    }

    #[tokio::test]
    async fn test_elector_without_bootstrap_fails_fast() {
        let ensemble = InMemoryEnsemble::new();
        let config = ElectionConfig::default().with_bootstrap(false);
        let elector = Elector::new(ensemble.connector(), config)
            .unwrap()
            .with_retry_policy(fast_retry());

        let err = elector.run().await.unwrap_err();
        assert!(matches!(
            err,
            ElectionError::RegistrationFailed {
                source: CoordinationError::NoSuchPath { .. },
                ..
            }
        ));
        assert_eq!(ensemble.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_elector_gives_up_after_max_retries() {
        init_logging();
        let ensemble = InMemoryEnsemble::new();
        ensemble.set_available(false);
        let elector = Elector::new(ensemble.connector(), ElectionConfig::default())
            .unwrap()
            .with_retry_policy(fast_retry().with_max_retries(2));

        let err = elector.run().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ensemble.stats().sessions_opened, 0);
    }

    #[tokio::test]
    async fn test_elector_wrong_endpoint() {
        init_logging();
        let ensemble = InMemoryEnsemble::with_endpoint("zk-a:2181");
        let config = ElectionConfig::default().with_endpoint("zk-b:2181");
        let elector = Elector::new(ensemble.connector(), config)
            .unwrap()
            .with_retry_policy(RetryPolicy::none());

        assert!(matches!(
            elector.run().await.unwrap_err(),
            ElectionError::RegistrationFailed {
                source: CoordinationError::ServiceUnavailable { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_elector_cancelled_up_front() {
        let ensemble = InMemoryEnsemble::new();
        let (handle, signal) = cancellation();
        handle.cancel();
        let elector = Elector::new(ensemble.connector(), ElectionConfig::default())
            .unwrap()
            .with_cancel(signal);

        assert!(matches!(elector.run().await.unwrap(), ElectionOutcome::Aborted));
        assert_eq!(elector.state(), ElectionState::Aborted);
    }

    #[test]
    fn test_elector_rejects_invalid_config() {
        let ensemble = InMemoryEnsemble::new();
        let config = ElectionConfig::default().with_election_path("relative");
        assert!(matches!(
            Elector::new(ensemble.connector(), config),
            Err(ElectionError::Config { .. })
        ));
    }
}
