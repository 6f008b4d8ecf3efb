use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use zelect_core::{
    ensure_path, Candidate, CoordinationService, EnsembleStats, InMemoryEnsemble,
    InMemorySession, SessionId,
};
use zelect_engine::{
    cancellation, CancelHandle, CandidateRegistrar, ElectionConfig, ElectionEngine,
    ElectionState, LeadershipResult,
};

type ElectionHandle = JoinHandle<zelect_core::Result<LeadershipResult>>;

#[derive(Debug, Clone)]
pub enum FaultType {
    /// Expire one participant's session
    SessionExpiry { participant: usize },
    /// Expire a random participant that is not currently leading
    RandomFollowerExpiry,
    /// Expire the current leader's session
    LeaderCrash,
    /// Refuse every request for a while
    ServiceOutage { duration: Duration },
    /// An operator removes a participant's candidate node by hand
    NodeDeletion { participant: usize },
}

#[derive(Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    pub participant_count: usize,
    pub config: ElectionConfig,
    pub faults: Vec<(Duration, FaultType)>, // (delay before injecting, fault)
    pub expected_outcome: ExpectedOutcome,
    /// Engines expected to end with an error
    pub expected_failures: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedOutcome {
    SingleLeader,
    Succession { leaders: usize },
    NoLeader,
}

/// One won election, in the order leadership was granted.
#[derive(Debug, Clone)]
pub struct LeaderRecord {
    pub participant: usize,
    pub candidate: Candidate,
    pub session: SessionId,
    pub elected_after: Duration,
}

#[derive(Debug)]
pub struct TestResult {
    pub scenario: String,
    pub success: bool,
    pub duration: Duration,
    pub leaders: Vec<usize>,
    pub failures: usize,
    pub safety_violations: usize,
    pub ensemble_stats: EnsembleStats,
    pub details: String,
}

struct Participant {
    session: Arc<InMemorySession>,
    candidate: Candidate,
    cancel: CancelHandle,
    state: watch::Receiver<ElectionState>,
    handle: Option<ElectionHandle>,
}

/// Runs many election participants against one in-memory ensemble.
///
/// Each participant owns its own session and engine task. Whenever an engine
/// wins, the harness checks that no earlier leader's candidate node is still
/// present; any such overlap is counted as a safety violation.
pub struct ElectionTestHarness {
    ensemble: Arc<InMemoryEnsemble>,
    config: ElectionConfig,
    participants: DashMap<usize, Participant>,
    history: Arc<Mutex<Vec<LeaderRecord>>>,
    violations: Arc<AtomicUsize>,
    next_index: AtomicUsize,
    start_time: Instant,
}

impl ElectionTestHarness {
    pub async fn new(config: ElectionConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let ensemble = InMemoryEnsemble::with_endpoint(config.endpoint.clone());

        let admin = ensemble.open_session(config.session_timeout);
        ensure_path(&admin, &config.path()?)
            .await
            .context("bootstrapping election path")?;
        admin.close().await?;

        Ok(Self {
            ensemble,
            config,
            participants: DashMap::new(),
            history: Arc::new(Mutex::new(Vec::new())),
            violations: Arc::new(AtomicUsize::new(0)),
            next_index: AtomicUsize::new(0),
            start_time: Instant::now(),
        })
    }

    pub fn ensemble(&self) -> &Arc<InMemoryEnsemble> {
        &self.ensemble
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Registers a new participant and starts its engine.
    ///
    /// Registration completes before this returns, so participants added one
    /// after another receive ascending order keys.
    pub async fn add_participant(&self) -> anyhow::Result<usize> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(self.ensemble.open_session(self.config.session_timeout));

        let candidate = CandidateRegistrar::new(Arc::clone(&session), &self.config)?
            .register()
            .await
            .with_context(|| format!("registering participant {}", index))?;

        let (cancel, signal) = cancellation();
        let engine = ElectionEngine::new(Arc::clone(&session), &self.config, signal)?;
        let state = engine.subscribe();

        let me = candidate.clone();
        let session_id = session.session_id();
        let history = Arc::clone(&self.history);
        let violations = Arc::clone(&self.violations);
        let ensemble = Arc::clone(&self.ensemble);
        let path = self.config.election_path.clone();
        let started = self.start_time;

        let handle = tokio::spawn(async move {
            let result = engine.run(&me).await;
            if let Ok(LeadershipResult::Leader(_)) = &result {
                let present = ensemble.children_of(&path);
                let mut history = history.lock();
                let overlapping = history
                    .iter()
                    .filter(|record| present.contains(&record.candidate.name))
                    .count();
                if overlapping > 0 {
                    error!(
                        "Participant {} won while {} earlier leader(s) still hold nodes",
                        index, overlapping
                    );
                    violations.fetch_add(overlapping, Ordering::SeqCst);
                }
                history.push(LeaderRecord {
                    participant: index,
                    candidate: me,
                    session: session_id,
                    elected_after: started.elapsed(),
                });
            }
            result
        });

        self.participants.insert(
            index,
            Participant {
                session,
                candidate,
                cancel,
                state,
                handle: Some(handle),
            },
        );
        Ok(index)
    }

    pub async fn spawn_participants(&self, count: usize) -> anyhow::Result<Vec<usize>> {
        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            indices.push(self.add_participant().await?);
        }
        Ok(indices)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn candidate(&self, index: usize) -> Option<Candidate> {
        self.participants.get(&index).map(|p| p.candidate.clone())
    }

    pub fn session_id(&self, index: usize) -> Option<SessionId> {
        self.participants.get(&index).map(|p| p.session.session_id())
    }

    pub fn state(&self, index: usize) -> Option<ElectionState> {
        self.participants.get(&index).map(|p| *p.state.borrow())
    }

    /// Participants that have won and whose candidate node still exists.
    pub fn leaders(&self) -> Vec<usize> {
        let present = self.ensemble.children_of(&self.config.election_path);
        let mut leaders: Vec<usize> = self
            .participants
            .iter()
            .filter(|entry| {
                *entry.state.borrow() == ElectionState::Leader
                    && present.contains(&entry.candidate.name)
            })
            .map(|entry| *entry.key())
            .collect();
        leaders.sort_unstable();
        leaders
    }

    pub fn current_leader(&self) -> Option<usize> {
        self.leaders().first().copied()
    }

    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<usize> {
        self.wait_for_new_leader(None, timeout).await
    }

    /// Waits for a leader other than `previous`.
    pub async fn wait_for_new_leader(
        &self,
        previous: Option<usize>,
        timeout: Duration,
    ) -> Option<usize> {
        let poll = async {
            loop {
                if let Some(leader) = self
                    .leaders()
                    .into_iter()
                    .find(|leader| Some(*leader) != previous)
                {
                    return leader;
                }
                sleep(Duration::from_millis(2)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.ok()
    }

    pub fn expire(&self, index: usize) -> bool {
        match self.session_id(index) {
            Some(session_id) => self.ensemble.expire_session(session_id),
            None => false,
        }
    }

    /// Expires the current leader's session, returning who it was.
    pub fn kill_leader(&self) -> Option<usize> {
        let leader = self.current_leader()?;
        info!("Killing leader {}", leader);
        self.expire(leader).then_some(leader)
    }

    pub fn delete_candidate(&self, index: usize) -> anyhow::Result<()> {
        let candidate = self
            .candidate(index)
            .ok_or_else(|| anyhow!("unknown participant {}", index))?;
        self.ensemble.remove_node(&candidate.global_id)?;
        Ok(())
    }

    pub fn cancel(&self, index: usize) {
        if let Some(participant) = self.participants.get(&index) {
            participant.cancel.cancel();
        }
    }

    pub fn is_finished(&self, index: usize) -> bool {
        self.participants
            .get(&index)
            .and_then(|p| p.handle.as_ref().map(|h| h.is_finished()))
            .unwrap_or(true)
    }

    /// Waits for a participant's engine and returns its result.
    pub async fn join(
        &self,
        index: usize,
    ) -> anyhow::Result<zelect_core::Result<LeadershipResult>> {
        let handle = self
            .participants
            .get_mut(&index)
            .and_then(|mut p| p.handle.take())
            .ok_or_else(|| anyhow!("participant {} unknown or already joined", index))?;
        Ok(handle.await?)
    }

    pub fn leader_history(&self) -> Vec<LeaderRecord> {
        self.history.lock().clone()
    }

    pub fn safety_violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    async fn inject_fault(&self, fault: FaultType) -> anyhow::Result<()> {
        match fault {
            FaultType::SessionExpiry { participant } => {
                info!("Expiring session of participant {}", participant);
                if !self.expire(participant) {
                    warn!("Participant {} had no live session", participant);
                }
            }
            FaultType::RandomFollowerExpiry => {
                let leaders = self.leaders();
                let indices: Vec<usize> = self.participants.iter().map(|e| *e.key()).collect();
                let followers: Vec<usize> = indices
                    .into_iter()
                    .filter(|index| !leaders.contains(index) && !self.is_finished(*index))
                    .collect();
                if let Some(&victim) = followers.choose(&mut rand::thread_rng()) {
                    info!("Expiring session of follower {}", victim);
                    self.expire(victim);
                }
            }
            FaultType::LeaderCrash => {
                let crashed = self.kill_leader();
                if crashed.is_none() {
                    warn!("No leader to crash");
                }
                self.wait_for_new_leader(crashed, Duration::from_secs(1))
                    .await;
            }
            FaultType::ServiceOutage { duration } => {
                self.ensemble.set_available(false);
                sleep(duration).await;
                self.ensemble.set_available(true);
            }
            FaultType::NodeDeletion { participant } => {
                info!("Deleting candidate node of participant {}", participant);
                self.delete_candidate(participant)?;
            }
        }
        Ok(())
    }

    /// Cancels every engine still running and collects all results.
    ///
    /// Returns the number of engines that ended with an error.
    pub async fn shutdown(&self) -> usize {
        for entry in self.participants.iter() {
            entry.cancel.cancel();
        }

        let handles: Vec<(usize, ElectionHandle)> = self
            .participants
            .iter_mut()
            .filter_map(|mut entry| {
                let index = *entry.key();
                entry.handle.take().map(|handle| (index, handle))
            })
            .collect();

        let (indices, handles): (Vec<usize>, Vec<ElectionHandle>) = handles.into_iter().unzip();
        let mut failures = 0;
        for (index, joined) in indices.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    info!("Participant {} ended with error: {}", index, e);
                    failures += 1;
                }
                Err(e) => {
                    error!("Participant {} task failed: {}", index, e);
                    failures += 1;
                }
            }
        }
        failures
    }

    pub async fn run_scenario(scenario: TestScenario) -> anyhow::Result<TestResult> {
        info!("Running test scenario: {}", scenario.name);
        let start_time = Instant::now();

        let harness = Self::new(scenario.config.clone()).await?;
        harness.spawn_participants(scenario.participant_count).await?;
        if scenario.expected_outcome != ExpectedOutcome::NoLeader {
            harness.wait_for_leader(scenario.timeout).await;
        }

        for (delay, fault) in scenario.faults {
            sleep(delay).await;
            harness.inject_fault(fault).await?;
        }

        // Let watch notifications settle before judging the outcome
        sleep(Duration::from_millis(20)).await;

        let leaders: Vec<usize> = harness
            .leader_history()
            .into_iter()
            .map(|record| record.participant)
            .collect();
        let failures = harness.shutdown().await;
        let safety_violations = harness.safety_violations();

        let outcome_met = match scenario.expected_outcome {
            ExpectedOutcome::SingleLeader => leaders.len() == 1,
            ExpectedOutcome::Succession { leaders: count } => leaders.len() == count,
            ExpectedOutcome::NoLeader => leaders.is_empty(),
        };
        let success =
            outcome_met && safety_violations == 0 && failures == scenario.expected_failures;
        let details = format!(
            "Expected: {:?} with {} failure(s), Actual: leaders {:?} with {} failure(s), {} violation(s)",
            scenario.expected_outcome,
            scenario.expected_failures,
            leaders,
            failures,
            safety_violations
        );

        Ok(TestResult {
            scenario: scenario.name,
            success,
            duration: start_time.elapsed(),
            leaders,
            failures,
            safety_violations,
            ensemble_stats: harness.ensemble.stats(),
            details,
        })
    }
}

pub fn create_test_scenarios() -> Vec<TestScenario> {
    let config = ElectionConfig::default();
    let step = Duration::from_millis(10);

    vec![
        TestScenario {
            name: "Single Winner".to_string(),
            description: "Five candidates, no faults".to_string(),
            participant_count: 5,
            config: config.clone(),
            faults: vec![],
            expected_outcome: ExpectedOutcome::SingleLeader,
            expected_failures: 0,
            timeout: Duration::from_secs(1),
        },
        TestScenario {
            name: "Leader Succession".to_string(),
            description: "Crash two leaders in a row; the last candidate takes over".to_string(),
            participant_count: 3,
            config: config.clone(),
            faults: vec![(step, FaultType::LeaderCrash), (step, FaultType::LeaderCrash)],
            expected_outcome: ExpectedOutcome::Succession { leaders: 3 },
            expected_failures: 0,
            timeout: Duration::from_secs(1),
        },
        TestScenario {
            name: "Follower Session Expiry".to_string(),
            description: "A waiting candidate loses its session".to_string(),
            participant_count: 3,
            config: config.clone(),
            faults: vec![(step, FaultType::SessionExpiry { participant: 2 })],
            expected_outcome: ExpectedOutcome::SingleLeader,
            expected_failures: 1,
            timeout: Duration::from_secs(1),
        },
        TestScenario {
            name: "Service Outage".to_string(),
            description: "The ensemble refuses requests while candidates wait".to_string(),
            participant_count: 3,
            config: config.clone(),
            faults: vec![(
                step,
                FaultType::ServiceOutage {
                    duration: Duration::from_millis(50),
                },
            )],
            expected_outcome: ExpectedOutcome::SingleLeader,
            expected_failures: 0,
            timeout: Duration::from_secs(1),
        },
        TestScenario {
            name: "Operator Deletion".to_string(),
            description: "A waiting candidate's node is deleted out from under it".to_string(),
            participant_count: 3,
            config,
            faults: vec![(step, FaultType::NodeDeletion { participant: 2 })],
            expected_outcome: ExpectedOutcome::SingleLeader,
            expected_failures: 1,
            timeout: Duration::from_secs(1),
        },
    ]
}
