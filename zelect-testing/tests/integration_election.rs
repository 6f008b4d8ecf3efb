//! Integration tests for leader election among several participants
//!
//! Every participant runs its own engine on its own session against a
//! shared in-memory ensemble.

use std::time::Duration;

use zelect_core::OrderKey;
use zelect_engine::{ElectionConfig, ElectionState, LeaderReason, LeadershipResult};
use zelect_testing::ElectionTestHarness;

const WAIT: Duration = Duration::from_secs(2);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Exactly one of several concurrent candidates wins: the smallest key
#[tokio::test]
async fn test_single_winner() {
    init_logging();

    let harness = ElectionTestHarness::new(ElectionConfig::default()).await.unwrap();
    let participants = harness.spawn_participants(5).await.unwrap();

    assert_eq!(harness.wait_for_leader(WAIT).await, Some(participants[0]));
    settle().await;

    assert_eq!(harness.leaders(), vec![participants[0]]);
    for &follower in &participants[1..] {
        assert_eq!(harness.state(follower), Some(ElectionState::Watching));
    }
    assert_eq!(harness.safety_violations(), 0);

    harness.shutdown().await;
}

/// Leadership passes strictly in order-key order as leaders die
#[tokio::test]
async fn test_succession_follows_order_keys() {
    init_logging();

    let harness = ElectionTestHarness::new(ElectionConfig::default()).await.unwrap();
    harness.ensemble().set_sequence("/election", 5).unwrap();
    let participants = harness.spawn_participants(3).await.unwrap();

    let keys: Vec<OrderKey> = participants
        .iter()
        .map(|&p| harness.candidate(p).unwrap().order_key)
        .collect();
    assert_eq!(keys, vec![OrderKey::new(5), OrderKey::new(6), OrderKey::new(7)]);

    let first = harness.wait_for_leader(WAIT).await.unwrap();
    assert_eq!(first, participants[0]);

    assert_eq!(harness.kill_leader(), Some(participants[0]));
    let second = harness.wait_for_new_leader(Some(first), WAIT).await.unwrap();
    assert_eq!(second, participants[1]);

    assert_eq!(harness.kill_leader(), Some(participants[1]));
    let third = harness.wait_for_new_leader(Some(second), WAIT).await.unwrap();
    assert_eq!(third, participants[2]);

    let Ok(LeadershipResult::Leader(leadership)) = harness.join(third).await.unwrap() else {
        panic!("last candidate should have won");
    };
    assert_eq!(leadership.candidate.order_key, OrderKey::new(7));
    assert_eq!(leadership.reason, LeaderReason::SoleCandidate);

    let history: Vec<usize> = harness
        .leader_history()
        .iter()
        .map(|record| record.participant)
        .collect();
    assert_eq!(history, participants);
    assert_eq!(harness.safety_violations(), 0);

    harness.shutdown().await;
}

/// Keys ranked numerically once the counter outgrows ten digits
#[tokio::test]
async fn test_succession_across_sequence_width() {
    init_logging();

    let harness = ElectionTestHarness::new(ElectionConfig::default()).await.unwrap();
    harness.ensemble().set_sequence("/election", 9_999_999_999).unwrap();
    let participants = harness.spawn_participants(3).await.unwrap();

    let keys: Vec<OrderKey> = participants
        .iter()
        .map(|&p| harness.candidate(p).unwrap().order_key)
        .collect();
    assert_eq!(
        keys,
        vec![
            OrderKey::new(9_999_999_999),
            OrderKey::new(10_000_000_000),
            OrderKey::new(10_000_000_001),
        ]
    );
    assert!(harness
        .candidate(participants[1])
        .unwrap()
        .name
        .ends_with("-10000000000"));

    let first = harness.wait_for_leader(WAIT).await.unwrap();
    assert_eq!(first, participants[0]);
    settle().await;
    assert_eq!(harness.leaders(), vec![participants[0]]);

    assert_eq!(harness.kill_leader(), Some(participants[0]));
    let second = harness.wait_for_new_leader(Some(first), WAIT).await.unwrap();
    assert_eq!(second, participants[1]);
    assert_eq!(harness.safety_violations(), 0);

    harness.shutdown().await;
}

/// A waiter whose predecessors all vanish wins as the sole candidate
#[tokio::test]
async fn test_sole_survivor_wins() {
    init_logging();

    let harness = ElectionTestHarness::new(ElectionConfig::default()).await.unwrap();
    let participants = harness.spawn_participants(3).await.unwrap();
    harness.wait_for_leader(WAIT).await.unwrap();

    // Remove the middle waiter first; the last one keeps waiting
    assert!(harness.expire(participants[1]));
    settle().await;
    assert_eq!(harness.leaders(), vec![participants[0]]);
    assert_eq!(harness.state(participants[2]), Some(ElectionState::Watching));

    harness.kill_leader();
    assert_eq!(
        harness.wait_for_new_leader(Some(participants[0]), WAIT).await,
        Some(participants[2])
    );
    assert_eq!(
        harness.ensemble().children_of("/election"),
        vec![harness.candidate(participants[2]).unwrap().name]
    );

    harness.shutdown().await;
}

/// No follower claims leadership while the leader's node is alive
#[tokio::test]
async fn test_no_false_leadership() {
    init_logging();

    let harness = ElectionTestHarness::new(ElectionConfig::default()).await.unwrap();
    let participants = harness.spawn_participants(4).await.unwrap();
    harness.wait_for_leader(WAIT).await.unwrap();

    // Churn among followers wakes every waiter without changing the minimum
    for _ in 0..3 {
        harness.add_participant().await.unwrap();
        settle().await;
    }
    harness.expire(participants[3]);
    settle().await;

    assert_eq!(harness.leaders(), vec![participants[0]]);
    assert_eq!(harness.leader_history().len(), 1);
    assert_eq!(harness.safety_violations(), 0);

    let failures = harness.shutdown().await;
    // The expired follower is the only engine that failed
    assert_eq!(failures, 1);
}

/// Cancelling a waiter aborts it without granting leadership
#[tokio::test]
async fn test_cancel_waiting_participant() {
    init_logging();

    let harness = ElectionTestHarness::new(ElectionConfig::default()).await.unwrap();
    let participants = harness.spawn_participants(3).await.unwrap();
    harness.wait_for_leader(WAIT).await.unwrap();
    settle().await;
    assert_eq!(harness.ensemble().pending_watches("/election"), 2);

    harness.cancel(participants[2]);
    let result = harness.join(participants[2]).await.unwrap().unwrap();
    assert_eq!(result, LeadershipResult::Aborted);
    assert_eq!(harness.state(participants[2]), Some(ElectionState::Aborted));
    assert_eq!(harness.ensemble().pending_watches("/election"), 1);

    // Its node stays until the session ends, so it still orders after the leader
    assert_eq!(harness.ensemble().children_of("/election").len(), 3);

    harness.kill_leader();
    assert_eq!(
        harness.wait_for_new_leader(Some(participants[0]), WAIT).await,
        Some(participants[1])
    );

    harness.shutdown().await;
}

/// Literal mode: the smallest candidate still waits for a notification
#[tokio::test]
async fn test_wait_first_mode_needs_a_notification() {
    init_logging();

    let config = ElectionConfig::default().with_evaluate_before_wait(false);
    let harness = ElectionTestHarness::new(config).await.unwrap();
    let participants = harness.spawn_participants(2).await.unwrap();
    settle().await;

    // Neither is sole, so both block
    assert!(harness.leaders().is_empty());

    // Any membership change wakes the smallest key, which then wins
    harness.add_participant().await.unwrap();
    assert_eq!(harness.wait_for_leader(WAIT).await, Some(participants[0]));

    harness.shutdown().await;
}

/// Unprotected node names order exactly like protected ones
#[tokio::test]
async fn test_unprotected_names() {
    init_logging();

    let config = ElectionConfig::default().with_protected(false);
    let harness = ElectionTestHarness::new(config).await.unwrap();
    let participants = harness.spawn_participants(3).await.unwrap();

    assert_eq!(harness.wait_for_leader(WAIT).await, Some(participants[0]));
    assert!(harness
        .ensemble()
        .children_of("/election")
        .iter()
        .all(|name| name.starts_with("n_")));

    harness.shutdown().await;
}
