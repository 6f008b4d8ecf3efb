//! Failover timing runs
//!
//! Small versions of the catalogue in [`create_failover_tests`], checked for
//! completion and for a single leader at every step.

use std::time::Duration;

use zelect_engine::ElectionConfig;
use zelect_testing::{create_failover_tests, run_failover_test, FailoverTest};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn small_field(replace_crashed: bool) -> FailoverTest {
    FailoverTest {
        name: "small".to_string(),
        description: "three candidates, two crashes".to_string(),
        participants: 3,
        failovers: 2,
        replace_crashed,
        failover_timeout: Duration::from_secs(2),
        config: ElectionConfig::default(),
    }
}

#[tokio::test]
async fn test_failover_drains_small_field() {
    init_logging();

    let test = small_field(false);
    let failovers = test.failovers;
    let result = run_failover_test(test).await.unwrap();

    assert_eq!(result.test_name, "small");
    assert_eq!(result.failovers_attempted, failovers);
    assert_eq!(result.failovers_completed, failovers);
    assert_eq!(result.safety_violations, 0);
    assert!(result.watches_fired_per_failover > 0.0);
    assert!(result.max_failover >= result.average_failover);
    assert!(result.p95_failover <= result.max_failover);
    // Bootstrap session plus one per candidate
    assert_eq!(result.ensemble_stats.sessions_opened, 4);
}

#[tokio::test]
async fn test_failover_with_replacements_keeps_field_size() {
    init_logging();

    let mut test = small_field(true);
    test.failovers = 4;
    let result = run_failover_test(test).await.unwrap();

    assert_eq!(result.failovers_completed, 4);
    assert_eq!(result.safety_violations, 0);
    assert!(result.watches_fired_per_failover > 0.0);
    // Bootstrap, three originals and one replacement per crash
    assert_eq!(result.ensemble_stats.sessions_opened, 8);
}

#[tokio::test]
async fn test_catalogue_small_field_completes() {
    init_logging();

    let test = create_failover_tests()
        .into_iter()
        .find(|test| test.participants == 3)
        .expect("catalogue has a three-candidate run");
    let failovers = test.failovers;
    let result = run_failover_test(test).await.unwrap();

    assert_eq!(result.failovers_completed, failovers);
    assert_eq!(result.safety_violations, 0);
}
