use std::time::{Duration, Instant};
use tracing::{info, warn};

use zelect_core::EnsembleStats;
use zelect_engine::ElectionConfig;

use crate::fault_injection::ElectionTestHarness;

/// Repeatedly crashes the leader and measures how long succession takes.
#[derive(Debug, Clone)]
pub struct FailoverTest {
    pub name: String,
    pub description: String,
    pub participants: usize,
    pub failovers: usize,
    /// Register a replacement after each crash so the field never shrinks
    pub replace_crashed: bool,
    pub failover_timeout: Duration,
    pub config: ElectionConfig,
}

#[derive(Debug)]
pub struct FailoverResult {
    pub test_name: String,
    pub failovers_attempted: usize,
    pub failovers_completed: usize,
    pub test_duration: Duration,
    pub average_failover: Duration,
    pub p95_failover: Duration,
    pub max_failover: Duration,
    pub safety_violations: usize,
    /// Watch notifications delivered per failover; grows with the field size
    pub watches_fired_per_failover: f64,
    pub ensemble_stats: EnsembleStats,
}

pub async fn run_failover_test(test: FailoverTest) -> anyhow::Result<FailoverResult> {
    info!("Running failover test: {}", test.name);
    let start_time = Instant::now();

    let harness = ElectionTestHarness::new(test.config.clone()).await?;
    harness.spawn_participants(test.participants).await?;
    let mut leader = harness.wait_for_leader(test.failover_timeout).await;
    let fired_before = harness.ensemble().stats().watches_fired;

    let mut latencies = Vec::with_capacity(test.failovers);
    for round in 0..test.failovers {
        let Some(crashed) = harness.kill_leader() else {
            warn!("Round {}: no leader to crash", round);
            break;
        };
        let crashed_at = Instant::now();
        if test.replace_crashed {
            harness.add_participant().await?;
        }

        match harness
            .wait_for_new_leader(Some(crashed), test.failover_timeout)
            .await
        {
            Some(next) => {
                latencies.push(crashed_at.elapsed());
                leader = Some(next);
            }
            None => {
                warn!("Round {}: no successor to participant {}", round, crashed);
                leader = None;
                break;
            }
        }
    }

    let ensemble_stats = harness.ensemble().stats();
    harness.shutdown().await;
    if let Some(leader) = leader {
        info!("Final leader: participant {}", leader);
    }

    latencies.sort();
    let completed = latencies.len();
    let average_failover = if completed > 0 {
        latencies.iter().sum::<Duration>() / completed as u32
    } else {
        Duration::ZERO
    };
    let percentile = |p: f64| -> Duration {
        if latencies.is_empty() {
            return Duration::ZERO;
        }
        let index = ((completed as f64 * p).ceil() as usize).clamp(1, completed) - 1;
        latencies[index]
    };
    let watches_fired = ensemble_stats.watches_fired.saturating_sub(fired_before);

    Ok(FailoverResult {
        test_name: test.name,
        failovers_attempted: test.failovers,
        failovers_completed: completed,
        test_duration: start_time.elapsed(),
        average_failover,
        p95_failover: percentile(0.95),
        max_failover: latencies.last().copied().unwrap_or_default(),
        safety_violations: harness.safety_violations(),
        watches_fired_per_failover: if completed > 0 {
            watches_fired as f64 / completed as f64
        } else {
            0.0
        },
        ensemble_stats,
    })
}

pub fn create_failover_tests() -> Vec<FailoverTest> {
    let config = ElectionConfig::default();

    vec![
        FailoverTest {
            name: "Small Field".to_string(),
            description: "Three candidates, drained to one".to_string(),
            participants: 3,
            failovers: 2,
            replace_crashed: false,
            failover_timeout: Duration::from_secs(1),
            config: config.clone(),
        },
        FailoverTest {
            name: "Rolling Restart".to_string(),
            description: "Five candidates, every crashed leader rejoins at the back".to_string(),
            participants: 5,
            failovers: 20,
            replace_crashed: true,
            failover_timeout: Duration::from_secs(1),
            config: config.clone(),
        },
        FailoverTest {
            name: "Large Herd".to_string(),
            description: "Fifty candidates all watching the same parent".to_string(),
            participants: 50,
            failovers: 10,
            replace_crashed: true,
            failover_timeout: Duration::from_secs(2),
            config,
        },
    ]
}

pub async fn run_all_failover_tests() -> Vec<FailoverResult> {
    let mut results = Vec::new();
    for test in create_failover_tests() {
        let name = test.name.clone();
        match run_failover_test(test).await {
            Ok(result) => results.push(result),
            Err(e) => warn!("Failover test {} could not run: {}", name, e),
        }
    }
    results
}

pub fn print_failover_summary(results: &[FailoverResult]) {
    println!("\n=== Failover Summary ===");
    println!(
        "{:<16} {:>9} {:>12} {:>12} {:>12} {:>14}",
        "Test", "Failovers", "Avg", "P95", "Max", "Watches/fail"
    );
    for result in results {
        println!(
            "{:<16} {:>4}/{:<4} {:>12?} {:>12?} {:>12?} {:>14.1}",
            result.test_name,
            result.failovers_completed,
            result.failovers_attempted,
            result.average_failover,
            result.p95_failover,
            result.max_failover,
            result.watches_fired_per_failover
        );
        if result.safety_violations > 0 {
            println!("  !! {} safety violation(s)", result.safety_violations);
        }
    }
}
