//! # Failover Report
//!
//! Runs the fault scenario catalogue and the failover timing tests against
//! the in-memory ensemble and prints a summary of both.

use tracing::info;
use zelect_testing::{
    create_test_scenarios, print_failover_summary, run_all_failover_tests, ElectionTestHarness,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    println!("=== Fault Scenarios ===");
    let mut failed = 0;
    for scenario in create_test_scenarios() {
        let description = scenario.description.clone();
        let result = ElectionTestHarness::run_scenario(scenario).await?;
        let mark = if result.success { "✅" } else { "❌" };
        println!(
            "{} {:<24} {:>8?}  {}",
            mark, result.scenario, result.duration, description
        );
        if !result.success {
            println!("   {}", result.details);
            failed += 1;
        }
    }

    let results = run_all_failover_tests().await;
    print_failover_summary(&results);

    info!("{} scenario(s) failed", failed);
    if failed > 0 {
        anyhow::bail!("{} fault scenario(s) failed", failed);
    }
    Ok(())
}
