//! An election supervised the way a long-running service would run it.
//!
//! The ensemble starts out unreachable, so the elector retries with backoff
//! until it comes up. A second, incumbent participant holds leadership for a
//! while; Ctrl-C at any point cancels the wait cleanly.

use std::time::Duration;
use tracing::{info, warn};
use zelect_core::{CoordinationService, InMemoryEnsemble};
use zelect_engine::{cancellation, ElectionConfig, ElectionOutcome, Elector, RetryPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = ElectionConfig::default()
        .with_election_path("/services/scheduler/leader")
        .with_session_timeout(Duration::from_secs(5));
    let ensemble = InMemoryEnsemble::with_endpoint(config.endpoint.clone());
    ensemble.set_available(false);

    let (cancel, signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling election");
            cancel.cancel();
        }
    });

    // Incumbent: wins first once the ensemble is reachable
    let incumbent = Elector::new(ensemble.connector(), config.clone())?
        .with_retry_policy(RetryPolicy::new().with_max_retries(20))
        .with_cancel(signal.clone());
    let standby = Elector::new(ensemble.connector(), config)?
        .with_retry_policy(RetryPolicy::new().with_max_retries(20))
        .with_cancel(signal);

    let outage = ensemble.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        outage.set_available(true);
    });

    let incumbent = tokio::spawn(async move { incumbent.run().await });
    let incumbent_outcome = incumbent.await??;

    let standby_stats = {
        let standby_task = tokio::spawn(async move {
            let outcome = standby.run().await;
            (outcome, standby.stats())
        });

        match incumbent_outcome {
            ElectionOutcome::Leader { session, leadership } => {
                println!(
                    "👑 incumbent leads as {} after {} notification(s)",
                    leadership.candidate.global_id, leadership.notifications
                );
                tokio::time::sleep(Duration::from_secs(1)).await;
                info!("Incumbent stepping down");
                session.close().await?;
            }
            ElectionOutcome::Aborted => println!("⏹ incumbent aborted"),
        }

        let (outcome, stats) = standby_task.await?;
        match outcome? {
            ElectionOutcome::Leader { leadership, .. } => println!(
                "👑 standby took over as {} ({:?})",
                leadership.candidate.global_id, leadership.reason
            ),
            ElectionOutcome::Aborted => println!("⏹ standby aborted"),
        }
        stats
    };

    println!(
        "📊 standby: {} registration(s), {} fetch(es), {} notification(s), {} re-arm(s)",
        standby_stats.registrations,
        standby_stats.fetches,
        standby_stats.notifications_received,
        standby_stats.rearms
    );
    Ok(())
}
