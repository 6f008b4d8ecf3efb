//! Leader election among several in-process participants.
//!
//! Each participant runs its own `Elector` with its own session against one
//! in-memory ensemble. Whenever a leader is elected it "crashes" by closing
//! its session, and the next candidate in order-key order takes over.
//!
//! An optional first argument names a JSON file with an `ElectionConfig`.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zelect_core::{CoordinationService, InMemoryEnsemble};
use zelect_engine::{ElectionConfig, ElectionOutcome, ElectionState, Elector};

const PARTICIPANTS: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path))?;
            ElectionConfig::from_json_str(&json)?
        }
        None => ElectionConfig::default(),
    };
    info!(
        "Electing a leader among {} participants at {} on {}",
        PARTICIPANTS, config.election_path, config.endpoint
    );

    let ensemble = InMemoryEnsemble::with_endpoint(config.endpoint.clone());
    let (won_tx, mut won_rx) = mpsc::unbounded_channel();

    for participant in 0..PARTICIPANTS {
        let elector = Elector::new(ensemble.connector(), config.clone())?;

        let mut states = elector.subscribe();
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                info!("participant {} is {}", participant, state);
                if state == ElectionState::Leader || state == ElectionState::Aborted {
                    break;
                }
            }
        });

        let won_tx = won_tx.clone();
        tokio::spawn(async move {
            match elector.run().await {
                Ok(ElectionOutcome::Leader { session, leadership }) => {
                    let _ = won_tx.send((participant, session, leadership));
                }
                Ok(ElectionOutcome::Aborted) => info!("participant {} aborted", participant),
                Err(e) => warn!("participant {} failed: {}", participant, e),
            }
        });

        // Stagger registration so order keys follow participant numbers
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    drop(won_tx);

    let mut term = 0;
    while let Some((participant, session, leadership)) = won_rx.recv().await {
        term += 1;
        println!(
            "👑 term {}: participant {} leads as {} (order key {}, {:?}, {} notification(s))",
            term,
            participant,
            leadership.candidate.global_id,
            leadership.candidate.order_key,
            leadership.reason,
            leadership.notifications
        );

        // Hold leadership briefly, then step down by ending the session
        tokio::time::sleep(Duration::from_millis(100)).await;
        close_session(session).await;
    }

    let stats = ensemble.stats();
    println!(
        "📊 {} terms, {} sessions, {} watches armed, {} fired",
        term, stats.sessions_opened, stats.watches_armed, stats.watches_fired
    );
    Ok(())
}

async fn close_session<S: CoordinationService>(session: Arc<S>) {
    let id = session.session_id();
    match session.close().await {
        Ok(()) => info!("leader session {} closed", id),
        Err(e) => warn!("closing leader session {} failed: {}", id, e),
    }
}
