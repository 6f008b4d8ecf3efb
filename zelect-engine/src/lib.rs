//! # Zelect Engine
//!
//! Candidate registration and the watch-driven election state machine.
//!
//! A participant registers one ephemeral sequential node under the election
//! path, then repeatedly fetches the sibling list with a one-shot child watch
//! until it holds the smallest order key. Leadership is final for the life of
//! the session; losing the session is how a leader steps down.
//!
//! ## Key Components
//!
//! - **CandidateRegistrar**: creates the candidate node, with protected-name recovery
//! - **ElectionEngine**: the Registering → Watching → Evaluating → Leader state machine
//! - **Elector**: connect, bootstrap, register and elect, retrying transient failures
//! - **ElectionConfig**: endpoint, session timeout, election path and behaviour flags
//! - **CancelHandle / CancelSignal**: cooperative abort of a waiting election
//!
//! ## Example Usage
//!
//! ```rust
//! use zelect_core::InMemoryEnsemble;
//! use zelect_engine::{ElectionConfig, ElectionOutcome, Elector};
//!
//! #[tokio::main]
//! async fn main() {
//!     let ensemble = InMemoryEnsemble::new();
//!     let elector = Elector::new(ensemble.connector(), ElectionConfig::default()).unwrap();
//!
//!     match elector.run().await.unwrap() {
//!         ElectionOutcome::Leader { leadership, .. } => {
//!             println!("leading as {}", leadership.candidate.global_id);
//!         }
//!         ElectionOutcome::Aborted => println!("aborted"),
//!     }
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod elector;
pub mod engine;
pub mod registrar;
pub mod retry;
pub mod state;

pub use cancel::*;
pub use config::*;
pub use elector::*;
pub use engine::*;
pub use registrar::*;
pub use retry::*;
pub use state::*;
