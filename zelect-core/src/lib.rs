//! # Zelect Core - Leader Election Building Blocks
//!
//! Core components for electing a single leader among cooperating processes
//! through a ZooKeeper-like coordination service.
//!
//! ## Components
//!
//! - **CoordinationService Trait**: ordered ephemeral nodes, child listings and one-shot child watches
//! - **SessionConnector Trait**: opens sessions against an explicit endpoint
//! - **Candidates**: order-key extraction and sibling ranking
//! - **Bootstrap**: idempotent creation of the election namespace
//! - **Error Handling**: service-level and election-level error taxonomies
//! - **In-Memory Ensemble**: a complete coordination service for tests and demos
//!
//! ## Ranking a sibling set
//!
//! ```rust
//! use zelect_core::{Candidate, SiblingSet};
//!
//! let me = Candidate::from_global_id("/election/n_0000000006").unwrap();
//! let children = vec!["n_0000000005", "n_0000000006", "n_0000000007"];
//! let siblings = SiblingSet::from_children(&children).unwrap();
//!
//! assert!(siblings.ensure_member(&me).is_ok());
//! assert!(!siblings.is_leader(&me));
//! ```

pub mod bootstrap;
pub mod candidate;
pub mod coordination;
pub mod error;
pub mod memory;
pub mod types;

// Re-export commonly used types for convenience
pub use bootstrap::ensure_path;
pub use candidate::{parse_order_key, Candidate, Sibling, SiblingSet, CANDIDATE_PREFIX};
pub use coordination::{
    protected_name_prefix, ChildWatch, CoordinationService, SessionConnector, WatchEvent,
    WatchTrigger, PROTECTED_PREFIX,
};
pub use error::*;
pub use memory::{EnsembleStats, InMemoryConnector, InMemoryEnsemble, InMemorySession};
pub use types::*;
