//! Decision graph memory.
//!
//! Every completed deliberation persists as a `DecisionNode` with
//! participant stances and, once the background worker has run, pairwise
//! similarity edges to earlier decisions. New questions pull a
//! token-budgeted context block assembled from the most relevant past
//! decisions, so the graph feeds forward into future debates.
//!
//! ## Example
//!
//! ```rust,ignore
//! use counsel_core::graph::{DecisionStore, Retriever};
//!
//! let store = DecisionStore::open("decisions.db")?;
//! let recent = store.get_recent(10)?;
//! ```

mod cache;
mod integration;
mod maintenance;
mod query;
mod retrieval;
mod schema;
mod store;
mod types;
mod worker;

pub use cache::{CacheStats, SimilarityCache, TierStats};
pub use integration::{question_hash, GraphIntegration};
pub use maintenance::{GraphStats, HealthReport, HealthStatus, MaintenanceMonitor};
pub use query::{Contradiction, DecisionQuery, PatternReport};
pub use retrieval::{adaptive_k, RetrievalOutcome, Retriever, Tier};
pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use store::DecisionStore;
pub use types::{
    normalize_question, DecisionId, DecisionNode, DecisionSimilarity, ParticipantStance,
};
pub use worker::{compute_edges, JobQueue, SimilarityJob, SimilarityWorker};
