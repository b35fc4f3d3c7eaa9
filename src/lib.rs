//! # counsel-core
//!
//! A multi-model deliberation engine: several LLM back-ends debate a
//! question across structured rounds, vote on options, and converge (or
//! don't). Completed debates persist into a decision graph whose most
//! relevant entries feed context into future deliberations.
//!
//! ## Core Components
//!
//! - **Markers**: `VOTE:` / `TOOL_REQUEST:` extraction from model text
//! - **Similarity**: pluggable semantic similarity backends
//! - **Consensus**: vote aggregation and convergence detection
//! - **Tools**: sandboxed read-only evidence gathering
//! - **Adapters**: uniform invocation of CLI and HTTP LLM back-ends
//! - **Graph**: persistent decision memory with cached retrieval
//! - **Deliberation**: the orchestrating engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use counsel_core::{
//!     DeliberateRequest, DeliberationEngine, Mode, Participant,
//! };
//!
//! let request = DeliberateRequest {
//!     question: "Should error handling favor retries or fail-fast?".into(),
//!     participants: vec![
//!         Participant::new("claude", "sonnet"),
//!         Participant::new("codex", "gpt5"),
//!     ],
//!     mode: Mode::Conference,
//!     rounds: 3,
//!     context: None,
//!     working_directory: None,
//! };
//!
//! let result = engine.deliberate(request).await?;
//! println!("{:?}", result.voting_result);
//! ```

pub mod adapters;
pub mod config;
pub mod consensus;
pub mod deliberation;
pub mod error;
pub mod graph;
pub mod markers;
pub mod similarity;
pub mod tools;

// Re-exports for convenience
pub use adapters::{
    Adapter, AdapterFactory, CliAdapter, CliAdapterConfig, HttpAdapter, HttpAdapterConfig,
    ModelRegistry, PromptLengthCheck, RetryConfig,
};
pub use config::{
    CacheConfig, ConvergenceConfig, DecisionGraphConfig, DefaultsConfig, EarlyStoppingConfig,
    EngineConfig, TierBoundaries, ToolConfig, TransportConfig, WorkerConfig,
};
pub use consensus::{
    ConsensusClass, ConvergenceDetector, ConvergenceInfo, ConvergenceStatus, RoundVote,
    VoteAggregator, VotingResult,
};
pub use deliberation::{
    DeliberateRequest, DeliberationEngine, DeliberationResult, DeliberationStatus, Mode,
    Participant, RoundResponse, Stance, TranscriptWriter,
};
pub use error::{AdapterErrorKind, Error, Result};
pub use graph::{
    adaptive_k, normalize_question, question_hash, CacheStats, Contradiction, DecisionId,
    DecisionNode, DecisionQuery, DecisionSimilarity, DecisionStore, GraphIntegration, GraphStats,
    HealthReport, HealthStatus, MaintenanceMonitor, ParticipantStance, PatternReport,
    RetrievalOutcome, Retriever, SimilarityCache, SimilarityJob, SimilarityWorker, Tier,
};
pub use markers::{parse_tool_requests, parse_votes, Vote};
pub use similarity::{clamp_unit, select_backend, SimilarityBackend, TfIdfBackend, TokenOverlapBackend};
#[cfg(feature = "dense-embeddings")]
pub use similarity::DenseEmbeddingBackend;
pub use tools::{ToolExecutionRecord, ToolExecutor, ToolRequest, COMMAND_WHITELIST};
