//! Runtime configuration for the deliberation engine.
//!
//! Configuration *file* parsing and credential resolution live outside the
//! crate; hosts construct these structs however they like. Every field has
//! a serde default so partially-specified documents deserialize cleanly.

use serde::{Deserialize, Serialize};

/// Convergence detection thresholds and gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// Whether round-over-round convergence detection runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Average similarity at or above this is `converged`.
    #[serde(default = "default_semantic_threshold")]
    pub semantic_similarity_threshold: f64,
    /// Average similarity below this is `diverging`.
    #[serde(default = "default_divergence_threshold")]
    pub divergence_threshold: f64,
    /// Number of exempt rounds; the first check happens at round
    /// `min_rounds_before_check + 1`.
    #[serde(default = "default_min_rounds_before_check")]
    pub min_rounds_before_check: u32,
    /// Stable (delta < 0.05) non-converged rounds before declaring impasse.
    #[serde(default = "default_consecutive_stable_rounds")]
    pub consecutive_stable_rounds: u32,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            semantic_similarity_threshold: 0.85,
            divergence_threshold: 0.40,
            min_rounds_before_check: 1,
            consecutive_stable_rounds: 2,
        }
    }
}

/// Model-controlled early stopping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStoppingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fraction of round participants voting `continue_debate=false`
    /// at or above which the loop stops.
    #[serde(default = "default_early_stop_threshold")]
    pub threshold: f64,
    /// When set, early stop is deferred until `defaults.rounds` have run.
    #[serde(default = "default_true")]
    pub respect_min_rounds: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.66,
            respect_min_rounds: true,
        }
    }
}

/// Decision graph retrieval and context formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionGraphConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Noise floor: candidates scoring below this are never injected.
    /// Legacy key name retained for config compatibility; the key
    /// historically carried 0.60, which is now the moderate tier
    /// boundary, not the floor.
    #[serde(default = "default_noise_floor")]
    pub similarity_threshold: f64,
    /// Upper bound on estimated tokens for the injected context block.
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,
    #[serde(default)]
    pub tier_boundaries: TierBoundaries,
}

impl Default for DecisionGraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.40,
            context_token_budget: 1500,
            tier_boundaries: TierBoundaries::default(),
        }
    }
}

/// Score boundaries separating STRONG / MODERATE / BRIEF context tiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierBoundaries {
    #[serde(default = "default_tier_strong")]
    pub strong: f64,
    #[serde(default = "default_tier_moderate")]
    pub moderate: f64,
}

impl Default for TierBoundaries {
    fn default() -> Self {
        Self {
            strong: 0.75,
            moderate: 0.60,
        }
    }
}

/// Two-tier similarity cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_query_cache_size")]
    pub query_cache_size: usize,
    #[serde(default = "default_embedding_cache_size")]
    pub embedding_cache_size: usize,
    #[serde(default = "default_query_ttl_seconds")]
    pub query_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            query_cache_size: 200,
            embedding_cache_size: 500,
            query_ttl_seconds: 300,
        }
    }
}

/// Round-count and timing defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default (and early-stop minimum) number of rounds.
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Hard ceiling on requested rounds.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Per-round adapter deadline in seconds.
    #[serde(default = "default_timeout_per_round")]
    pub timeout_per_round: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            rounds: 2,
            max_rounds: 5,
            timeout_per_round: 300,
        }
    }
}

/// Host transport shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Rounds of `full_debate` kept in the response before truncation.
    #[serde(default = "default_max_rounds_in_response")]
    pub max_rounds_in_response: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_rounds_in_response: 3,
        }
    }
}

/// Background similarity worker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bounded job queue capacity; overflow drops jobs, never blocks.
    #[serde(default = "default_worker_queue_capacity")]
    pub queue_capacity: usize,
    /// Recent decisions compared against each new source.
    #[serde(default = "default_worker_candidates")]
    pub candidate_limit: usize,
    /// Outgoing edges kept per decision, by score.
    #[serde(default = "default_edge_top_n")]
    pub edges_per_decision: usize,
    /// Candidate window for the synchronous fallback path.
    #[serde(default = "default_sync_fallback_candidates")]
    pub sync_fallback_candidates: usize,
    /// Hard cap in milliseconds for the synchronous fallback path.
    #[serde(default = "default_sync_fallback_cap_ms")]
    pub sync_fallback_cap_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1000,
            candidate_limit: 100,
            edges_per_decision: 20,
            sync_fallback_candidates: 50,
            sync_fallback_cap_ms: 500,
        }
    }
}

/// Evidence tool execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Per-invocation deadline in seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    /// Ceiling on readable file size in bytes, checked before reading.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Per-record cap on result text injected into the next round.
    #[serde(default = "default_result_cap_bytes")]
    pub result_cap_bytes: usize,
    /// Concurrent tool executions within a round.
    #[serde(default = "default_tool_parallelism")]
    pub max_parallel: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_file_bytes: 1024 * 1024,
            result_cap_bytes: 4096,
            max_parallel: 4,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub convergence_detection: ConvergenceConfig,
    #[serde(default)]
    pub early_stopping: EarlyStoppingConfig,
    #[serde(default)]
    pub decision_graph: DecisionGraphConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub tools: ToolConfig,
}

fn default_true() -> bool {
    true
}
fn default_semantic_threshold() -> f64 {
    0.85
}
fn default_divergence_threshold() -> f64 {
    0.40
}
fn default_min_rounds_before_check() -> u32 {
    1
}
fn default_consecutive_stable_rounds() -> u32 {
    2
}
fn default_early_stop_threshold() -> f64 {
    0.66
}
fn default_noise_floor() -> f64 {
    0.40
}
fn default_context_token_budget() -> usize {
    1500
}
fn default_tier_strong() -> f64 {
    0.75
}
fn default_tier_moderate() -> f64 {
    0.60
}
fn default_query_cache_size() -> usize {
    200
}
fn default_embedding_cache_size() -> usize {
    500
}
fn default_query_ttl_seconds() -> u64 {
    300
}
fn default_rounds() -> u32 {
    2
}
fn default_max_rounds() -> u32 {
    5
}
fn default_timeout_per_round() -> u64 {
    300
}
fn default_max_rounds_in_response() -> usize {
    3
}
fn default_worker_queue_capacity() -> usize {
    1000
}
fn default_worker_candidates() -> usize {
    100
}
fn default_edge_top_n() -> usize {
    20
}
fn default_sync_fallback_candidates() -> usize {
    50
}
fn default_sync_fallback_cap_ms() -> u64 {
    500
}
fn default_tool_timeout_secs() -> u64 {
    10
}
fn default_max_file_bytes() -> u64 {
    1024 * 1024
}
fn default_result_cap_bytes() -> usize {
    4096
}
fn default_tool_parallelism() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.convergence_detection.semantic_similarity_threshold, 0.85);
        assert_eq!(config.convergence_detection.divergence_threshold, 0.40);
        assert_eq!(config.convergence_detection.min_rounds_before_check, 1);
        assert_eq!(config.convergence_detection.consecutive_stable_rounds, 2);
        assert_eq!(config.early_stopping.threshold, 0.66);
        assert!(config.early_stopping.respect_min_rounds);
        assert_eq!(config.decision_graph.context_token_budget, 1500);
        assert_eq!(config.decision_graph.tier_boundaries.strong, 0.75);
        assert_eq!(config.decision_graph.tier_boundaries.moderate, 0.60);
        assert_eq!(config.cache.query_cache_size, 200);
        assert_eq!(config.cache.embedding_cache_size, 500);
        assert_eq!(config.cache.query_ttl_seconds, 300);
        assert_eq!(config.worker.queue_capacity, 1000);
        assert_eq!(config.worker.edges_per_decision, 20);
        assert_eq!(config.tools.timeout_secs, 10);
        assert_eq!(config.tools.max_file_bytes, 1024 * 1024);
    }

    #[test]
    fn test_partial_document_deserializes_with_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"early_stopping": {"threshold": 0.75}, "defaults": {"rounds": 3}}"#,
        )
        .unwrap();

        assert_eq!(config.early_stopping.threshold, 0.75);
        assert!(config.early_stopping.enabled);
        assert_eq!(config.defaults.rounds, 3);
        assert_eq!(config.defaults.max_rounds, 5);
        assert_eq!(config.transport.max_rounds_in_response, 3);
    }
}
