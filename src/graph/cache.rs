//! Two-tier LRU cache for retrieval results and embeddings.
//!
//! - **L1 query cache**: formatted retrieval outcomes keyed by
//!   (normalized question, threshold, top-k, budget). TTL'd, and
//!   invalidated wholesale whenever a new decision is persisted.
//! - **L2 embedding cache**: embedding vectors keyed by (normalized
//!   question, embedding version). No TTL; a version change at restart
//!   invalidates it naturally.
//!
//! Operations are microsecond-scale, so each tier is a plain mutex
//! around a map with access-ordered eviction.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::retrieval::RetrievalOutcome;

/// Per-tier counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

impl TierStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Combined view over both tiers.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub query: TierStats,
    pub embedding: TierStats,
}

impl CacheStats {
    /// Hit rate across both tiers together.
    pub fn combined_hit_rate(&self) -> f64 {
        let hits = self.query.hits + self.embedding.hits;
        let total = hits + self.query.misses + self.embedding.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_access: u64,
}

struct Tier<V> {
    entries: HashMap<String, Entry<V>>,
    capacity: usize,
    ttl: Option<Duration>,
    clock: u64,
    stats: TierStats,
}

impl<V: Clone> Tier<V> {
    fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
            clock: 0,
            stats: TierStats::default(),
        }
    }

    fn get(&mut self, key: &str) -> Option<V> {
        self.clock += 1;
        let expired = match self.entries.get(key) {
            Some(entry) => match self.ttl {
                Some(ttl) => entry.inserted_at.elapsed() > ttl,
                None => false,
            },
            None => {
                self.stats.misses += 1;
                self.stats.size = self.entries.len();
                return None;
            }
        };

        if expired {
            self.entries.remove(key);
            self.stats.misses += 1;
            self.stats.size = self.entries.len();
            return None;
        }

        let clock = self.clock;
        let entry = self.entries.get_mut(key).expect("checked above");
        entry.last_access = clock;
        self.stats.hits += 1;
        Some(entry.value.clone())
    }

    fn put(&mut self, key: String, value: V) {
        self.clock += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            // Evict the least recently used entry
            if let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone())
            {
                self.entries.remove(&victim);
                self.stats.evictions += 1;
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                last_access: self.clock,
            },
        );
        self.stats.size = self.entries.len();
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.stats.size = 0;
    }
}

/// Hash a list of key components into a stable cache key.
pub fn cache_key(components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for component in components {
        hasher.update(component.as_bytes());
        hasher.update(b"\x1f");
    }
    format!("{:x}", hasher.finalize())
}

/// The shared similarity cache, both tiers.
pub struct SimilarityCache {
    queries: Mutex<Tier<RetrievalOutcome>>,
    embeddings: Mutex<Tier<Vec<f32>>>,
}

impl SimilarityCache {
    pub fn new(query_capacity: usize, embedding_capacity: usize, query_ttl: Duration) -> Self {
        Self {
            queries: Mutex::new(Tier::new(query_capacity, Some(query_ttl))),
            embeddings: Mutex::new(Tier::new(embedding_capacity, None)),
        }
    }

    /// L1 key for a retrieval request.
    pub fn query_key(
        normalized_question: &str,
        threshold: f64,
        top_k: usize,
        budget: usize,
    ) -> String {
        cache_key(&[
            normalized_question,
            &format!("{:.6}", threshold),
            &top_k.to_string(),
            &budget.to_string(),
        ])
    }

    /// L2 key for an embedding.
    pub fn embedding_key(normalized_question: &str, embedding_version: &str) -> String {
        cache_key(&[normalized_question, embedding_version])
    }

    pub fn get_query(&self, key: &str) -> Option<RetrievalOutcome> {
        self.queries.lock().expect("query cache poisoned").get(key)
    }

    pub fn put_query(&self, key: String, outcome: RetrievalOutcome) {
        self.queries
            .lock()
            .expect("query cache poisoned")
            .put(key, outcome);
    }

    /// Event-based invalidation: called whenever a decision is persisted.
    pub fn invalidate_queries(&self) {
        self.queries.lock().expect("query cache poisoned").clear();
    }

    pub fn get_embedding(&self, key: &str) -> Option<Vec<f32>> {
        self.embeddings
            .lock()
            .expect("embedding cache poisoned")
            .get(key)
    }

    pub fn put_embedding(&self, key: String, vector: Vec<f32>) {
        self.embeddings
            .lock()
            .expect("embedding cache poisoned")
            .put(key, vector);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            query: self.queries.lock().expect("query cache poisoned").stats.clone(),
            embedding: self
                .embeddings
                .lock()
                .expect("embedding cache poisoned")
                .stats
                .clone(),
        }
    }
}
