//! Background computation of similarity edges.
//!
//! New decisions get their outgoing edges off the request path: a
//! bounded priority queue feeds a worker task that scores the source
//! against recent candidates, persists the strongest edges, and
//! invalidates the L1 query cache. Queue overflow drops the
//! lowest-priority oldest job and counts it; producers never block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::cache::SimilarityCache;
use super::store::DecisionStore;
use super::types::{DecisionId, DecisionSimilarity};
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::similarity::{clamp_unit, SimilarityBackend};

/// Soft deadline per job.
const JOB_DEADLINE: Duration = Duration::from_secs(10);

/// A queued similarity-computation job.
#[derive(Debug, Clone)]
pub struct SimilarityJob {
    pub source_id: DecisionId,
    pub priority: u8,
    seq: u64,
}

struct QueueState {
    jobs: VecDeque<SimilarityJob>,
    closed: bool,
}

/// Bounded priority queue: dequeues highest priority first, FIFO within
/// a priority.
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    next_seq: AtomicU64,
    overflow: AtomicU64,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
            next_seq: AtomicU64::new(0),
            overflow: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking. Returns false when the queue is closed.
    pub fn push(&self, source_id: DecisionId, priority: u8) -> bool {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().expect("queue lock poisoned");
        if state.closed {
            return false;
        }

        if state.jobs.len() >= self.capacity {
            // Drop the lowest-priority oldest job
            if let Some(victim) = state
                .jobs
                .iter()
                .enumerate()
                .min_by_key(|(_, job)| (job.priority, job.seq))
                .map(|(index, _)| index)
            {
                state.jobs.remove(victim);
                self.overflow.fetch_add(1, Ordering::SeqCst);
                warn!("similarity job queue overflow, dropped one job");
            }
        }

        state.jobs.push_back(SimilarityJob {
            source_id,
            priority,
            seq,
        });
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Dequeue the next job; `None` once closed and drained.
    pub async fn pop(&self) -> Option<SimilarityJob> {
        loop {
            {
                let mut state = self.state.lock().expect("queue lock poisoned");
                if let Some(index) = state
                    .jobs
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, job)| (job.priority, std::cmp::Reverse(job.seq)))
                    .map(|(index, _)| index)
                {
                    return state.jobs.remove(index);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting new jobs; pending jobs remain poppable.
    pub fn close(&self) {
        self.state.lock().expect("queue lock poisoned").closed = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs dropped due to overflow.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::SeqCst)
    }
}

/// Compute the outgoing edges for `source_id` against up to
/// `candidate_limit` recent decisions, optionally bounded by a hard cap
/// on elapsed time. Scores are clamped before they leave here.
pub fn compute_edges(
    store: &DecisionStore,
    backend: &dyn SimilarityBackend,
    source_id: &DecisionId,
    candidate_limit: usize,
    hard_cap: Option<Duration>,
) -> Result<Vec<DecisionSimilarity>> {
    let Some(source) = store.get_decision(source_id)? else {
        return Ok(Vec::new());
    };

    let started = Instant::now();
    let mut edges = Vec::new();
    for candidate in store.get_recent(candidate_limit)? {
        if candidate.id == *source_id {
            continue;
        }
        if let Some(cap) = hard_cap {
            if started.elapsed() >= cap {
                debug!(source = %source_id, "edge computation hit hard cap");
                break;
            }
        }
        let score = backend.similarity(&source.question, &candidate.question)?;
        edges.push(DecisionSimilarity {
            source_id: source_id.clone(),
            target_id: candidate.id.clone(),
            score: clamp_unit(score),
        });
    }
    Ok(edges)
}

/// The background worker: one queue, one compute task.
pub struct SimilarityWorker {
    queue: Arc<JobQueue>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SimilarityWorker {
    /// Spawn the worker task.
    pub fn start(
        store: Arc<DecisionStore>,
        cache: Arc<SimilarityCache>,
        backend: Arc<dyn SimilarityBackend>,
        config: WorkerConfig,
    ) -> Self {
        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let worker_queue = Arc::clone(&queue);

        let handle = tokio::spawn(async move {
            while let Some(job) = worker_queue.pop().await {
                let outcome = timeout(
                    JOB_DEADLINE,
                    process_job(&store, &cache, backend.as_ref(), &config, &job),
                )
                .await;
                match outcome {
                    Ok(Ok(edge_count)) => {
                        debug!(source = %job.source_id, edges = edge_count, "similarity job done");
                    }
                    Ok(Err(error)) => {
                        warn!(source = %job.source_id, %error, "similarity job failed");
                    }
                    Err(_) => {
                        warn!(source = %job.source_id, "similarity job exceeded deadline");
                    }
                }
            }
        });

        Self {
            queue,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue edge computation for a freshly persisted decision.
    pub fn enqueue(&self, source_id: DecisionId, priority: u8) -> bool {
        self.queue.push(source_id, priority)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn overflow_count(&self) -> u64 {
        self.queue.overflow_count()
    }

    /// Graceful shutdown: stop accepting, drain within the deadline,
    /// then abort whatever is left. Partial progress is acceptable.
    pub async fn shutdown(&self, deadline: Duration) {
        self.queue.close();
        let handle = self.handle.lock().expect("handle lock poisoned").take();
        if let Some(handle) = handle {
            if timeout(deadline, handle).await.is_err() {
                warn!("similarity worker did not drain before deadline");
            }
        }
    }
}

async fn process_job(
    store: &DecisionStore,
    cache: &SimilarityCache,
    backend: &dyn SimilarityBackend,
    config: &WorkerConfig,
    job: &SimilarityJob,
) -> Result<usize> {
    let edges = compute_edges(store, backend, &job.source_id, config.candidate_limit, None)?;
    store.replace_similarities(&job.source_id, &edges, config.edges_per_decision)?;
    // Readers must not see pre-edge retrieval results after this point
    cache.invalidate_queries();
    Ok(edges.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::DecisionNode;
    use crate::similarity::TokenOverlapBackend;

    fn seeded_store(questions: &[&str]) -> (Arc<DecisionStore>, Vec<DecisionNode>) {
        let store = Arc::new(DecisionStore::in_memory().unwrap());
        let nodes: Vec<DecisionNode> = questions
            .iter()
            .map(|question| {
                let node = DecisionNode::new(*question, "tie");
                store.save_decision(&node, &[]).unwrap();
                node
            })
            .collect();
        (store, nodes)
    }

    #[test]
    fn test_queue_priority_then_fifo() {
        let queue = JobQueue::new(10);
        queue.push(DecisionId::parse("low-1"), 0);
        queue.push(DecisionId::parse("high"), 5);
        queue.push(DecisionId::parse("low-2"), 0);

        let order: Vec<String> = futures::executor::block_on(async {
            let mut out = Vec::new();
            for _ in 0..3 {
                out.push(queue.pop().await.unwrap().source_id.to_string());
            }
            out
        });
        assert_eq!(order, vec!["high", "low-1", "low-2"]);
    }

    #[test]
    fn test_queue_overflow_drops_lowest_priority_oldest() {
        let queue = JobQueue::new(2);
        queue.push(DecisionId::parse("old-low"), 0);
        queue.push(DecisionId::parse("high"), 5);
        // Full: pushing drops "old-low" (lowest priority, oldest)
        queue.push(DecisionId::parse("new-low"), 0);

        assert_eq!(queue.overflow_count(), 1);
        assert_eq!(queue.len(), 2);

        let remaining: Vec<String> = futures::executor::block_on(async {
            let mut out = Vec::new();
            while !queue.is_empty() {
                out.push(queue.pop().await.unwrap().source_id.to_string());
            }
            out
        });
        assert!(remaining.contains(&"high".to_string()));
        assert!(remaining.contains(&"new-low".to_string()));
    }

    #[test]
    fn test_closed_queue_rejects_pushes() {
        let queue = JobQueue::new(2);
        queue.close();
        assert!(!queue.push(DecisionId::parse("x"), 0));
    }

    #[test]
    fn test_compute_edges_skips_self_and_clamps() {
        let (store, nodes) = seeded_store(&[
            "should we use rust for the backend",
            "should we use rust for the frontend",
            "completely unrelated topic",
        ]);
        let backend = TokenOverlapBackend::new();

        let edges = compute_edges(&store, &backend, &nodes[0].id, 100, None).unwrap();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|edge| edge.target_id != nodes[0].id));
        assert!(edges.iter().all(|edge| (0.0..=1.0).contains(&edge.score)));
    }

    #[test]
    fn test_compute_edges_missing_source() {
        let (store, _) = seeded_store(&["q"]);
        let backend = TokenOverlapBackend::new();
        let edges =
            compute_edges(&store, &backend, &DecisionId::parse("ghost"), 100, None).unwrap();
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn test_worker_persists_edges_and_invalidates_cache() {
        let (store, nodes) = seeded_store(&[
            "should we use rust for the backend",
            "should we use rust for the frontend",
        ]);
        let cache = Arc::new(SimilarityCache::new(10, 10, Duration::from_secs(300)));

        // Pre-populate L1 so invalidation is observable
        let key = SimilarityCache::query_key("stale", 0.4, 5, 1500);
        cache.put_query(
            key.clone(),
            super::super::retrieval::RetrievalOutcome {
                context_block: "stale".to_string(),
                decisions: Vec::new(),
                strong_count: 0,
                moderate_count: 0,
                brief_count: 0,
                estimated_tokens: 0,
            },
        );

        let worker = SimilarityWorker::start(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::new(TokenOverlapBackend::new()),
            WorkerConfig::default(),
        );

        assert!(worker.enqueue(nodes[0].id.clone(), 1));
        worker.shutdown(Duration::from_secs(5)).await;

        let similar = store.get_similar(&nodes[0].id, 0.0, 10).unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].0.id, nodes[1].id);
        assert!(cache.get_query(&key).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_jobs() {
        let (store, nodes) = seeded_store(&["alpha beta", "alpha gamma", "alpha delta"]);
        let cache = Arc::new(SimilarityCache::new(10, 10, Duration::from_secs(300)));
        let worker = SimilarityWorker::start(
            Arc::clone(&store),
            cache,
            Arc::new(TokenOverlapBackend::new()),
            WorkerConfig::default(),
        );

        for node in &nodes {
            assert!(worker.enqueue(node.id.clone(), 0));
        }
        worker.shutdown(Duration::from_secs(5)).await;

        assert!(store.edge_count().unwrap() > 0);
        assert!(!worker.enqueue(nodes[0].id.clone(), 0));
    }

    #[test]
    fn test_sync_fallback_respects_hard_cap() {
        let (store, nodes) = seeded_store(&["a b", "a c", "a d", "a e"]);
        let backend = TokenOverlapBackend::new();

        // A zero cap stops before scoring anything
        let edges =
            compute_edges(&store, &backend, &nodes[0].id, 50, Some(Duration::ZERO)).unwrap();
        assert!(edges.is_empty());
    }
}
