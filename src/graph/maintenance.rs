//! Non-critical observation of the decision store.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::store::DecisionStore;
use crate::error::Result;

/// Node count above which growth warnings fire.
const DEFAULT_GROWTH_WARN_NODES: usize = 5000;

/// Aggregate store statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub avg_similarity: f64,
    pub db_bytes: u64,
}

/// Health probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
}

/// Watches the store; never on the request path.
pub struct MaintenanceMonitor {
    store: Arc<DecisionStore>,
    growth_warn_nodes: usize,
}

impl MaintenanceMonitor {
    pub fn new(store: Arc<DecisionStore>) -> Self {
        Self {
            store,
            growth_warn_nodes: DEFAULT_GROWTH_WARN_NODES,
        }
    }

    pub fn with_growth_warn_threshold(mut self, nodes: usize) -> Self {
        self.growth_warn_nodes = nodes;
        self
    }

    /// Collect stats, emitting a growth warning past the threshold.
    pub fn get_stats(&self) -> Result<GraphStats> {
        let node_count = self.store.count()?;
        if node_count > self.growth_warn_nodes {
            warn!(
                node_count,
                threshold = self.growth_warn_nodes,
                "decision graph exceeds growth threshold"
            );
        }

        Ok(GraphStats {
            node_count,
            edge_count: self.store.edge_count()?,
            avg_similarity: self.store.avg_similarity()?,
            db_bytes: self.store.db_bytes(),
        })
    }

    /// Connectivity, schema presence, and table readability checks.
    pub fn health_check(&self) -> HealthReport {
        let mut issues = Vec::new();

        match self.store.probe_tables() {
            Ok(table_issues) => issues.extend(table_issues),
            Err(error) => issues.push(format!("store unreachable: {}", error)),
        }

        HealthReport {
            status: if issues.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            issues,
        }
    }
}
