//! SQLite-backed decision store.
//!
//! Single-writer, many-reader: all access goes through one connection
//! guarded by a mutex, with WAL journaling so host-side readers of the
//! same file are never blocked.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::schema::{initialize_schema, is_initialized};
use super::types::{DecisionId, DecisionNode, DecisionSimilarity, ParticipantStance};
use crate::error::{Error, Result};
use crate::similarity::clamp_unit;

/// Durable persistence for decisions, stances, and similarity edges.
pub struct DecisionStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<std::path::PathBuf>,
}

impl DecisionStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn =
            Connection::open(path.as_ref()).map_err(|e| Error::storage(e.to_string()))?;

        // foreign_keys is per-connection: cascades must work on every
        // open, not just the one that created the schema.
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| Error::storage(e.to_string()))?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::storage(e.to_string()))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::storage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&mut conn).map_err(|e| Error::storage(e.to_string()))
    }

    /// Persist a decision and its stances atomically. Returns the id.
    pub fn save_decision(
        &self,
        node: &DecisionNode,
        stances: &[ParticipantStance],
    ) -> Result<DecisionId> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO decision_nodes (
                    id, question, question_normalized, consensus_status,
                    winning_option, timestamp, metadata_blob
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    node.id.to_string(),
                    node.question,
                    node.question_normalized,
                    node.consensus_status,
                    node.winning_option,
                    node.timestamp.to_rfc3339(),
                    metadata_text(&node.metadata_blob, &node.participants),
                ],
            )?;

            for stance in stances {
                tx.execute(
                    "INSERT INTO participant_stances (
                        decision_id, participant_id, vote_option, confidence, rationale
                    ) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        node.id.to_string(),
                        stance.participant_id,
                        stance.vote_option,
                        stance.confidence,
                        stance.rationale,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(node.id.clone())
        })
    }

    /// Get a decision by id.
    pub fn get_decision(&self, id: &DecisionId) -> Result<Option<DecisionNode>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, question, question_normalized, consensus_status,
                        winning_option, timestamp, metadata_blob
                 FROM decision_nodes WHERE id = ?1",
                params![id.to_string()],
                row_to_node,
            )
            .optional()
        })
    }

    /// Stances belonging to a decision, participant lexicographic.
    pub fn get_stances(&self, id: &DecisionId) -> Result<Vec<ParticipantStance>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT decision_id, participant_id, vote_option, confidence, rationale
                 FROM participant_stances WHERE decision_id = ?1
                 ORDER BY participant_id",
            )?;
            let stances = stmt
                .query_map(params![id.to_string()], |row| {
                    Ok(ParticipantStance {
                        decision_id: DecisionId::parse(&row.get::<_, String>(0)?),
                        participant_id: row.get(1)?,
                        vote_option: row.get(2)?,
                        confidence: row.get(3)?,
                        rationale: row.get(4)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(stances)
        })
    }

    /// Most recent decisions, newest first.
    pub fn get_recent(&self, limit: usize) -> Result<Vec<DecisionNode>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, question, question_normalized, consensus_status,
                        winning_option, timestamp, metadata_blob
                 FROM decision_nodes
                 ORDER BY timestamp DESC, id
                 LIMIT ?1",
            )?;
            let nodes = stmt
                .query_map(params![limit as i64], row_to_node)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(nodes)
        })
    }

    /// Decisions whose normalized question matches exactly.
    pub fn find_by_normalized_question(&self, normalized: &str) -> Result<Vec<DecisionNode>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, question, question_normalized, consensus_status,
                        winning_option, timestamp, metadata_blob
                 FROM decision_nodes
                 WHERE question_normalized = ?1
                 ORDER BY timestamp DESC",
            )?;
            let nodes = stmt
                .query_map(params![normalized], row_to_node)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(nodes)
        })
    }

    /// Neighbors of `source_id` with score >= `min_score`, score desc.
    pub fn get_similar(
        &self,
        source_id: &DecisionId,
        min_score: f64,
        limit: usize,
    ) -> Result<Vec<(DecisionNode, f64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.id, n.question, n.question_normalized, n.consensus_status,
                        n.winning_option, n.timestamp, n.metadata_blob,
                        s.similarity_score
                 FROM decision_similarities s
                 JOIN decision_nodes n ON n.id = s.target_id
                 WHERE s.source_id = ?1 AND s.similarity_score >= ?2
                 ORDER BY s.similarity_score DESC
                 LIMIT ?3",
            )?;
            let pairs = stmt
                .query_map(
                    params![source_id.to_string(), min_score, limit as i64],
                    |row| {
                        let node = row_to_node(row)?;
                        let score: f64 = row.get(7)?;
                        Ok((node, clamp_unit(score)))
                    },
                )?
                .filter_map(|r| r.ok())
                .collect();
            Ok(pairs)
        })
    }

    /// Replace the outgoing edges of `source_id`, keeping only the
    /// strongest `top_n` and clamping scores into [0,1]. Self-edges are
    /// dropped.
    pub fn replace_similarities(
        &self,
        source_id: &DecisionId,
        edges: &[DecisionSimilarity],
        top_n: usize,
    ) -> Result<()> {
        let mut kept: Vec<&DecisionSimilarity> = edges
            .iter()
            .filter(|edge| edge.target_id != *source_id)
            .collect();
        kept.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        kept.truncate(top_n);

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM decision_similarities WHERE source_id = ?1",
                params![source_id.to_string()],
            )?;
            for edge in &kept {
                tx.execute(
                    "INSERT INTO decision_similarities (source_id, target_id, similarity_score)
                     VALUES (?1, ?2, ?3)",
                    params![
                        source_id.to_string(),
                        edge.target_id.to_string(),
                        clamp_unit(edge.score),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Delete a decision; stances and edges cascade.
    pub fn cascade_delete(&self, id: &DecisionId) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM decision_nodes WHERE id = ?1",
                params![id.to_string()],
            )?;
            Ok(rows > 0)
        })
    }

    /// Number of persisted decisions.
    pub fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM decision_nodes", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Number of similarity edges.
    pub fn edge_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM decision_similarities",
                [],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Mean similarity across all edges, 0.0 when there are none.
    pub fn avg_similarity(&self) -> Result<f64> {
        self.with_conn(|conn| {
            let avg: Option<f64> = conn.query_row(
                "SELECT AVG(similarity_score) FROM decision_similarities",
                [],
                |row| row.get(0),
            )?;
            Ok(avg.unwrap_or(0.0))
        })
    }

    /// On-disk size in bytes; 0 for in-memory stores.
    pub fn db_bytes(&self) -> u64 {
        self.path
            .as_ref()
            .and_then(|path| std::fs::metadata(path).ok())
            .map(|metadata| metadata.len())
            .unwrap_or(0)
    }

    /// Run a quick integrity probe over every table.
    pub fn probe_tables(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut issues = Vec::new();
            for table in [
                "decision_nodes",
                "participant_stances",
                "decision_similarities",
                "meta",
            ] {
                let probe: rusqlite::Result<i64> = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", table),
                    [],
                    |row| row.get(0),
                );
                if let Err(error) = probe {
                    issues.push(format!("table '{}' unreadable: {}", table, error));
                }
            }
            Ok(issues)
        })
    }
}

fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<DecisionNode> {
    let metadata_raw: Option<String> = row.get(6)?;
    let (metadata_blob, participants) = metadata_raw
        .as_deref()
        .map(split_metadata)
        .unwrap_or((Value::Null, Vec::new()));

    Ok(DecisionNode {
        id: DecisionId::parse(&row.get::<_, String>(0)?),
        question: row.get(1)?,
        question_normalized: row.get(2)?,
        consensus_status: row.get(3)?,
        winning_option: row.get(4)?,
        participants,
        timestamp: parse_datetime(row.get::<_, String>(5)?),
        metadata_blob,
    })
}

/// Participants ride inside the metadata column; fold them in and out so
/// the logical schema stays at one JSON blob.
fn metadata_text(metadata: &Value, participants: &[String]) -> String {
    let mut wrapper = serde_json::Map::new();
    wrapper.insert(
        "participants".to_string(),
        Value::Array(
            participants
                .iter()
                .map(|p| Value::String(p.clone()))
                .collect(),
        ),
    );
    wrapper.insert("extra".to_string(), metadata.clone());
    Value::Object(wrapper).to_string()
}

fn split_metadata(raw: &str) -> (Value, Vec<String>) {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return (Value::Null, Vec::new());
    };
    let participants = value
        .get("participants")
        .and_then(|v| v.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let extra = value.get("extra").cloned().unwrap_or(Value::Null);
    (extra, participants)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
