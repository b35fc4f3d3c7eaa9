//! SQLite schema and migrations for the decision graph.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version, recorded in the `meta` table.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    // WAL so readers never block the single writer
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM meta", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS decision_nodes (
            id TEXT PRIMARY KEY,
            question TEXT NOT NULL,
            question_normalized TEXT NOT NULL,
            consensus_status TEXT NOT NULL,
            winning_option TEXT,
            timestamp TEXT NOT NULL DEFAULT (datetime('now')),
            metadata_blob TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS participant_stances (
            decision_id TEXT NOT NULL,
            participant_id TEXT NOT NULL,
            vote_option TEXT,
            confidence REAL,
            rationale TEXT,
            FOREIGN KEY (decision_id) REFERENCES decision_nodes(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS decision_similarities (
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            similarity_score REAL NOT NULL,
            PRIMARY KEY (source_id, target_id),
            FOREIGN KEY (source_id) REFERENCES decision_nodes(id) ON DELETE CASCADE,
            FOREIGN KEY (target_id) REFERENCES decision_nodes(id) ON DELETE CASCADE
        )",
        [],
    )?;

    // Indexes for the retrieval-side queries
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_timestamp
         ON decision_nodes(timestamp DESC)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_normalized
         ON decision_nodes(question_normalized)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_stances_decision
         ON participant_stances(decision_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_similarities_source
         ON decision_similarities(source_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_similarities_score
         ON decision_similarities(similarity_score DESC)",
        [],
    )?;

    conn.execute("INSERT INTO meta (version) VALUES (1)", [])?;

    Ok(())
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM meta", [], |row| {
        row.get(0)
    })
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='decision_nodes'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}
