//! Schema migrations, applied in order at startup against `PRAGMA
//! user_version`. Each migration is idempotent against a fresh database and
//! is never edited once shipped — add a new one instead.

use anyhow::Result;
use rusqlite::Connection;

const MIGRATIONS: &[&str] = &[MIGRATION_0001, MIGRATION_0002];

const MIGRATION_0001: &str = r#"
CREATE TABLE jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    transcript_file TEXT NOT NULL,
    project_path TEXT NOT NULL,
    project_name TEXT NOT NULL,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    recovery_attempts INTEGER NOT NULL DEFAULT 0,
    queued_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    last_heartbeat TEXT,
    estimated_cost REAL,
    actual_cost REAL NOT NULL DEFAULT 0.0,
    current_phase_index INTEGER NOT NULL DEFAULT 0,
    media_id TEXT,
    sst_record_id TEXT,
    error_message TEXT,
    error_timestamp TEXT,
    worker_id TEXT
);

CREATE INDEX idx_jobs_status ON jobs(status);
CREATE INDEX idx_jobs_transcript_file ON jobs(transcript_file);

CREATE TABLE job_phases (
    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    tier_index INTEGER,
    tier_label TEXT,
    model TEXT,
    tier_reason TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    cost REAL NOT NULL DEFAULT 0.0,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    completed_at TEXT,
    deliverable_path TEXT,
    error_message TEXT,
    PRIMARY KEY (job_id, name)
);

CREATE TABLE session_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    event_type TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_session_events_job_id ON session_events(job_id);

CREATE TABLE config_items (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    value_type TEXT NOT NULL
);

CREATE TABLE ingest_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    observed_at TEXT NOT NULL,
    superseded_by INTEGER
);
"#;

const MIGRATION_0002: &str = r#"
CREATE INDEX idx_jobs_priority_queued ON jobs(priority DESC, queued_at ASC);
"#;

pub fn apply(conn: &Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    let current = current as usize;
    for (i, migration) in MIGRATIONS.iter().enumerate().skip(current) {
        conn.execute_batch(migration)?;
        conn.pragma_update(None, "user_version", (i + 1) as i64)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_applies_all_migrations() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version as usize, MIGRATIONS.len());
    }

    #[test]
    fn applying_twice_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn).unwrap();
        apply(&conn).unwrap();
    }
}
