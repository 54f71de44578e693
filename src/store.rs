//! Durable store: the single embedded SQLite file that holds jobs, phases,
//! events, config, and ingest dedupe records. The claim operation is one
//! statement inside one `IMMEDIATE` transaction — no read-then-write window
//! for two workers to both win the same job.

use crate::types::{
    EventType, Job, JobPhase, JobStatus, NewJob, NewSessionEvent, PhaseName, PhaseStatus,
    SessionEvent,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a non-terminal job already exists for {transcript_file:?} (id {existing_id})")]
    DuplicateTranscript { existing_id: i64, transcript_file: String },
    #[error("job {0} not found")]
    NotFound(i64),
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition { job_id: i64, from: JobStatus, to: JobStatus },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Internal(#[from] rusqlite::Error),
}

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// Partial update applied to one phase row; `None` fields are left alone.
#[derive(Debug, Default, Clone)]
pub struct PhasePatch {
    pub status: Option<PhaseStatus>,
    pub tier_index: Option<u32>,
    pub tier_label: Option<String>,
    pub model: Option<String>,
    pub tier_reason: Option<String>,
    pub attempts_delta: u32,
    pub cost_delta: f64,
    pub input_tokens_delta: u64,
    pub output_tokens_delta: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deliverable_path: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReapedJob {
    pub job_id: i64,
    pub retry_count: u32,
    pub failed: bool,
}

/// Filter + pagination for `list_jobs`. `None` fields mean "unfiltered".
#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub status: Option<JobStatus>,
    pub filename_contains: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Status transition graph from spec §7. `patch_priority`/internal writes
/// bypass this; any externally-triggered status change must go through it.
fn transition_allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (Pending, Cancelled)
            | (Pending, Paused)
            | (Paused, Pending)
            | (Paused, Cancelled)
            | (InProgress, Investigating)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (InProgress, Cancelled)
            | (InProgress, Pending)
            | (InProgress, Paused)
            | (Investigating, InProgress)
            | (Investigating, Failed)
            | (Investigating, Cancelled)
            | (Failed, Pending)
    )
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        crate::migrations::apply(&conn).map_err(|e| {
            StoreError::Internal(rusqlite::Error::ToSqlConversionFailure(e.into()))
        })?;
        Ok(Store { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        crate::migrations::apply(&conn).map_err(|e| {
            StoreError::Internal(rusqlite::Error::ToSqlConversionFailure(e.into()))
        })?;
        Ok(Store { conn: Arc::new(Mutex::new(conn)) })
    }

    pub async fn create_job(&self, input: NewJob, force: bool) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        if !force {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM jobs WHERE transcript_file = ?1 \
                     AND status NOT IN ('completed', 'failed', 'cancelled') LIMIT 1",
                    params![input.transcript_file],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(existing_id) = existing {
                return Err(StoreError::DuplicateTranscript {
                    existing_id,
                    transcript_file: input.transcript_file,
                });
            }
        }

        let now = Utc::now();
        tx.execute(
            "INSERT INTO jobs (transcript_file, project_path, project_name, status, priority, \
             max_retries, queued_at, media_id, sst_record_id) \
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?8)",
            params![
                input.transcript_file,
                input.project_path,
                input.project_name,
                input.priority,
                input.max_retries,
                now.to_rfc3339(),
                input.media_id,
                input.sst_record_id,
            ],
        )?;
        let job_id = tx.last_insert_rowid();

        for phase in PhaseName::PIPELINE_ORDER {
            if phase == PhaseName::Timestamp && !input.include_timestamp {
                continue;
            }
            tx.execute(
                "INSERT INTO job_phases (job_id, name, status) VALUES (?1, ?2, 'pending')",
                params![job_id, phase.as_str()],
            )?;
        }

        tx.execute(
            "INSERT INTO session_events (job_id, event_type, data, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![job_id, EventType::JobQueued.as_str(), "{}", now.to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(job_id)
    }

    /// Atomically claim the highest-priority, oldest pending job. One
    /// statement, one `IMMEDIATE` transaction: a second caller racing on the
    /// same file sees zero rows matched once the first has committed.
    pub async fn claim_next_pending_job(&self, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let now = Utc::now().to_rfc3339();
        let claimed_id: Option<i64> = tx
            .query_row(
                "UPDATE jobs SET status = 'in_progress', started_at = ?1, last_heartbeat = ?1, \
                 worker_id = ?2 \
                 WHERE id = (SELECT id FROM jobs WHERE status = 'pending' \
                             ORDER BY priority DESC, queued_at ASC LIMIT 1) \
                 AND status = 'pending' \
                 RETURNING id",
                params![now, worker_id],
                |r| r.get(0),
            )
            .optional()?;

        let Some(job_id) = claimed_id else {
            tx.commit()?;
            return Ok(None);
        };

        let job = load_job(&tx, job_id)?;
        tx.commit()?;
        Ok(job)
    }

    pub async fn update_heartbeat(&self, job_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE jobs SET last_heartbeat = ?1 WHERE id = ?2 AND status = 'in_progress'",
            params![Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    pub async fn get_stale_jobs(&self, threshold: Duration) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn.lock().await;
        let cutoff = (Utc::now() - chrono::Duration::from_std(threshold).unwrap()).to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT id FROM jobs WHERE status = 'in_progress' AND \
             (last_heartbeat IS NULL OR last_heartbeat < ?1)",
        )?;
        let ids: Vec<i64> = stmt
            .query_map(params![cutoff], |r| r.get(0))?
            .collect::<Result<_, _>>()?;
        let mut jobs = Vec::new();
        for id in ids {
            if let Some(j) = load_job(&conn, id)? {
                jobs.push(j);
            }
        }
        Ok(jobs)
    }

    /// Reset each stale job individually, one transaction per job, so a
    /// single corrupt row never blocks the rest of the reap pass.
    pub async fn reset_stuck_jobs(&self, threshold: Duration) -> Result<Vec<ReapedJob>, StoreError> {
        let stale = self.get_stale_jobs(threshold).await?;
        let mut results = Vec::new();
        for job in stale {
            let mut conn = self.conn.lock().await;
            let tx = conn.transaction()?;
            let new_retry = job.retry_count + 1;
            if new_retry > job.max_retries {
                tx.execute(
                    "UPDATE jobs SET status = 'failed', retry_count = ?1, \
                     error_message = 'stale job exceeded retry ceiling', error_timestamp = ?2 \
                     WHERE id = ?3",
                    params![new_retry, Utc::now().to_rfc3339(), job.id],
                )?;
                tx.execute(
                    "INSERT INTO session_events (job_id, event_type, data, created_at) \
                     VALUES (?1, ?2, '{}', ?3)",
                    params![job.id, EventType::JobFailed.as_str(), Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                results.push(ReapedJob { job_id: job.id, retry_count: new_retry, failed: true });
            } else {
                tx.execute(
                    "UPDATE jobs SET status = 'pending', retry_count = ?1, worker_id = NULL, \
                     last_heartbeat = NULL, started_at = NULL \
                     WHERE id = ?2",
                    params![new_retry, job.id],
                )?;
                tx.commit()?;
                results.push(ReapedJob { job_id: job.id, retry_count: new_retry, failed: false });
            }
        }
        Ok(results)
    }

    pub async fn update_phase(
        &self,
        job_id: i64,
        phase: PhaseName,
        patch: PhasePatch,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE job_phases SET \
                status = COALESCE(?1, status), \
                tier_index = COALESCE(?2, tier_index), \
                tier_label = COALESCE(?3, tier_label), \
                model = COALESCE(?4, model), \
                tier_reason = COALESCE(?5, tier_reason), \
                attempts = attempts + ?6, \
                cost = cost + ?7, \
                input_tokens = input_tokens + ?8, \
                output_tokens = output_tokens + ?9, \
                started_at = COALESCE(?10, started_at), \
                completed_at = COALESCE(?11, completed_at), \
                deliverable_path = COALESCE(?12, deliverable_path), \
                error_message = COALESCE(?13, error_message) \
             WHERE job_id = ?14 AND name = ?15",
            params![
                patch.status.map(|s| s.as_str().to_string()),
                patch.tier_index,
                patch.tier_label,
                patch.model,
                patch.tier_reason,
                patch.attempts_delta,
                patch.cost_delta,
                patch.input_tokens_delta as i64,
                patch.output_tokens_delta as i64,
                patch.started_at.map(|t| t.to_rfc3339()),
                patch.completed_at.map(|t| t.to_rfc3339()),
                patch.deliverable_path,
                patch.error_message,
                job_id,
                phase.as_str(),
            ],
        )?;
        if patch.cost_delta != 0.0 {
            conn.execute(
                "UPDATE jobs SET actual_cost = actual_cost + ?1 WHERE id = ?2",
                params![patch.cost_delta, job_id],
            )?;
        }
        Ok(())
    }

    pub async fn append_event(&self, event: NewSessionEvent) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO session_events (job_id, event_type, data, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.job_id,
                event.event_type.as_str(),
                event.data.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn recent_events(&self, job_id: i64, limit: u32) -> Result<Vec<SessionEvent>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, event_type, data, created_at FROM session_events \
             WHERE job_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![job_id, limit], |r| {
                let data_str: String = r.get(3)?;
                let created_str: String = r.get(4)?;
                Ok(SessionEvent {
                    id: r.get(0)?,
                    job_id: r.get(1)?,
                    event_type: r.get(2)?,
                    data: serde_json::from_str(&data_str).unwrap_or(serde_json::Value::Null),
                    created_at: DateTime::parse_from_rfc3339(&created_str)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Only `Failed`/`Cancelled` jobs may be bulk-deleted — enforced here so
    /// no caller can accidentally wipe in-flight work.
    pub async fn bulk_delete(&self, statuses: &[JobStatus]) -> Result<u64, StoreError> {
        for s in statuses {
            if !matches!(s, JobStatus::Failed | JobStatus::Cancelled) {
                return Err(StoreError::InvalidArgument(format!(
                    "bulk-delete does not permit status {s}"
                )));
            }
        }
        if statuses.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().await;
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM jobs WHERE status IN ({placeholders})");
        let args: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let params: Vec<&dyn rusqlite::ToSql> =
            args.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let deleted = conn.execute(&sql, params.as_slice())?;
        Ok(deleted as u64)
    }

    pub async fn get_job(&self, id: i64) -> Result<Option<Job>, StoreError> {
        let conn = self.conn.lock().await;
        load_job(&conn, id)
    }

    pub async fn list_jobs(&self, filter: JobListFilter) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn.lock().await;
        let status_param = filter.status.map(|s| s.as_str().to_string());
        let limit: i64 = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let offset: i64 = filter.offset.unwrap_or(0) as i64;
        let mut stmt = conn.prepare(
            "SELECT id FROM jobs \
             WHERE (?1 IS NULL OR status = ?1) \
             AND (?2 IS NULL OR transcript_file LIKE '%' || ?2 || '%') \
             ORDER BY priority DESC, queued_at ASC \
             LIMIT ?3 OFFSET ?4",
        )?;
        let ids: Vec<i64> = stmt
            .query_map(params![status_param, filter.filename_contains, limit, offset], |r| r.get(0))?
            .collect::<Result<_, _>>()?;
        let mut jobs = Vec::new();
        for id in ids {
            if let Some(j) = load_job(&conn, id)? {
                jobs.push(j);
            }
        }
        Ok(jobs)
    }

    pub async fn patch_priority(&self, job_id: i64, priority: i32) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE jobs SET priority = ?1 WHERE id = ?2",
            params![priority, job_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(job_id));
        }
        Ok(())
    }

    pub async fn transition(&self, job_id: i64, target: JobStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let current: Option<String> = conn
            .query_row("SELECT status FROM jobs WHERE id = ?1", params![job_id], |r| r.get(0))
            .optional()?;
        let Some(current) = current else {
            return Err(StoreError::NotFound(job_id));
        };
        let current: JobStatus = current.parse().map_err(|_| StoreError::NotFound(job_id))?;
        if !transition_allowed(current, target) {
            return Err(StoreError::InvalidTransition { job_id, from: current, to: target });
        }
        conn.execute(
            "UPDATE jobs SET status = ?1 WHERE id = ?2",
            params![target.as_str(), job_id],
        )?;
        Ok(())
    }

    /// Reset every phase row for `job_id` back to `pending`, clearing the
    /// previous run's timing and error so a retried job starts its pipeline
    /// cleanly instead of showing stale per-phase state.
    pub async fn reset_phases_for_retry(&self, job_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE job_phases SET status = 'pending', started_at = NULL, completed_at = NULL, \
             error_message = NULL WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    pub async fn save_config(&self, key: &str, value: &str, value_type: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO config_items (key, value, value_type) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, value_type = excluded.value_type",
            params![key, value, value_type],
        )?;
        Ok(())
    }

    pub async fn load_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;
        let v = conn
            .query_row("SELECT value FROM config_items WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?;
        Ok(v)
    }
}

fn load_job(conn: &Connection, id: i64) -> Result<Option<Job>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, transcript_file, project_path, project_name, status, priority, \
             retry_count, max_retries, recovery_attempts, queued_at, started_at, completed_at, \
             last_heartbeat, estimated_cost, actual_cost, current_phase_index, media_id, \
             sst_record_id, error_message, error_timestamp, worker_id \
             FROM jobs WHERE id = ?1",
            params![id],
            |r| {
                let status_str: String = r.get(4)?;
                Ok((
                    status_str,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i32>(5)?,
                    r.get::<_, u32>(6)?,
                    r.get::<_, u32>(7)?,
                    r.get::<_, u32>(8)?,
                    r.get::<_, String>(9)?,
                    r.get::<_, Option<String>>(10)?,
                    r.get::<_, Option<String>>(11)?,
                    r.get::<_, Option<String>>(12)?,
                    r.get::<_, Option<f64>>(13)?,
                    r.get::<_, f64>(14)?,
                    r.get::<_, u32>(15)?,
                    r.get::<_, Option<String>>(16)?,
                    r.get::<_, Option<String>>(17)?,
                    r.get::<_, Option<String>>(18)?,
                    r.get::<_, Option<String>>(19)?,
                    r.get::<_, Option<String>>(20)?,
                ))
            },
        )
        .optional()?;

    let Some((
        status,
        transcript_file,
        project_path,
        project_name,
        priority,
        retry_count,
        max_retries,
        recovery_attempts,
        queued_at,
        started_at,
        completed_at,
        last_heartbeat,
        estimated_cost,
        actual_cost,
        current_phase_index,
        media_id,
        sst_record_id,
        error_message,
        error_timestamp,
        worker_id,
    )) = row
    else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT name, status, tier_index, tier_label, model, tier_reason, attempts, cost, \
         input_tokens, output_tokens, started_at, completed_at, deliverable_path, error_message \
         FROM job_phases WHERE job_id = ?1 ORDER BY rowid",
    )?;
    let phase_rows = stmt.query_map(params![id], |r| {
        let name: String = r.get(0)?;
        let status: String = r.get(1)?;
        let started: Option<String> = r.get(10)?;
        let completed: Option<String> = r.get(11)?;
        Ok(JobPhase {
            name: name.parse().unwrap_or(PhaseName::Analyst),
            status: status.parse().unwrap_or(PhaseStatus::Pending),
            tier_index: r.get(2)?,
            tier_label: r.get(3)?,
            model: r.get(4)?,
            tier_reason: r.get(5)?,
            attempts: r.get(6)?,
            cost: r.get(7)?,
            input_tokens: r.get::<_, i64>(8)? as u64,
            output_tokens: r.get::<_, i64>(9)? as u64,
            started_at: started.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
            completed_at: completed.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
            deliverable_path: r.get(12)?,
            error_message: r.get(13)?,
        })
    })?;
    let mut phases = Vec::new();
    for p in phase_rows {
        phases.push(p?);
    }

    let parse_dt = |s: Option<String>| {
        s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc))
    };

    Ok(Some(Job {
        id,
        transcript_file,
        project_path,
        project_name,
        status: status.parse().unwrap_or(JobStatus::Pending),
        priority,
        retry_count,
        max_retries,
        recovery_attempts,
        queued_at: parse_dt(Some(queued_at)).unwrap_or_else(Utc::now),
        started_at: parse_dt(started_at),
        completed_at: parse_dt(completed_at),
        last_heartbeat: parse_dt(last_heartbeat),
        estimated_cost,
        actual_cost,
        current_phase_index,
        media_id,
        sst_record_id,
        error_message,
        error_timestamp: parse_dt(error_timestamp),
        worker_id,
        phases,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> NewJob {
        NewJob {
            transcript_file: "episode-1.vtt".to_string(),
            project_path: "/tmp/episode-1".to_string(),
            project_name: "episode-1".to_string(),
            priority: 0,
            max_retries: 3,
            media_id: None,
            sst_record_id: None,
            include_timestamp: false,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_job() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_job(sample_job(), false).await.unwrap();
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.phases.len(), 4);
        assert!(job.phases.iter().all(|p| p.name != PhaseName::Timestamp));
    }

    #[tokio::test]
    async fn timestamp_phase_created_only_when_requested() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_job(NewJob { include_timestamp: true, ..sample_job() }, false).await.unwrap();
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.phases.len(), 5);
        assert!(job.phases.iter().any(|p| p.name == PhaseName::Timestamp));
    }

    #[tokio::test]
    async fn retry_resets_phase_rows() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_job(sample_job(), false).await.unwrap();
        store
            .update_phase(id, PhaseName::Analyst, PhasePatch { status: Some(PhaseStatus::Failed), error_message: Some("boom".into()), ..Default::default() })
            .await
            .unwrap();
        store.reset_phases_for_retry(id).await.unwrap();
        let job = store.get_job(id).await.unwrap().unwrap();
        let analyst = job.phases.iter().find(|p| p.name == PhaseName::Analyst).unwrap();
        assert_eq!(analyst.status, PhaseStatus::Pending);
        assert!(analyst.error_message.is_none());
    }

    #[tokio::test]
    async fn duplicate_transcript_rejected_unless_forced() {
        let store = Store::open_in_memory().unwrap();
        store.create_job(sample_job(), false).await.unwrap();
        let err = store.create_job(sample_job(), false).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTranscript { .. }));
        store.create_job(sample_job(), true).await.unwrap();
    }

    #[tokio::test]
    async fn claim_is_exclusive_under_concurrency() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.create_job(sample_job(), false).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_next_pending_job(&format!("worker-{i}")).await.unwrap()
            }));
        }
        let mut claims = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                claims += 1;
            }
        }
        assert_eq!(claims, 1);
    }

    #[tokio::test]
    async fn stale_job_reset_increments_retry_then_fails() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .create_job(NewJob { max_retries: 1, ..sample_job() }, false)
            .await
            .unwrap();
        store.claim_next_pending_job("w1").await.unwrap();

        let reaped = store.reset_stuck_jobs(Duration::from_secs(0)).await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert!(!reaped[0].failed);
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        store.claim_next_pending_job("w2").await.unwrap();
        let reaped = store.reset_stuck_jobs(Duration::from_secs(0)).await.unwrap();
        assert!(reaped[0].failed);
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn bulk_delete_rejects_non_terminal_statuses() {
        let store = Store::open_in_memory().unwrap();
        let err = store.bulk_delete(&[JobStatus::Pending]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn bulk_delete_removes_terminal_jobs() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_job(sample_job(), false).await.unwrap();
        store.transition(id, JobStatus::Cancelled).await.unwrap();
        let deleted = store.bulk_delete(&[JobStatus::Cancelled, JobStatus::Failed]).await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn invalid_transition_rejected() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_job(sample_job(), false).await.unwrap();
        let err = store.transition(id, JobStatus::Completed).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn events_are_append_only_and_ordered() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_job(sample_job(), false).await.unwrap();
        store
            .append_event(NewSessionEvent { job_id: id, event_type: EventType::CostUpdate, data: serde_json::json!({}) })
            .await
            .unwrap();
        let events = store.recent_events(id, 10).await.unwrap();
        assert!(events.len() >= 2);
    }

    #[tokio::test]
    async fn list_jobs_filters_by_filename_substring_and_paginates() {
        let store = Store::open_in_memory().unwrap();
        store.create_job(NewJob { transcript_file: "alpha.vtt".into(), ..sample_job() }, false).await.unwrap();
        store.create_job(NewJob { transcript_file: "beta.vtt".into(), ..sample_job() }, true).await.unwrap();

        let matched = store
            .list_jobs(JobListFilter { filename_contains: Some("alpha".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].transcript_file, "alpha.vtt");

        let page = store.list_jobs(JobListFilter { limit: Some(1), offset: Some(0), ..Default::default() }).await.unwrap();
        assert_eq!(page.len(), 1);
    }
}
