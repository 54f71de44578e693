//! Core data model: jobs, phases, events, and the small value types that
//! flow between the store, router, executor, and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a job. Transitions are enforced in `store::transition`,
/// not here — this type only knows how to print and parse itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    InProgress,
    Investigating,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Investigating => "investigating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => JobStatus::Pending,
            "in_progress" => JobStatus::InProgress,
            "investigating" => JobStatus::Investigating,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            "paused" => JobStatus::Paused,
            other => anyhow::bail!("unknown job status {other:?}"),
        })
    }
}

/// The four required phases plus the one optional one. Order here is
/// pipeline order; `required()` tells the executor which ones gate recovery.
/// Investigation is a job *status* during recovery, not a phase the router
/// tiers; copy-editor output is an external collaborator's concern. Neither
/// is a tier-routed LLM phase this engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseName {
    Analyst,
    Formatter,
    Seo,
    Timestamp,
    Manager,
}

impl PhaseName {
    pub const PIPELINE_ORDER: [PhaseName; 5] = [
        PhaseName::Analyst,
        PhaseName::Formatter,
        PhaseName::Seo,
        PhaseName::Timestamp,
        PhaseName::Manager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Analyst => "analyst",
            PhaseName::Formatter => "formatter",
            PhaseName::Seo => "seo",
            PhaseName::Manager => "manager",
            PhaseName::Timestamp => "timestamp",
        }
    }

    /// Required phases gate job failure; optional phases can be skipped
    /// without failing the job.
    pub fn required(&self) -> bool {
        matches!(
            self,
            PhaseName::Analyst | PhaseName::Formatter | PhaseName::Seo | PhaseName::Manager
        )
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PhaseName {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "analyst" => PhaseName::Analyst,
            "formatter" => PhaseName::Formatter,
            "seo" => PhaseName::Seo,
            "manager" => PhaseName::Manager,
            "timestamp" => PhaseName::Timestamp,
            other => anyhow::bail!("unknown phase name {other:?}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PhaseStatus {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => PhaseStatus::Pending,
            "in_progress" => PhaseStatus::InProgress,
            "completed" => PhaseStatus::Completed,
            "failed" => PhaseStatus::Failed,
            "skipped" => PhaseStatus::Skipped,
            other => anyhow::bail!("unknown phase status {other:?}"),
        })
    }
}

/// One row of a job's phase table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPhase {
    pub name: PhaseName,
    pub status: PhaseStatus,
    pub tier_index: Option<u32>,
    pub tier_label: Option<String>,
    pub model: Option<String>,
    pub tier_reason: Option<String>,
    pub attempts: u32,
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deliverable_path: Option<String>,
    pub error_message: Option<String>,
}

impl JobPhase {
    pub fn new(name: PhaseName) -> Self {
        JobPhase {
            name,
            status: PhaseStatus::Pending,
            tier_index: None,
            tier_label: None,
            model: None,
            tier_reason: None,
            attempts: 0,
            cost: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            started_at: None,
            completed_at: None,
            deliverable_path: None,
            error_message: None,
        }
    }
}

/// A unit of work: one transcript being carried through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub transcript_file: String,
    pub project_path: String,
    pub project_name: String,
    pub status: JobStatus,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub recovery_attempts: u32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub estimated_cost: Option<f64>,
    pub actual_cost: f64,
    pub current_phase_index: u32,
    pub media_id: Option<String>,
    pub sst_record_id: Option<String>,
    pub error_message: Option<String>,
    pub error_timestamp: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub phases: Vec<JobPhase>,
}

/// Caller-supplied fields for a new job; the rest default.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub transcript_file: String,
    pub project_path: String,
    pub project_name: String,
    pub priority: i32,
    pub max_retries: u32,
    pub media_id: Option<String>,
    pub sst_record_id: Option<String>,
    /// Whether this job needs the optional timestamp-alignment phase. Most
    /// jobs don't; callers opt in explicitly.
    pub include_timestamp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    JobQueued,
    JobStarted,
    JobCompleted,
    JobFailed,
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
    CostUpdate,
    ModelSelected,
    ModelFallback,
    SystemPause,
    SystemResume,
    SystemError,
    UserAction,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::JobQueued => "job_queued",
            EventType::JobStarted => "job_started",
            EventType::JobCompleted => "job_completed",
            EventType::JobFailed => "job_failed",
            EventType::PhaseStarted => "phase_started",
            EventType::PhaseCompleted => "phase_completed",
            EventType::PhaseFailed => "phase_failed",
            EventType::CostUpdate => "cost_update",
            EventType::ModelSelected => "model_selected",
            EventType::ModelFallback => "model_fallback",
            EventType::SystemPause => "system_pause",
            EventType::SystemResume => "system_resume",
            EventType::SystemError => "system_error",
            EventType::UserAction => "user_action",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: i64,
    pub job_id: i64,
    pub event_type: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSessionEvent {
    pub job_id: i64,
    pub event_type: EventType,
    pub data: serde_json::Value,
}

/// An observed but not-yet-acted-on transcript drop. Written only by the
/// control API's submit handler as a dedupe record — no watcher ships here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    pub id: i64,
    pub filename: String,
    pub status: String,
    pub observed_at: DateTime<Utc>,
    pub superseded_by: Option<i64>,
}

/// One phase's summary line in a completed job's `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPhase {
    pub name: String,
    pub status: String,
    pub model: Option<String>,
    pub tier_label: Option<String>,
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub deliverable_path: Option<String>,
}

/// Written to `project_path/manifest.json` on job completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: i64,
    pub project_name: String,
    pub transcript_file: String,
    pub completed_at: DateTime<Utc>,
    pub actual_cost: f64,
    pub phases: Vec<ManifestPhase>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips_through_str() {
        for s in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Investigating,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Paused,
        ] {
            let parsed: JobStatus = s.as_str().parse().unwrap();
            assert_eq!(parsed.as_str(), s.as_str());
        }
    }

    #[test]
    fn phase_name_round_trips_through_str() {
        for p in PhaseName::PIPELINE_ORDER {
            let parsed: PhaseName = p.as_str().parse().unwrap();
            assert_eq!(parsed.as_str(), p.as_str());
        }
    }

    #[test]
    fn required_phases_match_spec() {
        assert!(PhaseName::Analyst.required());
        assert!(PhaseName::Formatter.required());
        assert!(PhaseName::Seo.required());
        assert!(PhaseName::Manager.required());
        assert!(!PhaseName::Timestamp.required());
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }
}
