//! Control API: the HTTP surface operators and external collaborators use
//! to submit, inspect, and steer jobs. One handler per operation, a shared
//! `AppState` extractor, and a single `ApiError` mapping onto the status
//! codes the spec assigns to each failure mode.

use crate::artifacts::{save_revision, RevisionKind};
use crate::config::{ProvidersConfig, RoutingConfig, SafetyConfig, WorkerConfig};
use crate::events::EventBus;
use crate::store::{JobListFilter, Store, StoreError};
use crate::types::{EventType, Job, JobStatus, NewJob};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub events: EventBus,
    pub worker_pool: Arc<crate::worker::WorkerPool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:id", get(get_job).patch(patch_job))
        .route("/jobs/:id/pause", post(pause_job))
        .route("/jobs/:id/resume", post(resume_job))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/jobs/:id/retry", post(retry_job))
        .route("/jobs/:id/revisions", post(save_job_revision))
        .route("/jobs/bulk-delete", post(bulk_delete))
        .route("/health", get(health))
        .route("/events", get(event_stream))
        .route("/config/:section", get(get_config_section).put(put_config_section))
        .with_state(state)
}

pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ApiError::NotFound(format!("job {id} not found")),
            StoreError::DuplicateTranscript { existing_id, transcript_file } => {
                ApiError::Conflict(format!("transcript {transcript_file:?} already queued as job {existing_id}"))
            }
            StoreError::InvalidTransition { job_id, from, to } => {
                ApiError::BadRequest(format!("job {job_id} cannot move from {from} to {to}"))
            }
            StoreError::InvalidArgument(msg) => ApiError::BadRequest(msg),
            StoreError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Deserialize)]
pub struct SubmitJobRequest {
    pub transcript_file: String,
    pub project_path: String,
    pub project_name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub media_id: Option<String>,
    pub sst_record_id: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub include_timestamp: bool,
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Serialize)]
pub struct SubmitJobResponse {
    pub id: i64,
}

async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let id = state
        .store
        .create_job(
            NewJob {
                transcript_file: req.transcript_file,
                project_path: req.project_path,
                project_name: req.project_name,
                priority: req.priority,
                max_retries: req.max_retries,
                media_id: req.media_id,
                sst_record_id: req.sst_record_id,
                include_timestamp: req.include_timestamp,
            },
            req.force,
        )
        .await?;
    state
        .events
        .emit(id, crate::types::EventType::JobQueued, serde_json::json!({}))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(SubmitJobResponse { id }))
}

#[derive(Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub filename: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let status = q.status.as_deref().map(|s| s.parse()).transpose().map_err(|_| ApiError::BadRequest("invalid status".into()))?;
    let filter = JobListFilter { status, filename_contains: q.filename, limit: q.limit, offset: q.offset };
    let jobs = state.store.list_jobs(filter).await?;
    Ok(Json(jobs))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Job>, ApiError> {
    let job = state.store.get_job(id).await?.ok_or(ApiError::NotFound(format!("job {id} not found")))?;
    Ok(Json(job))
}

#[derive(Deserialize)]
pub struct PatchJobRequest {
    pub priority: Option<i32>,
}

async fn patch_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<PatchJobRequest>,
) -> Result<StatusCode, ApiError> {
    if let Some(priority) = req.priority {
        state.store.patch_priority(id, priority).await?;
        state
            .events
            .emit(id, EventType::UserAction, serde_json::json!({ "action": "patch", "priority": priority }))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct SaveRevisionRequest {
    pub kind: String,
    pub content: String,
}

#[derive(Serialize)]
pub struct SaveRevisionResponse {
    pub path: String,
    pub version: u32,
}

async fn save_job_revision(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SaveRevisionRequest>,
) -> Result<Json<SaveRevisionResponse>, ApiError> {
    let job = state.store.get_job(id).await?.ok_or(ApiError::NotFound(format!("job {id} not found")))?;
    let kind = RevisionKind::from_str(&req.kind).ok_or_else(|| ApiError::BadRequest(format!("unknown revision kind {:?}", req.kind)))?;
    let (path, version) =
        save_revision(&job.project_path, kind, &req.content).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(SaveRevisionResponse { path: path.display().to_string(), version }))
}

async fn get_config_section(
    State(state): State<AppState>,
    Path(section): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let raw = state.store.load_config(&section).await?.ok_or(ApiError::NotFound(format!("config section {section:?} not set")))?;
    let value: serde_json::Value = serde_json::from_str(&raw).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(value))
}

async fn put_config_section(
    State(state): State<AppState>,
    Path(section): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    match section.as_str() {
        "routing" => {
            serde_json::from_value::<RoutingConfig>(body.clone()).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        }
        "worker" => {
            serde_json::from_value::<WorkerConfig>(body.clone()).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        }
        "safety" => {
            serde_json::from_value::<SafetyConfig>(body.clone()).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        }
        "providers" => {
            serde_json::from_value::<ProvidersConfig>(body.clone()).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        }
        other => return Err(ApiError::BadRequest(format!("unknown config section {other:?}"))),
    }
    let value = serde_json::to_string(&body).map_err(|e| ApiError::Internal(e.to_string()))?;
    state.store.save_config(&section, &value, "json").await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause_job(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    state.store.transition(id, JobStatus::Paused).await?;
    state.events.emit(id, EventType::SystemPause, serde_json::json!({})).await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_job(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    state.store.transition(id, JobStatus::Pending).await?;
    state.events.emit(id, EventType::SystemResume, serde_json::json!({})).await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    state.worker_pool.cancel_job(id);
    let job = state.store.get_job(id).await?.ok_or(ApiError::NotFound(format!("job {id} not found")))?;
    if job.status == JobStatus::Pending {
        state.store.transition(id, JobStatus::Cancelled).await?;
    }
    state
        .events
        .emit(id, EventType::UserAction, serde_json::json!({ "action": "cancel" }))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn retry_job(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    state.store.transition(id, JobStatus::Pending).await?;
    state.store.reset_phases_for_retry(id).await?;
    state
        .events
        .emit(id, EventType::UserAction, serde_json::json!({ "action": "retry" }))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct BulkDeleteRequest {
    pub statuses: Vec<String>,
}

async fn bulk_delete(
    State(state): State<AppState>,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let statuses: Vec<JobStatus> = req
        .statuses
        .iter()
        .map(|s| s.parse())
        .collect::<anyhow::Result<_>>()
        .map_err(|_| ApiError::BadRequest("invalid status in statuses list".into()))?;
    let deleted = state.store.bulk_delete(&statuses).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let pending = state.store.list_jobs(JobListFilter { status: Some(JobStatus::Pending), ..Default::default() }).await?.len();
    let in_progress = state.store.list_jobs(JobListFilter { status: Some(JobStatus::InProgress), ..Default::default() }).await?.len();
    Ok(Json(serde_json::json!({ "status": "ok", "pending_jobs": pending, "in_progress_jobs": in_progress })))
}

async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => serde_json::to_string(&event).ok().map(|json| Ok(Event::default().data(json))),
        Err(_lagged) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
