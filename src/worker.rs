//! Worker pool: a bounded number of concurrent job tasks, each claimed from
//! the store, each watched by its own heartbeat task, each cooperatively
//! cancellable between phases (never mid-LLM-call). Grounded on the
//! teacher's watchdog concurrency shape — one task owns one long-running
//! unit of work, `tokio::select!` across its natural completion and an
//! external signal — scaled from one subprocess to one job.

use crate::collaborators::{NullSstLookup, SstLookup};
use crate::config::{RoutingConfig, SafetyConfig, WorkerConfig};
use crate::events::EventBus;
use crate::llm::{AtomicCostLedger, LlmClient};
use crate::phase::{PhaseExecutor, PhaseOutcome};
use crate::prompts::PromptLibrary;
use crate::recovery::{RecoveryAnalyzer, RecoveryResult};
use crate::store::Store;
use crate::types::{EventType, Job, JobStatus, Manifest, ManifestPhase, PhaseStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub struct WorkerPool {
    store: Arc<Store>,
    events: EventBus,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    sst: Arc<dyn SstLookup>,
    routing: Arc<RoutingConfig>,
    safety: Arc<SafetyConfig>,
    worker: WorkerConfig,
    semaphore: Arc<Semaphore>,
    cancels: Arc<StdMutex<HashMap<i64, CancellationToken>>>,
    worker_id_counter: AtomicUsize,
}

impl WorkerPool {
    pub fn new(
        store: Arc<Store>,
        events: EventBus,
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptLibrary>,
        routing: Arc<RoutingConfig>,
        safety: Arc<SafetyConfig>,
        worker: WorkerConfig,
    ) -> Self {
        let max = worker.max_concurrent_jobs;
        WorkerPool {
            store,
            events,
            llm,
            prompts,
            sst: Arc::new(NullSstLookup),
            routing,
            safety,
            worker,
            semaphore: Arc::new(Semaphore::new(max)),
            cancels: Arc::new(StdMutex::new(HashMap::new())),
            worker_id_counter: AtomicUsize::new(0),
        }
    }

    pub fn cancel_job(&self, job_id: i64) -> bool {
        let guard = self.cancels.lock().unwrap();
        if let Some(token) = guard.get(&job_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Claim loop: acquire a concurrency permit, claim the next pending job,
    /// spawn its task. When no permit is free or no job is pending, sleep
    /// `poll_interval_seconds` before trying again.
    pub async fn run(self: Arc<Self>) {
        loop {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            let worker_id = format!("worker-{}", self.worker_id_counter.fetch_add(1, Ordering::SeqCst));
            match self.store.claim_next_pending_job(&worker_id).await {
                Ok(Some(job)) => {
                    let pool = self.clone();
                    tokio::spawn(async move {
                        pool.run_job(job, permit).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(Duration::from_secs(self.worker.poll_interval_seconds)).await;
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "failed to claim next job");
                    tokio::time::sleep(Duration::from_secs(self.worker.poll_interval_seconds)).await;
                }
            }
        }
    }

    async fn run_job(self: Arc<Self>, job: Job, _permit: tokio::sync::OwnedSemaphorePermit) {
        let job_id = job.id;
        let token = CancellationToken::new();
        self.cancels.lock().unwrap().insert(job_id, token.clone());

        let heartbeat_store = self.store.clone();
        let heartbeat_interval = Duration::from_secs(self.worker.heartbeat_interval_seconds);
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            loop {
                interval.tick().await;
                if heartbeat_store.update_heartbeat(job_id).await.is_err() {
                    break;
                }
            }
        });

        if let Err(e) = self.events.emit(job_id, EventType::JobStarted, serde_json::json!({})).await {
            tracing::error!(error = %e, job_id, "failed to emit job_started");
        }

        let result = self.drive_job(&job, token).await;

        heartbeat_handle.abort();
        self.cancels.lock().unwrap().remove(&job_id);

        match result {
            Ok(true) => {
                let _ = self.store.transition(job_id, JobStatus::Completed).await;
                if let Ok(Some(final_job)) = self.store.get_job(job_id).await {
                    if let Err(e) = self.write_manifest(&final_job) {
                        tracing::error!(error = %e, job_id, "failed to write manifest.json");
                    }
                }
                let _ = self.events.emit(job_id, EventType::JobCompleted, serde_json::json!({})).await;
            }
            Ok(false) => {
                // drive_job already left the job in a terminal failed/cancelled state and emitted events.
            }
            Err(e) => {
                tracing::error!(error = %e, job_id, "job task panicked or errored unexpectedly");
                let _ = self.store.transition(job_id, JobStatus::Failed).await;
                let _ = self.events.emit(job_id, EventType::JobFailed, serde_json::json!({ "error": e.to_string() })).await;
            }
        }
    }

    /// Writes `manifest.json` into the job's project directory summarizing
    /// cost, tokens, phases, and deliverables. Called once, after the job
    /// transitions to `Completed`.
    fn write_manifest(&self, job: &Job) -> anyhow::Result<()> {
        let manifest = Manifest {
            job_id: job.id,
            project_name: job.project_name.clone(),
            transcript_file: job.transcript_file.clone(),
            completed_at: job.completed_at.unwrap_or_else(chrono::Utc::now),
            actual_cost: job.actual_cost,
            phases: job
                .phases
                .iter()
                .map(|p| ManifestPhase {
                    name: p.name.as_str().to_string(),
                    status: p.status.as_str().to_string(),
                    model: p.model.clone(),
                    tier_label: p.tier_label.clone(),
                    cost: p.cost,
                    input_tokens: p.input_tokens,
                    output_tokens: p.output_tokens,
                    deliverable_path: p.deliverable_path.clone(),
                })
                .collect(),
        };
        let path = std::path::Path::new(&job.project_path).join("manifest.json");
        std::fs::create_dir_all(&job.project_path)?;
        std::fs::write(path, serde_json::to_string_pretty(&manifest)?)?;
        Ok(())
    }

    /// Runs every pipeline phase in order. Returns `Ok(true)` if the job
    /// completed successfully, `Ok(false)` if it was already left in a
    /// terminal state (failed or cancelled) by this call.
    async fn drive_job(&self, job: &Job, token: CancellationToken) -> anyhow::Result<bool> {
        let executor = PhaseExecutor {
            store: self.store.clone(),
            events: self.events.clone(),
            llm: self.llm.clone(),
            prompts: self.prompts.clone(),
            sst: self.sst.clone(),
            routing: self.routing.clone(),
            safety: self.safety.clone(),
        };
        let recovery = RecoveryAnalyzer {
            store: self.store.clone(),
            llm: self.llm.clone(),
            routing: self.routing.clone(),
            safety: self.safety.clone(),
            recovery_budget: self.worker.recovery_budget,
        };
        let ledger = Arc::new(AtomicCostLedger::new());

        for phase in job.phases.iter().map(|p| p.name).collect::<Vec<_>>() {
            // Cooperative cancellation is only ever checked between phases —
            // an in-flight LLM call always finishes.
            if token.is_cancelled() {
                self.store.transition(job.id, JobStatus::Cancelled).await?;
                return Ok(false);
            }

            self.events.emit(job.id, EventType::PhaseStarted, serde_json::json!({ "phase": phase.as_str() })).await?;

            let mut current_job = self.store.get_job(job.id).await?.unwrap_or_else(|| job.clone());
            let mut outcome = executor.run_phase(&current_job, phase, ledger.clone()).await?;

            // Required phase failed: hand off to the recovery analyzer, which
            // can ask for one more attempt, an escalated attempt, or give up.
            let mut recovery_rounds = 0u32;
            while let PhaseOutcome::Failed { reason } = &outcome {
                if !phase.required() {
                    self.store
                        .update_phase(job.id, phase, crate::store::PhasePatch { status: Some(PhaseStatus::Skipped), ..Default::default() })
                        .await?;
                    self.events
                        .emit(job.id, EventType::PhaseFailed, serde_json::json!({ "phase": phase.as_str(), "skipped": true }))
                        .await?;
                    outcome = PhaseOutcome::Skipped;
                    break;
                }

                recovery_rounds += 1;
                if recovery_rounds > self.worker.recovery_budget {
                    break;
                }

                let decision = recovery.analyze(&current_job, phase, reason, ledger.clone()).await?;
                match decision {
                    RecoveryResult::Retry | RecoveryResult::Escalate | RecoveryResult::Fix { .. } => {
                        current_job = self.store.get_job(job.id).await?.unwrap_or(current_job);
                        outcome = executor.run_phase(&current_job, phase, ledger.clone()).await?;
                    }
                    RecoveryResult::Fail { reason } => {
                        self.events.emit(job.id, EventType::PhaseFailed, serde_json::json!({ "phase": phase.as_str(), "reason": reason })).await?;
                        self.store.transition(job.id, JobStatus::Failed).await?;
                        return Ok(false);
                    }
                }
            }

            match outcome {
                PhaseOutcome::Completed { deliverable_path } => {
                    self.events
                        .emit(job.id, EventType::PhaseCompleted, serde_json::json!({ "phase": phase.as_str(), "deliverable_path": deliverable_path }))
                        .await?;
                }
                PhaseOutcome::Skipped => {}
                PhaseOutcome::Failed { reason } => {
                    self.events.emit(job.id, EventType::PhaseFailed, serde_json::json!({ "phase": phase.as_str(), "reason": reason })).await?;
                    self.store.transition(job.id, JobStatus::Failed).await?;
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}
