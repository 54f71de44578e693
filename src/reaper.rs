//! Stale-job reaper: a thin periodic scheduler. The actual decision (reset
//! vs fail on retry-ceiling) lives in `store::reset_stuck_jobs` — this task
//! only owns the timing, the same separation the teacher draws between its
//! orchestration loop and `preflight_check`'s single-purpose gate.

use crate::events::EventBus;
use crate::store::Store;
use crate::types::EventType;
use std::sync::Arc;
use std::time::Duration;

pub struct Reaper {
    pub store: Arc<Store>,
    pub events: EventBus,
    pub check_interval: Duration,
    pub stale_threshold: Duration,
}

impl Reaper {
    pub async fn run_once(&self) -> anyhow::Result<usize> {
        let reaped = self.store.reset_stuck_jobs(self.stale_threshold).await?;
        for r in &reaped {
            self.events
                .emit(r.job_id, EventType::SystemError, serde_json::json!({ "reason": "heartbeat timeout", "retry_count": r.retry_count }))
                .await?;
            if r.failed {
                self.events.emit(r.job_id, EventType::JobFailed, serde_json::json!({ "reason": "heartbeat timeout" })).await?;
                tracing::error!(job_id = r.job_id, "reaper failed stale job, retry ceiling exceeded");
            } else {
                tracing::warn!(job_id = r.job_id, retry_count = r.retry_count, "reaper reset stale job to pending");
            }
        }
        Ok(reaped.len())
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.check_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "reaper pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewJob;

    #[tokio::test]
    async fn run_once_resets_a_stale_in_progress_job() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let events = EventBus::new(store.clone(), None);
        let id = store
            .create_job(
                NewJob {
                    transcript_file: "t.vtt".into(),
                    project_path: "/tmp/t".into(),
                    project_name: "t".into(),
                    priority: 0,
                    max_retries: 3,
                    media_id: None,
                    sst_record_id: None,
                    include_timestamp: false,
                },
                false,
            )
            .await
            .unwrap();
        store.claim_next_pending_job("w1").await.unwrap();

        let reaper = Reaper { store: store.clone(), events, check_interval: Duration::from_secs(60), stale_threshold: Duration::from_secs(0) };
        let n = reaper.run_once().await.unwrap();
        assert_eq!(n, 1);
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, crate::types::JobStatus::Pending);
    }
}
