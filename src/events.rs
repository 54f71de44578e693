//! Event bus: every emitted event is first persisted (append-only, durable)
//! then best-effort broadcast to live subscribers. A subscriber that falls
//! behind is dropped — `tokio::sync::broadcast`'s `Lagged` is exactly the
//! "don't block producers" semantics the spec calls for.

use crate::store::Store;
use crate::types::{EventType, NewSessionEvent, SessionEvent};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct EventBus {
    store: Arc<Store>,
    tx: broadcast::Sender<SessionEvent>,
    log_dir: Option<PathBuf>,
}

impl EventBus {
    pub fn new(store: Arc<Store>, log_dir: Option<PathBuf>) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        EventBus { store, tx, log_dir }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub async fn emit(&self, job_id: i64, event_type: EventType, data: serde_json::Value) -> Result<()> {
        let id = self
            .store
            .append_event(NewSessionEvent { job_id, event_type, data: data.clone() })
            .await?;

        let event = SessionEvent { id, job_id, event_type: event_type.as_str().to_string(), data, created_at: chrono::Utc::now() };

        if let Some(dir) = &self.log_dir {
            self.append_to_log(dir, job_id, &event)?;
        }

        // Best-effort: no subscribers or a lagging subscriber is not an error.
        let _ = self.tx.send(event);
        Ok(())
    }

    fn append_to_log(&self, dir: &std::path::Path, job_id: i64, event: &SessionEvent) -> Result<()> {
        use std::io::Write;
        std::fs::create_dir_all(dir.join(job_id.to_string()))?;
        let path = dir.join(job_id.to_string()).join("processing.log.jsonl");
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobStatus, NewJob};

    #[tokio::test]
    async fn emit_persists_and_broadcasts() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let job_id = store
            .create_job(
                NewJob {
                    transcript_file: "t.vtt".into(),
                    project_path: "/tmp/t".into(),
                    project_name: "t".into(),
                    priority: 0,
                    max_retries: 1,
                    media_id: None,
                    sst_record_id: None,
                    include_timestamp: false,
                },
                false,
            )
            .await
            .unwrap();

        let bus = EventBus::new(store.clone(), None);
        let mut rx = bus.subscribe();
        bus.emit(job_id, EventType::CostUpdate, serde_json::json!({})).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.job_id, job_id);

        let events = store.recent_events(job_id, 10).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "cost_update"));
        let _ = JobStatus::Pending;
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_not_blocking() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let bus = EventBus::new(store.clone(), None);
        let _rx = bus.subscribe();
        // No one reads; emitting repeatedly must not block or error.
        for _ in 0..2000 {
            let _ = bus.tx.send(SessionEvent {
                id: 0,
                job_id: 1,
                event_type: "heartbeat".into(),
                data: serde_json::json!({}),
                created_at: chrono::Utc::now(),
            });
        }
    }
}
