//! Seams to the engine's external neighbors: SST metadata lookup (Airtable,
//! in production) and best-effort trace export (a Langfuse-style exporter,
//! in production). Neither collaborator ships a real client here — they're
//! explicitly out of scope — but the phase executor and LLM client code
//! against the trait, not a concrete implementation, so wiring one in later
//! is a config change, not a rewrite.

use crate::llm::LlmCallTrace;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct SstContext {
    pub summary: String,
}

#[async_trait]
pub trait SstLookup: Send + Sync {
    async fn lookup(&self, media_id: &str) -> Option<SstContext>;
}

pub struct NullSstLookup;

#[async_trait]
impl SstLookup for NullSstLookup {
    async fn lookup(&self, _media_id: &str) -> Option<SstContext> {
        None
    }
}

#[async_trait]
pub trait TraceExporter: Send + Sync {
    async fn export(&self, trace: LlmCallTrace);
}

pub struct NullTraceExporter;

#[async_trait]
impl TraceExporter for NullTraceExporter {
    async fn export(&self, _trace: LlmCallTrace) {}
}
