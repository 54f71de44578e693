//! LLM client facade: one `complete()` entry point with the safety guards
//! the spec requires applied uniformly regardless of provider — model
//! allowlist, per-token cost ceiling, and a caller-supplied per-job cost
//! accumulator that only ever increments on success.

use crate::collaborators::TraceExporter;
use crate::router::TierDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CallLimits {
    pub model_allowlist: Vec<String>,
    pub max_cost_per_1k_tokens: f64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LlmResult {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub model: String,
}

#[derive(Debug, Clone)]
pub enum SafetyViolation {
    ModelNotAllowed(String),
    TokenCostTooHigh { per_1k: f64, cap: f64 },
    CostCapExceeded { would_be: f64, cap: f64 },
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
    #[error("safety: {0:?}")]
    Safety(SafetyViolation),
    #[error("context too large")]
    ContextTooLarge,
}

/// Per-job cost accumulator. Compare-and-swap loop so a cap breach never
/// partially charges: either the whole increment lands, or nothing does.
#[derive(Debug, Default)]
pub struct AtomicCostLedger {
    micros: AtomicU64,
}

impl AtomicCostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }

    /// Attempt to add `amount` dollars, rejecting if the result would exceed
    /// `cap`. Returns `false` (unchanged) on rejection.
    pub fn try_add(&self, amount: f64, cap: f64) -> bool {
        let delta = (amount * 1_000_000.0).round() as u64;
        let cap_micros = (cap * 1_000_000.0).round() as u64;
        loop {
            let current = self.micros.load(Ordering::SeqCst);
            let next = current + delta;
            if next > cap_micros {
                return false;
            }
            if self
                .micros
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallTrace {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        tier: &TierDescriptor,
        messages: &[Message],
        limits: CallLimits,
        ledger: Arc<AtomicCostLedger>,
        run_cost_cap: f64,
    ) -> Result<LlmResult, LlmError>;
}

/// Runs the guards common to every backend, then delegates the actual call
/// to `dispatch`. Concrete backends implement `dispatch`; the guard order
/// (allowlist before dispatch, per-1k and per-run caps after a successful
/// response) is fixed here so no backend can skip a check.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    async fn dispatch(
        &self,
        tier: &TierDescriptor,
        messages: &[Message],
        timeout_secs: u64,
    ) -> Result<LlmResult, LlmError>;
}

pub struct GuardedLlmClient<B: ProviderBackend> {
    backend: B,
    tracer: Arc<dyn TraceExporter>,
}

impl<B: ProviderBackend> GuardedLlmClient<B> {
    pub fn new(backend: B, tracer: Arc<dyn TraceExporter>) -> Self {
        GuardedLlmClient { backend, tracer }
    }
}

#[async_trait]
impl<B: ProviderBackend> LlmClient for GuardedLlmClient<B> {
    async fn complete(
        &self,
        tier: &TierDescriptor,
        messages: &[Message],
        limits: CallLimits,
        ledger: Arc<AtomicCostLedger>,
        run_cost_cap: f64,
    ) -> Result<LlmResult, LlmError> {
        // An empty allowlist means no restriction configured, not "reject
        // everything".
        if !limits.model_allowlist.is_empty() && !limits.model_allowlist.iter().any(|m| m == &tier.model) {
            return Err(LlmError::Safety(SafetyViolation::ModelNotAllowed(tier.model.clone())));
        }

        let result = self.backend.dispatch(tier, messages, limits.timeout_secs).await?;

        let per_1k = if result.output_tokens > 0 {
            result.cost / (result.output_tokens as f64 / 1000.0).max(0.001)
        } else {
            0.0
        };
        if per_1k > limits.max_cost_per_1k_tokens {
            return Err(LlmError::Safety(SafetyViolation::TokenCostTooHigh {
                per_1k,
                cap: limits.max_cost_per_1k_tokens,
            }));
        }

        if !ledger.try_add(result.cost, run_cost_cap) {
            return Err(LlmError::Safety(SafetyViolation::CostCapExceeded {
                would_be: ledger.total() + result.cost,
                cap: run_cost_cap,
            }));
        }

        let trace = LlmCallTrace {
            model: result.model.clone(),
            input_tokens: result.input_tokens,
            output_tokens: result.output_tokens,
            cost: result.cost,
        };
        let tracer = self.tracer.clone();
        tokio::spawn(async move { tracer.export(trace).await });

        Ok(result)
    }
}

/// OpenAI-compatible chat-completions backend. This is the only concrete
/// backend shipped — the engine's job is routing and recording, not any one
/// vendor's SDK, so the wire shape here is the lowest common denominator
/// most providers already speak.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpBackend {
    pub fn new(base_url: String, api_key: String, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder().timeout(timeout).build().unwrap_or_default();
        HttpBackend { client, base_url, api_key }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[async_trait]
impl ProviderBackend for HttpBackend {
    async fn dispatch(
        &self,
        tier: &TierDescriptor,
        messages: &[Message],
        _timeout_secs: u64,
    ) -> Result<LlmResult, LlmError> {
        let body = ChatRequest {
            model: &tier.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: &m.content,
                })
                .collect(),
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = resp.status();
        if status == reqwest::StatusCode::PAYLOAD_TOO_LARGE || status.as_u16() == 413 {
            return Err(LlmError::ContextTooLarge);
        }
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Permanent(format!("http {status}: {text}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Transient(format!("http {status}: {text}")));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Transient(format!("invalid response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        let cost = (output_tokens as f64 / 1000.0) * tier.max_cost_per_1k_tokens;

        Ok(LlmResult { text, input_tokens, output_tokens, cost, model: tier.model.clone() })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() || e.is_connect() {
        LlmError::Transient(e.to_string())
    } else {
        LlmError::Permanent(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubBackend {
        result: Result<LlmResult, LlmError>,
    }

    #[async_trait]
    impl ProviderBackend for StubBackend {
        async fn dispatch(
            &self,
            _tier: &TierDescriptor,
            _messages: &[Message],
            _timeout_secs: u64,
        ) -> Result<LlmResult, LlmError> {
            match &self.result {
                Ok(r) => Ok(r.clone()),
                Err(LlmError::Transient(s)) => Err(LlmError::Transient(s.clone())),
                Err(LlmError::Permanent(s)) => Err(LlmError::Permanent(s.clone())),
                Err(LlmError::ContextTooLarge) => Err(LlmError::ContextTooLarge),
                Err(LlmError::Safety(_)) => Err(LlmError::Transient("unreachable".into())),
            }
        }
    }

    fn tier() -> TierDescriptor {
        TierDescriptor { index: 0, label: "fast".into(), model: "small".into(), max_cost_per_1k_tokens: 0.05 }
    }

    fn limits() -> CallLimits {
        CallLimits { model_allowlist: vec!["small".into()], max_cost_per_1k_tokens: 1.0, timeout_secs: 30 }
    }

    fn no_op_tracer() -> Arc<dyn TraceExporter> {
        Arc::new(crate::collaborators::NullTraceExporter)
    }

    #[tokio::test]
    async fn disallowed_model_is_rejected_before_dispatch() {
        let backend = StubBackend { result: Ok(LlmResult { text: "x".into(), input_tokens: 1, output_tokens: 1, cost: 0.01, model: "small".into() }) };
        let client = GuardedLlmClient::new(backend, no_op_tracer());
        let mut lim = limits();
        lim.model_allowlist = vec!["other".into()];
        let ledger = Arc::new(AtomicCostLedger::new());
        let err = client.complete(&tier(), &[], lim, ledger, 10.0).await.unwrap_err();
        assert!(matches!(err, LlmError::Safety(SafetyViolation::ModelNotAllowed(_))));
    }

    #[tokio::test]
    async fn empty_allowlist_means_no_restriction() {
        let backend = StubBackend { result: Ok(LlmResult { text: "x".into(), input_tokens: 1, output_tokens: 1, cost: 0.01, model: "anything".into() }) };
        let client = GuardedLlmClient::new(backend, no_op_tracer());
        let mut lim = limits();
        lim.model_allowlist = vec![];
        let ledger = Arc::new(AtomicCostLedger::new());
        client.complete(&tier(), &[], lim, ledger, 10.0).await.unwrap();
    }

    #[tokio::test]
    async fn cost_cap_blocks_the_whole_charge() {
        let backend = StubBackend { result: Ok(LlmResult { text: "x".into(), input_tokens: 1, output_tokens: 1000, cost: 5.0, model: "small".into() }) };
        let client = GuardedLlmClient::new(backend, no_op_tracer());
        let ledger = Arc::new(AtomicCostLedger::new());
        let err = client.complete(&tier(), &[], limits(), ledger.clone(), 1.0).await.unwrap_err();
        assert!(matches!(err, LlmError::Safety(SafetyViolation::CostCapExceeded { .. })));
        assert_eq!(ledger.total(), 0.0);
    }

    #[tokio::test]
    async fn successful_call_increments_ledger_exactly_once() {
        let backend = StubBackend { result: Ok(LlmResult { text: "x".into(), input_tokens: 1, output_tokens: 100, cost: 0.5, model: "small".into() }) };
        let client = GuardedLlmClient::new(backend, no_op_tracer());
        let ledger = Arc::new(AtomicCostLedger::new());
        client.complete(&tier(), &[], limits(), ledger.clone(), 10.0).await.unwrap();
        assert_eq!(ledger.total(), 0.5);
    }

    #[tokio::test]
    async fn transient_error_never_touches_ledger() {
        let backend = StubBackend { result: Err(LlmError::Transient("timeout".into())) };
        let client = GuardedLlmClient::new(backend, no_op_tracer());
        let ledger = Arc::new(AtomicCostLedger::new());
        let err = client.complete(&tier(), &[], limits(), ledger.clone(), 10.0).await.unwrap_err();
        assert!(matches!(err, LlmError::Transient(_)));
        assert_eq!(ledger.total(), 0.0);
    }
}
