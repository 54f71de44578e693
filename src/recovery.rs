//! Recovery analyzer: when a required phase fails after its tier ladder is
//! exhausted, ask a pinned top-tier model what to do next and act on exactly
//! one of RETRY / ESCALATE / FIX / FAIL — generalized from the teacher's
//! verdict parser (`parse_verdict_from_output`), which searches a bounded
//! enum of tokens tolerant of markdown emphasis and defaults to the safest
//! outcome on no match.

use crate::llm::{AtomicCostLedger, CallLimits, LlmClient, Message, Role};
use crate::router::{TierDescriptor, TierSelection, select_tier};
use crate::config::{RoutingConfig, SafetyConfig};
use crate::store::{PhasePatch, Store};
use crate::types::{Job, PhaseName, PhaseStatus};
use anyhow::Result;
use chrono::Utc;
use regex::Regex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry,
    Escalate,
    Fix,
    Fail,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Retry => "RETRY",
            RecoveryAction::Escalate => "ESCALATE",
            RecoveryAction::Fix => "FIX",
            RecoveryAction::Fail => "FAIL",
        }
    }
}

/// Parse the manager's bounded action token out of free text. Tolerant of
/// surrounding markdown emphasis (`**ACTION: RETRY**`); anything
/// unrecognized, or no `ACTION:` token at all, defaults to `FAIL` — the
/// same "unknown means the safe terminal outcome" rule the teacher's
/// verdict parser applies.
pub fn parse_recovery_action(output: &str) -> RecoveryAction {
    let re = Regex::new(r"(?i)ACTION:\s*\*{0,2}\s*(RETRY|ESCALATE|FIX|FAIL)\s*\*{0,2}").unwrap();
    match re.captures(output) {
        Some(caps) => match caps.get(1).map(|m| m.as_str().to_uppercase()) {
            Some(ref s) if s == "RETRY" => RecoveryAction::Retry,
            Some(ref s) if s == "ESCALATE" => RecoveryAction::Escalate,
            Some(ref s) if s == "FIX" => RecoveryAction::Fix,
            _ => RecoveryAction::Fail,
        },
        None => RecoveryAction::Fail,
    }
}

pub struct RecoveryAnalyzer {
    pub store: Arc<Store>,
    pub llm: Arc<dyn LlmClient>,
    pub routing: Arc<RoutingConfig>,
    pub safety: Arc<SafetyConfig>,
    pub recovery_budget: u32,
}

pub enum RecoveryResult {
    Retry,
    Escalate,
    Fix { note: String },
    Fail { reason: String },
}

impl RecoveryAnalyzer {
    pub async fn analyze(
        &self,
        job: &Job,
        failed_phase: PhaseName,
        failure_reason: &str,
        ledger: Arc<AtomicCostLedger>,
    ) -> Result<RecoveryResult> {
        if job.recovery_attempts >= self.recovery_budget {
            return Ok(RecoveryResult::Fail {
                reason: format!("recovery budget of {} exhausted", self.recovery_budget),
            });
        }

        let manager_tier = match select_tier(&self.routing, PhaseName::Manager, 0.0, None) {
            TierSelection::Selected { tier, .. } => tier,
            TierSelection::Exhausted { .. } => TierDescriptor {
                index: 0,
                label: "fallback".into(),
                model: self.safety.model_allowlist.first().cloned().unwrap_or_default(),
                max_cost_per_1k_tokens: self.safety.max_cost_per_1k_tokens,
            },
        };

        let prompt = format!(
            "Phase `{}` failed for job {}: {failure_reason}\n\n\
             Decide the next action. Reply with exactly one line of the form:\n\
             ACTION: RETRY | ESCALATE | FIX | FAIL\n\n\
             RETRY: try the same phase again at its current tier.\n\
             ESCALATE: retry the phase at the next tier up.\n\
             FIX: apply a corrective note and retry.\n\
             FAIL: give up on this job.",
            failed_phase.as_str(),
            job.id,
        );

        let messages = vec![
            Message { role: Role::System, content: "You are the recovery manager for a transcript-editing pipeline.".to_string() },
            Message { role: Role::User, content: prompt },
        ];
        let limits = CallLimits {
            model_allowlist: self.safety.model_allowlist.clone(),
            max_cost_per_1k_tokens: self.safety.max_cost_per_1k_tokens,
            timeout_secs: 60,
        };

        let outcome = self.llm.complete(&manager_tier, &messages, limits, ledger, self.safety.run_cost_cap).await;

        let (action, raw_text) = match outcome {
            Ok(result) => (parse_recovery_action(&result.text), result.text),
            Err(_) => (RecoveryAction::Fail, String::new()),
        };

        self.store
            .update_phase(
                job.id,
                failed_phase,
                PhasePatch { status: Some(PhaseStatus::Failed), ..Default::default() },
            )
            .await?;

        self.write_recovery_analysis(job, failed_phase, failure_reason, action, &raw_text)?;

        Ok(match action {
            RecoveryAction::Retry => RecoveryResult::Retry,
            RecoveryAction::Escalate => RecoveryResult::Escalate,
            RecoveryAction::Fix => RecoveryResult::Fix { note: raw_text },
            RecoveryAction::Fail => RecoveryResult::Fail { reason: failure_reason.to_string() },
        })
    }

    fn write_recovery_analysis(
        &self,
        job: &Job,
        phase: PhaseName,
        failure_reason: &str,
        action: RecoveryAction,
        raw_text: &str,
    ) -> Result<()> {
        let path = std::path::Path::new(&job.project_path).join("recovery_analysis.md");
        std::fs::create_dir_all(&job.project_path)?;
        let content = format!(
            "# Recovery analysis\n\nPhase: {}\nTimestamp: {}\nFailure: {}\nDecision: {}\n\n{}\n",
            phase.as_str(),
            Utc::now().to_rfc3339(),
            failure_reason,
            action.as_str(),
            raw_text,
        );
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_action_token() {
        assert_eq!(parse_recovery_action("ACTION: RETRY"), RecoveryAction::Retry);
    }

    #[test]
    fn parses_action_wrapped_in_markdown_emphasis() {
        assert_eq!(parse_recovery_action("Here's my call.\n\nACTION: **ESCALATE**"), RecoveryAction::Escalate);
    }

    #[test]
    fn is_case_insensitive() {
        assert_eq!(parse_recovery_action("action: fix"), RecoveryAction::Fix);
    }

    #[test]
    fn unrecognized_token_defaults_to_fail() {
        assert_eq!(parse_recovery_action("ACTION: RETRY_LATER"), RecoveryAction::Fail);
    }

    #[test]
    fn missing_action_token_defaults_to_fail() {
        assert_eq!(parse_recovery_action("I think we should try again."), RecoveryAction::Fail);
    }
}
