//! Phase executor: runs one phase of one job through the tier-escalation
//! loop against the LLM client, persisting cost/tokens/tier/attempts as it
//! goes and writing the phase's artifact to disk on success.

use crate::artifacts::{save_revision, RevisionKind};
use crate::collaborators::SstLookup;
use crate::config::{RoutingConfig, SafetyConfig};
use crate::events::EventBus;
use crate::llm::{AtomicCostLedger, CallLimits, LlmClient, LlmError, Message, Role};
use crate::paths::sanitized_artifact_path as artifact_path;
use crate::prompts::PromptLibrary;
use crate::router::{select_tier, EscalationReason, TierSelection};
use crate::store::{PhasePatch, Store};
use crate::types::{EventType, Job, PhaseName, PhaseStatus};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

pub const MAX_TIER_ESCALATIONS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed { deliverable_path: String },
    Failed { reason: String },
    Skipped,
}

pub struct PhaseExecutor {
    pub store: Arc<Store>,
    pub events: EventBus,
    pub llm: Arc<dyn LlmClient>,
    pub prompts: Arc<PromptLibrary>,
    pub sst: Arc<dyn SstLookup>,
    pub routing: Arc<RoutingConfig>,
    pub safety: Arc<SafetyConfig>,
}

impl PhaseExecutor {
    /// Run one phase to completion, escalating through tiers as needed.
    /// Returns the outcome; the caller (the worker's job task) decides what
    /// to do with a `Failed` required phase (trigger recovery) versus an
    /// optional one (mark skipped and move on).
    pub async fn run_phase(&self, job: &Job, phase: PhaseName, ledger: Arc<AtomicCostLedger>) -> Result<PhaseOutcome> {
        let start = Instant::now();
        self.store
            .update_phase(
                job.id,
                phase,
                PhasePatch { status: Some(PhaseStatus::InProgress), started_at: Some(Utc::now()), ..Default::default() },
            )
            .await?;

        let mut current: Option<(u32, EscalationReason)> = None;

        for _ in 0..MAX_TIER_ESCALATIONS {
            let duration_minutes = start.elapsed().as_secs_f64() / 60.0;
            let selection = select_tier(&self.routing, phase, duration_minutes, current);

            let tier = match selection {
                TierSelection::Selected { tier, reason } => {
                    let event_type = if current.is_none() { EventType::ModelSelected } else { EventType::ModelFallback };
                    self.events
                        .emit(
                            job.id,
                            event_type,
                            serde_json::json!({
                                "phase": phase.as_str(),
                                "model": tier.model,
                                "tier": tier.label,
                                "reason": reason,
                            }),
                        )
                        .await?;
                    tier
                }
                TierSelection::Exhausted { .. } => {
                    let reason = "tier ladder exhausted".to_string();
                    self.store
                        .update_phase(
                            job.id,
                            phase,
                            PhasePatch {
                                status: Some(PhaseStatus::Failed),
                                error_message: Some(reason.clone()),
                                completed_at: Some(Utc::now()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    return Ok(PhaseOutcome::Failed { reason });
                }
            };

            let messages = self.build_messages(job, phase).await?;
            let limits = CallLimits {
                model_allowlist: self.safety.model_allowlist.clone(),
                max_cost_per_1k_tokens: self.safety.max_cost_per_1k_tokens,
                timeout_secs: 120,
            };

            self.store
                .update_phase(
                    job.id,
                    phase,
                    PhasePatch {
                        attempts_delta: 1,
                        tier_index: Some(tier.index),
                        tier_label: Some(tier.label.clone()),
                        ..Default::default()
                    },
                )
                .await?;

            match self.llm.complete(&tier, &messages, limits, ledger.clone(), self.safety.run_cost_cap).await {
                Ok(result) => {
                    let relative = format!("{}_output.md", phase.as_str());
                    let path = artifact_path(&job.project_path, &relative)?;
                    if phase == PhaseName::Manager {
                        if let Ok(existing) = std::fs::read_to_string(&path) {
                            save_revision(&job.project_path, RevisionKind::ManagerOutput, &existing)?;
                        }
                    }
                    std::fs::write(&path, &result.text)?;

                    self.store
                        .update_phase(
                            job.id,
                            phase,
                            PhasePatch {
                                status: Some(PhaseStatus::Completed),
                                model: Some(result.model.clone()),
                                cost_delta: result.cost,
                                input_tokens_delta: result.input_tokens,
                                output_tokens_delta: result.output_tokens,
                                completed_at: Some(Utc::now()),
                                deliverable_path: Some(path.display().to_string()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    self.events
                        .emit(
                            job.id,
                            EventType::CostUpdate,
                            serde_json::json!({
                                "phase": phase.as_str(),
                                "model": result.model,
                                "cost": result.cost,
                                "input_tokens": result.input_tokens,
                                "output_tokens": result.output_tokens,
                            }),
                        )
                        .await?;
                    return Ok(PhaseOutcome::Completed { deliverable_path: path.display().to_string() });
                }
                Err(LlmError::Transient(msg)) => {
                    current = Some((tier.index, EscalationReason::TransientFailure));
                    tracing::warn!(job_id = job.id, phase = phase.as_str(), %msg, "transient failure, escalating tier");
                }
                Err(LlmError::ContextTooLarge) => {
                    current = Some((tier.index, EscalationReason::ContextTooLarge));
                    tracing::warn!(job_id = job.id, phase = phase.as_str(), "context too large, forcing escalation");
                }
                Err(LlmError::Safety(violation)) => {
                    let reason = format!("safety violation: {violation:?}");
                    self.store
                        .update_phase(
                            job.id,
                            phase,
                            PhasePatch {
                                status: Some(PhaseStatus::Failed),
                                error_message: Some(reason.clone()),
                                completed_at: Some(Utc::now()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    return Ok(PhaseOutcome::Failed { reason });
                }
                Err(LlmError::Permanent(msg)) => {
                    self.store
                        .update_phase(
                            job.id,
                            phase,
                            PhasePatch {
                                status: Some(PhaseStatus::Failed),
                                error_message: Some(msg.clone()),
                                completed_at: Some(Utc::now()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    return Ok(PhaseOutcome::Failed { reason: msg });
                }
            }
        }

        let reason = "exceeded maximum tier escalations".to_string();
        self.store
            .update_phase(
                job.id,
                phase,
                PhasePatch {
                    status: Some(PhaseStatus::Failed),
                    error_message: Some(reason.clone()),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(PhaseOutcome::Failed { reason })
    }

    async fn build_messages(&self, job: &Job, phase: PhaseName) -> Result<Vec<Message>> {
        let system = self.prompts.system_prompt(phase).to_string();
        let transcript = std::fs::read_to_string(&job.transcript_file).unwrap_or_default();

        let mut user = format!("# Transcript\n\n{transcript}\n");

        for prior_phase in &job.phases {
            if prior_phase.name == phase {
                break;
            }
            let relative = format!("{}_output.md", prior_phase.name.as_str());
            if let Ok(path) = artifact_path(&job.project_path, &relative) {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    user.push_str(&format!("\n# Prior phase: {}\n\n{content}\n", prior_phase.name.as_str()));
                }
            }
        }

        if let Some(media_id) = &job.media_id {
            if let Some(ctx) = self.sst.lookup(media_id).await {
                user.push_str(&format!("\n# SST context\n\n{}\n", ctx.summary));
            }
        }

        Ok(vec![
            Message { role: Role::System, content: system },
            Message { role: Role::User, content: user },
        ])
    }
}

