//! Tier router: a pure function mapping a phase, its running duration, and
//! its current escalation state to the tier it should run on next. No I/O,
//! no locking — callers snapshot config once per job task and feed it in.

use crate::config::RoutingConfig;
use crate::types::PhaseName;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    InitialSelection,
    DurationThreshold,
    TransientFailure,
    Timeout,
    ContextTooLarge,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::InitialSelection => "initial_selection",
            EscalationReason::DurationThreshold => "duration_threshold",
            EscalationReason::TransientFailure => "transient_failure",
            EscalationReason::Timeout => "timeout",
            EscalationReason::ContextTooLarge => "context_too_large",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierDescriptor {
    pub index: u32,
    pub label: String,
    pub model: String,
    pub max_cost_per_1k_tokens: f64,
}

#[derive(Debug, Clone)]
pub enum TierSelection {
    Selected {
        tier: TierDescriptor,
        reason: &'static str,
    },
    /// Escalation was requested but there is no tier left above the last one.
    Exhausted { last_tier_index: u32 },
}

/// Decide which tier a phase should run on.
///
/// Rules, in order:
/// 1. A phase pinned in `routing.phase_base_tiers` always returns its pinned
///    tier, regardless of duration or an escalation request — it never
///    moves, not even on repeated failure.
/// 2. Duration thresholds (`routing.duration_thresholds`) set a floor for
///    unpinned phases: once a phase has been running longer than a
///    threshold, the minimum tier for any *subsequent* selection is raised
///    accordingly.
/// 3. An explicit escalation request (`current` is `Some`) always moves at
///    least one tier up from the current tier, never down.
/// 4. The duration floor and the escalation request both apply; the higher
///    of the two wins.
/// 5. Escalating past the last configured tier returns `Exhausted` rather
///    than panicking or silently clamping.
/// 6. With no `current` and no duration floor, tier 0 is selected with
///    reason `initial_selection`.
pub fn select_tier(
    cfg: &RoutingConfig,
    phase: PhaseName,
    duration_minutes: f64,
    current: Option<(u32, EscalationReason)>,
) -> TierSelection {
    let last_index = cfg.tiers.len().saturating_sub(1) as u32;

    if let Some(pinned) = cfg.phase_base_tiers.get(phase.as_str()).copied() {
        if pinned > last_index {
            return TierSelection::Exhausted { last_tier_index: last_index };
        }
        let t = &cfg.tiers[pinned as usize];
        return TierSelection::Selected {
            tier: TierDescriptor {
                index: pinned,
                label: t.label.clone(),
                model: t.model.clone(),
                max_cost_per_1k_tokens: t.max_cost_per_1k_tokens,
            },
            reason: "phase_pin",
        };
    }

    let duration_floor = cfg
        .duration_thresholds
        .iter()
        .filter(|t| duration_minutes >= t.after_minutes)
        .map(|t| t.min_tier_index)
        .max();

    let (floor, reason): (u32, &'static str) = match duration_floor {
        Some(d) => (d, "duration_threshold"),
        None => (0, "initial_selection"),
    };

    let target = match current {
        None => floor,
        Some((cur, _)) => floor.max(cur + 1),
    };

    let reason = if current.is_some() && target > floor {
        escalation_reason_str(current.unwrap().1)
    } else {
        reason
    };

    if target > last_index {
        return TierSelection::Exhausted { last_tier_index: last_index };
    }

    let t = &cfg.tiers[target as usize];
    TierSelection::Selected {
        tier: TierDescriptor {
            index: target,
            label: t.label.clone(),
            model: t.model.clone(),
            max_cost_per_1k_tokens: t.max_cost_per_1k_tokens,
        },
        reason,
    }
}

fn escalation_reason_str(r: EscalationReason) -> &'static str {
    r.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DurationThreshold, RoutingConfig, TierConfig};
    use std::collections::HashMap;

    fn test_cfg() -> RoutingConfig {
        RoutingConfig {
            tiers: vec![
                TierConfig { label: "fast".into(), model: "small".into(), max_cost_per_1k_tokens: 0.01 },
                TierConfig { label: "standard".into(), model: "mid".into(), max_cost_per_1k_tokens: 0.05 },
                TierConfig { label: "premium".into(), model: "large".into(), max_cost_per_1k_tokens: 0.20 },
            ],
            phase_base_tiers: {
                let mut m = HashMap::new();
                m.insert("manager".to_string(), 2);
                m
            },
            duration_thresholds: vec![
                DurationThreshold { after_minutes: 5.0, min_tier_index: 1 },
                DurationThreshold { after_minutes: 15.0, min_tier_index: 2 },
            ],
        }
    }

    #[test]
    fn unpinned_phase_starts_at_tier_zero() {
        let cfg = test_cfg();
        match select_tier(&cfg, PhaseName::Analyst, 0.0, None) {
            TierSelection::Selected { tier, .. } => assert_eq!(tier.index, 0),
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[test]
    fn pinned_phase_starts_at_its_pin() {
        let cfg = test_cfg();
        match select_tier(&cfg, PhaseName::Manager, 0.0, None) {
            TierSelection::Selected { tier, .. } => assert_eq!(tier.index, 2),
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[test]
    fn escalation_always_moves_up_at_least_one() {
        let cfg = test_cfg();
        match select_tier(&cfg, PhaseName::Analyst, 0.0, Some((0, EscalationReason::TransientFailure))) {
            TierSelection::Selected { tier, .. } => assert_eq!(tier.index, 1),
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[test]
    fn escalation_past_last_tier_is_exhausted() {
        let cfg = test_cfg();
        match select_tier(&cfg, PhaseName::Analyst, 0.0, Some((2, EscalationReason::Timeout))) {
            TierSelection::Exhausted { last_tier_index } => assert_eq!(last_tier_index, 2),
            other => panic!("expected exhausted, got {other:?}"),
        }
    }

    #[test]
    fn duration_floor_raises_initial_selection() {
        let cfg = test_cfg();
        match select_tier(&cfg, PhaseName::Analyst, 20.0, None) {
            TierSelection::Selected { tier, .. } => assert_eq!(tier.index, 2),
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[test]
    fn duration_floor_never_lowers_a_pinned_phase() {
        let cfg = test_cfg();
        match select_tier(&cfg, PhaseName::Manager, 0.0, None) {
            TierSelection::Selected { tier, .. } => assert_eq!(tier.index, 2),
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[test]
    fn pinned_phase_never_escalates_past_its_pin() {
        let cfg = test_cfg();
        match select_tier(&cfg, PhaseName::Manager, 30.0, Some((2, EscalationReason::Timeout))) {
            TierSelection::Selected { tier, reason } => {
                assert_eq!(tier.index, 2);
                assert_eq!(reason, "phase_pin");
            }
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[test]
    fn selection_is_pure_and_deterministic() {
        let cfg = test_cfg();
        let a = select_tier(&cfg, PhaseName::Formatter, 3.0, None);
        let b = select_tier(&cfg, PhaseName::Formatter, 3.0, None);
        match (a, b) {
            (TierSelection::Selected { tier: t1, .. }, TierSelection::Selected { tier: t2, .. }) => {
                assert_eq!(t1.index, t2.index);
            }
            _ => panic!("expected two selections"),
        }
    }
}
