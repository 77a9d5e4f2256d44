//! Rule table used when the oracle is absent or cannot be trusted

use super::{Decision, IncidentContext};
use crate::models::{ActionType, AlertRecommendation, MetricType, Severity};

/// Confidence attached to rule-table decisions
pub const RULE_CONFIDENCE: f64 = 0.8;

const CPU_RESTART_THRESHOLD: f64 = 90.0;
const MEMORY_RESTART_THRESHOLD: f64 = 95.0;

pub fn rule_based(ctx: &IncidentContext) -> Decision {
    let (action_type, why) = select(ctx);
    Decision {
        action_type,
        reasoning: format!("Rule-based: {}", why),
        confidence: RULE_CONFIDENCE,
        oracle_request_id: None,
    }
}

fn select(ctx: &IncidentContext) -> (ActionType, String) {
    if ctx.severity == Severity::Critical
        || ctx.recommendation == AlertRecommendation::RollbackImmediately
    {
        return (
            ActionType::Rollback,
            format!("{} {} incident on {}", ctx.severity, ctx.metric_type, ctx.subject_id),
        );
    }

    match ctx.metric_type {
        MetricType::Cpu if ctx.current_value > CPU_RESTART_THRESHOLD => (
            ActionType::Restart,
            format!("CPU at {:.1}% on {}", ctx.current_value, ctx.subject_id),
        ),
        MetricType::Cpu => (
            ActionType::ScaleUp,
            format!("CPU anomaly on {} ({:.1}%)", ctx.subject_id, ctx.current_value),
        ),
        MetricType::Memory if ctx.current_value > MEMORY_RESTART_THRESHOLD => (
            ActionType::Restart,
            format!("Memory at {:.1}% on {}", ctx.current_value, ctx.subject_id),
        ),
        MetricType::Memory => (
            ActionType::Investigate,
            format!("Memory growth on {} ({:.1}%)", ctx.subject_id, ctx.current_value),
        ),
        _ if ctx.severity == Severity::High => (
            ActionType::Isolate,
            format!("High severity {} anomaly on {}", ctx.metric_type, ctx.subject_id),
        ),
        _ => (
            ActionType::Investigate,
            format!("{} anomaly on {}", ctx.metric_type, ctx.subject_id),
        ),
    }
}
