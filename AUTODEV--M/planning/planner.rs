use autodev_context::{Intent, IntentCategory, ProjectContext};

use crate::actions::{ActionKind, AutonomousAction};
use crate::intelligence::MarketIntelligence;

/// Days after which the last evolution cycle counts as overdue.
pub const EVOLUTION_DUE_DAYS: i64 = 7;

/// Trigger-rule planner combining context, intent, and market intelligence.
///
/// Every rule is evaluated independently; all that fire contribute an
/// action. The result is sorted by priority descending with ties keeping
/// rule order, and dependency metadata never reorders anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActionPlanner;

impl ActionPlanner {
    /// Stateless planner handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Produces the prioritized action list for one planning pass.
    #[must_use]
    pub fn plan(
        &self,
        context: &ProjectContext,
        intent: &Intent,
        intelligence: &MarketIntelligence,
    ) -> Vec<AutonomousAction> {
        let mut actions = Vec::new();

        if !context.has_constitution {
            actions.push(AutonomousAction::for_kind(
                ActionKind::Foundation,
                "project constitution is missing",
                "constitution document established",
            ));
        }

        if intent.category == IntentCategory::Create && !context.has_specification {
            actions.push(AutonomousAction::for_kind(
                ActionKind::Specification,
                format!("create intent for {} work without a specification", intent.domain),
                "specification documents drafted",
            ));
        }

        let signals = intelligence.signal_count();
        if signals > 0 {
            actions.push(AutonomousAction::for_kind(
                ActionKind::SpecificationUpdate,
                format!("{signals} relevant market signals to fold in"),
                "specification refreshed against market signals",
            ));
        }

        if let Some(metric) = context.degraded_metrics().next() {
            actions.push(AutonomousAction::for_kind(
                ActionKind::Optimization,
                format!(
                    "{} at {:.1} is below threshold {:.1} and declining",
                    metric.name, metric.value, metric.threshold
                ),
                "degraded metric recovered above threshold",
            ));
        }

        if let Some(bug) = context.critical_bugs().next() {
            actions.push(AutonomousAction::for_kind(
                ActionKind::Planning,
                format!("critical bug open: {}", bug.description),
                "fix plan covering critical defects",
            ));
        }

        if context.elevated_feedback().next().is_some() {
            actions.push(AutonomousAction::for_kind(
                ActionKind::TaskBreakdown,
                "elevated-priority feedback awaiting task coverage",
                "feedback translated into actionable tasks",
            ));
        }

        if context.evolution_stale(EVOLUTION_DUE_DAYS) {
            actions.push(AutonomousAction::for_kind(
                ActionKind::ScheduledOptimization,
                "no recent evolution cycle",
                "evolutionary optimization pass completed",
            ));
        }

        if context.has_tasks && !context.has_implementation {
            actions.push(AutonomousAction::for_kind(
                ActionKind::Implementation,
                "tasks exist without an implementation",
                "task list implemented",
            ));
        }

        // Stable sort: equal priorities keep rule order.
        actions.sort_by(|a, b| b.priority.cmp(&a.priority));
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodev_context::{
        BugReport, BugSeverity, FeedbackData, FeedbackKind, FeedbackPriority, FeedbackSource,
        IntentClassifier, MetricTrend, PerformanceMetric, ProjectContext, RecentSignals,
    };
    use chrono::{Duration, Utc};

    fn intent(request: &str) -> Intent {
        IntentClassifier::new().classify(request)
    }

    fn recent_evolution() -> RecentSignals {
        RecentSignals::new().with_last_evolution(Utc::now() - Duration::hours(2))
    }

    #[test]
    fn missing_constitution_yields_one_top_priority_action() {
        let context = ProjectContext::new().with_signals(recent_evolution());
        let plan = ActionPlanner::new().plan(
            &context,
            &intent("keep things tidy"),
            &MarketIntelligence::new(),
        );

        let top: Vec<_> = plan.iter().filter(|action| action.priority == 10).collect();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].kind, ActionKind::Foundation);
        assert!(top[0].dependencies.is_empty());
    }

    #[test]
    fn planning_is_idempotent_for_identical_inputs() {
        let context = ProjectContext::new()
            .with_constitution(true)
            .with_signals(
                RecentSignals::new()
                    .with_bug(BugReport::new("crash on save", BugSeverity::Critical))
                    .with_last_evolution(Utc::now() - Duration::hours(2)),
            );
        let intent = intent("fix the crash urgently");
        let intelligence = MarketIntelligence::new();

        let planner = ActionPlanner::new();
        let first = planner.plan(&context, &intent, &intelligence);
        let second = planner.plan(&context, &intent, &intelligence);
        assert_eq!(first, second);
    }

    #[test]
    fn mature_project_with_create_intent_needs_implementation_only() {
        let context = ProjectContext::new()
            .with_constitution(true)
            .with_specification(true)
            .with_plan(true)
            .with_tasks(true)
            .with_implementation(false)
            .with_signals(recent_evolution());
        let plan = ActionPlanner::new().plan(
            &context,
            &intent("create a settings page"),
            &MarketIntelligence::new(),
        );

        assert!(plan
            .iter()
            .any(|action| action.kind == ActionKind::Implementation && action.priority == 9));
        assert!(!plan.iter().any(|action| action.kind == ActionKind::Foundation));
        assert!(!plan.iter().any(|action| action.kind == ActionKind::Specification));
    }

    #[test]
    fn degraded_metric_triggers_optimization_at_eight() {
        let context = ProjectContext::new().with_constitution(true).with_signals(
            recent_evolution().with_metric(PerformanceMetric::new(
                "response_time_score",
                60.0,
                70.0,
                MetricTrend::Declining,
            )),
        );
        let plan = ActionPlanner::new().plan(
            &context,
            &intent("routine pass"),
            &MarketIntelligence::new(),
        );

        let optimization = plan
            .iter()
            .find(|action| action.kind == ActionKind::Optimization)
            .unwrap();
        assert_eq!(optimization.priority, 8);
        assert!(optimization.justification.contains("response_time_score"));
    }

    #[test]
    fn market_signals_request_a_specification_refresh() {
        let context = ProjectContext::new().with_constitution(true).with_signals(recent_evolution());
        let intelligence = MarketIntelligence::new().with_trend(
            autodev_context::MarketTrend::new("edge inference", 0.8, "scan"),
        );
        let plan = ActionPlanner::new().plan(&context, &intent("routine pass"), &intelligence);

        let refresh = plan
            .iter()
            .find(|action| action.kind == ActionKind::SpecificationUpdate)
            .unwrap();
        assert_eq!(refresh.priority, 7);
        assert_eq!(refresh.dependencies, vec!["create_constitution".to_owned()]);
    }

    #[test]
    fn ties_keep_rule_order_and_sort_is_by_priority() {
        let context = ProjectContext::new().with_signals(
            RecentSignals::new()
                .with_bug(BugReport::new("data loss", BugSeverity::Critical))
                .with_feedback(FeedbackData::new(
                    FeedbackSource::User,
                    FeedbackKind::Bug,
                    FeedbackPriority::High,
                    "saving keeps failing",
                ))
                .with_metric(PerformanceMetric::new(
                    "latency_score",
                    50.0,
                    70.0,
                    MetricTrend::Declining,
                )),
        );
        let plan = ActionPlanner::new().plan(
            &context,
            &intent("routine pass"),
            &MarketIntelligence::new(),
        );

        let kinds: Vec<ActionKind> = plan.iter().map(|action| action.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::Foundation,
                ActionKind::Planning,
                ActionKind::Optimization,
                ActionKind::TaskBreakdown,
                ActionKind::ScheduledOptimization,
            ]
        );
    }
}
