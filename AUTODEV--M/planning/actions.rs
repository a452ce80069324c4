use std::fmt;

use serde::{Deserialize, Serialize};

/// The eight action shapes the planner can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Establish the project constitution.
    Foundation,
    /// Write the initial specification.
    Specification,
    /// Refresh the specification from market signals.
    SpecificationUpdate,
    /// Tune a degraded performance metric.
    Optimization,
    /// Plan fixes for critical defects.
    Planning,
    /// Break planned work into tasks.
    TaskBreakdown,
    /// Run the scheduled evolutionary optimization.
    ScheduledOptimization,
    /// Implement the outstanding tasks.
    Implementation,
}

impl ActionKind {
    /// Command identifier executed by the coordinator.
    #[must_use]
    pub const fn command(self) -> &'static str {
        match self {
            Self::Foundation => "create_constitution",
            Self::Specification => "create_specification",
            Self::SpecificationUpdate => "update_specification",
            Self::Optimization => "optimize_performance",
            Self::Planning => "plan_bug_fixes",
            Self::TaskBreakdown => "break_down_tasks",
            Self::ScheduledOptimization => "run_evolution_optimization",
            Self::Implementation => "implement_tasks",
        }
    }

    /// Fixed priority the planner assigns to this kind.
    #[must_use]
    pub const fn base_priority(self) -> u8 {
        match self {
            Self::Foundation | Self::Planning => 10,
            Self::Specification | Self::Implementation => 9,
            Self::Optimization | Self::TaskBreakdown => 8,
            Self::SpecificationUpdate => 7,
            Self::ScheduledOptimization => 6,
        }
    }

    /// Commands that should conceptually run before this kind.
    ///
    /// Advisory metadata only; nothing enforces or reorders by it.
    #[must_use]
    pub fn default_dependencies(self) -> Vec<String> {
        let commands: &[&str] = match self {
            Self::Foundation => &[],
            Self::Specification | Self::SpecificationUpdate => &[Self::Foundation.command()],
            Self::Optimization | Self::Implementation => &[Self::TaskBreakdown.command()],
            Self::Planning => &[Self::Specification.command()],
            Self::TaskBreakdown => &[Self::Planning.command()],
            Self::ScheduledOptimization => &[Self::Implementation.command()],
        };
        commands.iter().map(|command| (*command).to_owned()).collect()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// One planned unit of work.
///
/// Deliberately free of ids and timestamps: planning the same inputs twice
/// must produce comparably equal lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutonomousAction {
    /// Action shape.
    pub kind: ActionKind,
    /// Command identifier executed by the coordinator.
    pub command: String,
    /// Why the planner emitted this action.
    pub justification: String,
    /// Scheduling priority; higher runs earlier.
    pub priority: u8,
    /// What a successful run should leave behind.
    pub expected_outcome: String,
    /// Commands that should conceptually precede this one.
    pub dependencies: Vec<String>,
}

impl AutonomousAction {
    /// Builds an action with the kind's command, priority, and dependencies.
    #[must_use]
    pub fn for_kind(
        kind: ActionKind,
        justification: impl Into<String>,
        expected_outcome: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            command: kind.command().to_owned(),
            justification: justification.into(),
            priority: kind.base_priority(),
            expected_outcome: expected_outcome.into(),
            dependencies: kind.default_dependencies(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_carry_their_rule_priorities() {
        assert_eq!(ActionKind::Foundation.base_priority(), 10);
        assert_eq!(ActionKind::Planning.base_priority(), 10);
        assert_eq!(ActionKind::Specification.base_priority(), 9);
        assert_eq!(ActionKind::Implementation.base_priority(), 9);
        assert_eq!(ActionKind::Optimization.base_priority(), 8);
        assert_eq!(ActionKind::TaskBreakdown.base_priority(), 8);
        assert_eq!(ActionKind::SpecificationUpdate.base_priority(), 7);
        assert_eq!(ActionKind::ScheduledOptimization.base_priority(), 6);
    }

    #[test]
    fn foundation_has_no_dependencies() {
        let action = AutonomousAction::for_kind(
            ActionKind::Foundation,
            "project constitution is missing",
            "constitution document established",
        );
        assert_eq!(action.command, "create_constitution");
        assert!(action.dependencies.is_empty());
    }

    #[test]
    fn dependencies_point_at_producer_commands() {
        assert_eq!(
            ActionKind::Planning.default_dependencies(),
            vec!["create_specification".to_owned()]
        );
        assert_eq!(
            ActionKind::Implementation.default_dependencies(),
            vec!["break_down_tasks".to_owned()]
        );
    }
}
