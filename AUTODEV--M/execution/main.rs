use std::sync::Arc;

use autodev_planning::AutonomousAction;

use crate::backends::loopback::{
    LoopbackAutomationBackend, LoopbackCommandBackend, LoopbackWorkflowTool,
};
use crate::backends::{AutomationBackend, CommandBackend, Toolbox};
use crate::coordinator::{ExecutionReport, WorkflowCoordinator};
use crate::environment::SelectionHints;
use crate::telemetry::ExecutionTelemetry;

/// Front door for the execution stack: one coordinator behind a thin shell.
#[derive(Debug)]
pub struct ExecutionRuntime {
    coordinator: WorkflowCoordinator,
}

impl ExecutionRuntime {
    /// Wraps a prepared coordinator.
    #[must_use]
    pub const fn new(coordinator: WorkflowCoordinator) -> Self {
        Self { coordinator }
    }

    /// Default wiring: loopback backends, loopback tools, and file telemetry
    /// under `logs/execution/`. Checkpoint stubs land in `artifacts/checkpoints/`.
    #[must_use]
    pub fn bootstrap() -> Self {
        let telemetry = ExecutionTelemetry::builder("execution")
            .log_path("logs/execution/runtime.log.jsonl")
            .build()
            .ok();
        let mut builder = WorkflowCoordinator::builder()
            .command_backend(Arc::new(LoopbackCommandBackend::new()) as Arc<dyn CommandBackend>)
            .automation_backend(
                Arc::new(LoopbackAutomationBackend::new("artifacts/checkpoints"))
                    as Arc<dyn AutomationBackend>,
            )
            .toolbox(
                Toolbox::new()
                    .with_spec_workflow(Arc::new(LoopbackWorkflowTool::new("spec-workflow")))
                    .with_evolutionary(Arc::new(LoopbackWorkflowTool::new(
                        "evolutionary-optimizer",
                    ))),
            );
        if let Some(telemetry) = telemetry {
            builder = builder.telemetry(telemetry);
        }
        Self::new(builder.build())
    }

    /// Executes one plan and returns the sealed report.
    pub async fn execute(
        &self,
        actions: &[AutonomousAction],
        request: &str,
        hints: &SelectionHints,
    ) -> ExecutionReport {
        self.coordinator.execute_plan(actions, request, hints).await
    }

    /// Coordinator in use.
    #[must_use]
    pub const fn coordinator(&self) -> &WorkflowCoordinator {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::DEFAULT_CHECKPOINT_CONFIDENCE;
    use autodev_planning::ActionKind;

    #[tokio::test]
    async fn execute_delegates_to_the_coordinator() {
        let runtime = ExecutionRuntime::new(WorkflowCoordinator::builder().build());
        let plan = vec![AutonomousAction::for_kind(
            ActionKind::Implementation,
            "tasks are queued",
            "implementation lands",
        )];

        let report = runtime
            .execute(&plan, "implement the queued tasks", &SelectionHints::new(false))
            .await;

        assert_eq!(report.execution.total_steps, 1);
        assert!(report.execution.steps[0].success);
    }

    #[test]
    fn default_policy_carries_the_named_threshold() {
        let runtime = ExecutionRuntime::new(WorkflowCoordinator::builder().build());
        let policy = runtime.coordinator().policy();
        assert!(
            (policy.checkpoint_confidence_threshold - DEFAULT_CHECKPOINT_CONFIDENCE).abs()
                < f64::EPSILON
        );
    }
}
