use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use autodev_planning::AutonomousAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::backends::loopback::LoopbackCommandBackend;
use crate::backends::{
    AutomationBackend, AutomationStep, CommandBackend, ExecutionError, Toolbox,
};
use crate::environment::{
    EnvironmentDecision, EnvironmentSelector, ExecutionEnvironment, SelectionHints,
};
use crate::telemetry::ExecutionTelemetry;
use crate::visual::{HeuristicVisualAnalyzer, VisualAnalysis, VisualAnalyzer};

/// Default confidence floor above which hybrid checkpoints are captured.
pub const DEFAULT_CHECKPOINT_CONFIDENCE: f64 = 0.7;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunable execution knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionPolicy {
    /// Checkpoints are captured only when decision confidence exceeds this.
    pub checkpoint_confidence_threshold: f64,
    /// Budget for each backend call.
    pub step_timeout: Duration,
}

impl ExecutionPolicy {
    /// Policy with the default threshold and timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            checkpoint_confidence_threshold: DEFAULT_CHECKPOINT_CONFIDENCE,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one executed plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Command identifier that ran.
    pub command: String,
    /// Environment that produced the final outcome.
    pub environment: ExecutionEnvironment,
    /// Whether the step ended in success.
    pub success: bool,
    /// Wall-clock time including fallback attempts.
    pub duration: Duration,
    /// Checkpoint artifact attached to the step, if any.
    pub screenshot: Option<PathBuf>,
    /// Data a backend extracted, if any.
    pub extracted: Option<Value>,
    /// Failure text when `success` is false.
    pub error: Option<String>,
    /// Whether a fallback environment produced the outcome.
    pub fallback_used: bool,
}

/// Sealed aggregate of one plan run; the coordinator keeps no handle to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Run identifier.
    pub id: String,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub completed_at: DateTime<Utc>,
    /// Per-step results in plan order.
    pub steps: Vec<StepRecord>,
    /// Steps attempted.
    pub total_steps: usize,
    /// Steps that ended in success.
    pub successful_steps: usize,
    /// Successful over total, explicitly zero for an empty run.
    pub success_rate: f64,
}

impl WorkflowExecution {
    fn seal(id: String, started_at: DateTime<Utc>, steps: Vec<StepRecord>) -> Self {
        let total_steps = steps.len();
        let successful_steps = steps.iter().filter(|step| step.success).count();
        // An empty run reports rate zero rather than dividing by zero.
        let success_rate = if total_steps == 0 {
            0.0
        } else {
            successful_steps as f64 / total_steps as f64
        };
        Self {
            id,
            started_at,
            completed_at: Utc::now(),
            steps,
            total_steps,
            successful_steps,
            success_rate,
        }
    }

    /// Wall-clock span of the whole run.
    #[must_use]
    pub fn execution_time(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}

/// Sealed execution plus the guidance gathered alongside it.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The sealed run aggregate.
    pub execution: WorkflowExecution,
    /// Environment decision made for each step, in plan order.
    pub decisions: Vec<EnvironmentDecision>,
    /// Checkpoint comparisons for the next planning pass.
    pub analyses: Vec<VisualAnalysis>,
}

struct StepAttempt {
    environment: ExecutionEnvironment,
    success: bool,
    screenshot: Option<PathBuf>,
    extracted: Option<Value>,
    error: Option<String>,
    analysis: Option<VisualAnalysis>,
}

impl StepAttempt {
    fn failed(environment: ExecutionEnvironment, error: String) -> Self {
        Self {
            environment,
            success: false,
            screenshot: None,
            extracted: None,
            error: Some(error),
            analysis: None,
        }
    }
}

/// Configures a [`WorkflowCoordinator`].
#[derive(Default)]
pub struct WorkflowCoordinatorBuilder {
    command: Option<Arc<dyn CommandBackend>>,
    automation: Option<Arc<dyn AutomationBackend>>,
    tools: Toolbox,
    analyzer: Option<Arc<dyn VisualAnalyzer>>,
    policy: Option<ExecutionPolicy>,
    telemetry: Option<ExecutionTelemetry>,
}

impl WorkflowCoordinatorBuilder {
    /// Wires the command backend.
    #[must_use]
    pub fn command_backend(mut self, backend: Arc<dyn CommandBackend>) -> Self {
        self.command = Some(backend);
        self
    }

    /// Wires the automation backend.
    #[must_use]
    pub fn automation_backend(mut self, backend: Arc<dyn AutomationBackend>) -> Self {
        self.automation = Some(backend);
        self
    }

    /// Wires the external workflow tools.
    #[must_use]
    pub fn toolbox(mut self, tools: Toolbox) -> Self {
        self.tools = tools;
        self
    }

    /// Overrides the checkpoint analyzer.
    #[must_use]
    pub fn analyzer(mut self, analyzer: Arc<dyn VisualAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Overrides the execution policy.
    #[must_use]
    pub const fn policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn telemetry(mut self, telemetry: ExecutionTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds the coordinator, defaulting to loopback commands and the
    /// byte-footprint analyzer.
    #[must_use]
    pub fn build(self) -> WorkflowCoordinator {
        WorkflowCoordinator {
            selector: EnvironmentSelector::new(),
            command: self
                .command
                .unwrap_or_else(|| Arc::new(LoopbackCommandBackend::new())),
            automation: self.automation,
            tools: self.tools,
            analyzer: self
                .analyzer
                .unwrap_or_else(|| Arc::new(HeuristicVisualAnalyzer::new())),
            policy: self.policy.unwrap_or_default(),
            telemetry: self.telemetry,
        }
    }
}

/// Runs plans across the assigned environments, one step at a time.
pub struct WorkflowCoordinator {
    selector: EnvironmentSelector,
    command: Arc<dyn CommandBackend>,
    automation: Option<Arc<dyn AutomationBackend>>,
    tools: Toolbox,
    analyzer: Arc<dyn VisualAnalyzer>,
    policy: ExecutionPolicy,
    telemetry: Option<ExecutionTelemetry>,
}

impl WorkflowCoordinator {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> WorkflowCoordinatorBuilder {
        WorkflowCoordinatorBuilder::default()
    }

    /// Policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Executes a plan in order and seals the aggregate.
    ///
    /// The plan is borrowed immutably and never edited; a step failure walks
    /// the decision's fallback list, and an exhausted list records the step
    /// as failed without stopping the run. Checkpoint analyses ride back on
    /// the report as guidance for the next planning pass.
    pub async fn execute_plan(
        &self,
        actions: &[AutonomousAction],
        request: &str,
        hints: &SelectionHints,
    ) -> ExecutionReport {
        let mut hints = *hints;
        hints.automation_available = hints.automation_available && self.automation.is_some();

        let id = format!("wf-{}", Uuid::new_v4());
        let started_at = Utc::now();
        self.log(
            LogLevel::Info,
            "plan execution started",
            json!({"id": id, "actions": actions.len()}),
        );
        self.event(
            "execution.plan.started",
            json!({"id": id, "actions": actions.len()}),
        );

        let mut steps = Vec::with_capacity(actions.len());
        let mut decisions = Vec::with_capacity(actions.len());
        let mut analyses = Vec::new();
        for action in actions {
            let decision = self.selector.decide(action, request, &hints);
            let record = self
                .run_step(action, &decision, &mut analyses)
                .await;
            self.log(
                if record.success {
                    LogLevel::Info
                } else {
                    LogLevel::Warn
                },
                "step completed",
                json!({
                    "command": record.command,
                    "environment": record.environment.to_string(),
                    "success": record.success,
                    "fallback_used": record.fallback_used,
                }),
            );
            self.event(
                "execution.step.completed",
                json!({
                    "command": record.command,
                    "success": record.success,
                }),
            );
            decisions.push(decision);
            steps.push(record);
        }

        let execution = WorkflowExecution::seal(id, started_at, steps);
        self.log(
            LogLevel::Info,
            "plan execution completed",
            json!({
                "id": execution.id,
                "success_rate": execution.success_rate,
                "successful_steps": execution.successful_steps,
                "total_steps": execution.total_steps,
            }),
        );
        self.event(
            "execution.plan.completed",
            json!({"id": execution.id, "success_rate": execution.success_rate}),
        );
        ExecutionReport {
            execution,
            decisions,
            analyses,
        }
    }

    async fn run_step(
        &self,
        action: &AutonomousAction,
        decision: &EnvironmentDecision,
        analyses: &mut Vec<VisualAnalysis>,
    ) -> StepRecord {
        let started = Instant::now();
        let mut attempt = self.run_in(decision.environment, action, decision).await;
        let mut fallback_used = false;
        if !attempt.success {
            for &environment in &decision.fallbacks {
                attempt = self.run_in(environment, action, decision).await;
                fallback_used = true;
                if attempt.success {
                    break;
                }
            }
        }
        if let Some(analysis) = attempt.analysis.take() {
            analyses.push(analysis);
        }
        StepRecord {
            command: action.command.clone(),
            environment: attempt.environment,
            success: attempt.success,
            duration: started.elapsed(),
            screenshot: attempt.screenshot,
            extracted: attempt.extracted,
            error: attempt.error,
            fallback_used,
        }
    }

    async fn run_in(
        &self,
        environment: ExecutionEnvironment,
        action: &AutonomousAction,
        decision: &EnvironmentDecision,
    ) -> StepAttempt {
        match environment {
            ExecutionEnvironment::Terminal => self.terminal_attempt(action).await,
            ExecutionEnvironment::Browser => self.browser_attempt(action).await,
            ExecutionEnvironment::Hybrid => self.hybrid_attempt(action, decision).await,
        }
    }

    async fn terminal_attempt(&self, action: &AutonomousAction) -> StepAttempt {
        if let Some(tool) = self.tools.tool_for(action.kind) {
            return match self.bounded(tool.invoke(action)).await {
                Ok(result) => StepAttempt {
                    environment: ExecutionEnvironment::Terminal,
                    success: true,
                    screenshot: None,
                    extracted: Some(Value::String(result)),
                    error: None,
                    analysis: None,
                },
                Err(err) => {
                    StepAttempt::failed(ExecutionEnvironment::Terminal, err.to_string())
                }
            };
        }
        match self
            .bounded(self.command.run(&action.command, &action.justification))
            .await
        {
            Ok(outcome) => {
                let error = (!outcome.success).then(|| outcome.output.clone());
                StepAttempt {
                    environment: ExecutionEnvironment::Terminal,
                    success: outcome.success,
                    screenshot: None,
                    extracted: (!outcome.output.is_empty())
                        .then(|| Value::String(outcome.output)),
                    error,
                    analysis: None,
                }
            }
            Err(err) => StepAttempt::failed(ExecutionEnvironment::Terminal, err.to_string()),
        }
    }

    async fn browser_attempt(&self, action: &AutonomousAction) -> StepAttempt {
        let Some(automation) = &self.automation else {
            return StepAttempt::failed(
                ExecutionEnvironment::Browser,
                ExecutionError::BackendUnavailable {
                    backend: "automation",
                }
                .to_string(),
            );
        };
        let evaluated = self
            .bounded(automation.perform(AutomationStep::Evaluate {
                script: action.command.clone(),
            }))
            .await;
        match evaluated {
            Ok(artifact) if artifact.success => {
                let screenshot = self.capture(action.command.clone()).await;
                StepAttempt {
                    environment: ExecutionEnvironment::Browser,
                    success: true,
                    screenshot,
                    extracted: artifact.extracted,
                    error: None,
                    analysis: None,
                }
            }
            Ok(artifact) => StepAttempt::failed(
                ExecutionEnvironment::Browser,
                artifact
                    .error
                    .unwrap_or_else(|| "automation step failed".to_owned()),
            ),
            Err(err) => StepAttempt::failed(ExecutionEnvironment::Browser, err.to_string()),
        }
    }

    async fn hybrid_attempt(
        &self,
        action: &AutonomousAction,
        decision: &EnvironmentDecision,
    ) -> StepAttempt {
        let checkpoints = decision.confidence > self.policy.checkpoint_confidence_threshold;
        let before = if checkpoints {
            self.capture(format!("{}-before", action.command)).await
        } else {
            None
        };
        let mut attempt = self.terminal_attempt(action).await;
        attempt.environment = ExecutionEnvironment::Hybrid;
        let after = if checkpoints {
            self.capture(format!("{}-after", action.command)).await
        } else {
            None
        };
        if let (Some(before), Some(after)) = (&before, &after) {
            if let Ok(analysis) = self
                .bounded(self.analyzer.compare(before, after, &action.expected_outcome))
                .await
            {
                attempt.analysis = Some(analysis);
            }
        }
        attempt.screenshot = after.or(before).or(attempt.screenshot);
        attempt
    }

    // Checkpoint misses never fail the surrounding step.
    async fn capture(&self, name: String) -> Option<PathBuf> {
        let automation = self.automation.as_ref()?;
        match self
            .bounded(automation.perform(AutomationStep::Screenshot { name }))
            .await
        {
            Ok(artifact) if artifact.success => artifact.artifact_path,
            _ => None,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, ExecutionError>> + Send,
    ) -> Result<T, ExecutionError> {
        match tokio::time::timeout(self.policy.step_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout(self.policy.step_timeout)),
        }
    }

    fn log(&self, level: LogLevel, message: &str, fields: Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.log(level, message, &fields);
        }
    }

    fn event(&self, kind: &str, payload: Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.event(kind, payload);
        }
    }
}

impl std::fmt::Debug for WorkflowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCoordinator")
            .field("automation", &self.automation.is_some())
            .field("tools", &self.tools)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::loopback::{LoopbackAutomationBackend, LoopbackWorkflowTool};
    use crate::visual::ChangeSignificance;
    use autodev_planning::ActionKind;

    fn actions(kinds: &[ActionKind]) -> Vec<AutonomousAction> {
        kinds
            .iter()
            .map(|kind| AutonomousAction::for_kind(*kind, "queued for this run", "step completes"))
            .collect()
    }

    #[tokio::test]
    async fn empty_plan_reports_zero_rate_explicitly() {
        let coordinator = WorkflowCoordinator::builder().build();
        let report = coordinator
            .execute_plan(&[], "maintain", &SelectionHints::new(false))
            .await;

        assert_eq!(report.execution.total_steps, 0);
        assert!((report.execution.success_rate - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn terminal_plan_records_every_step() {
        let backend = Arc::new(LoopbackCommandBackend::new());
        let coordinator = WorkflowCoordinator::builder()
            .command_backend(Arc::clone(&backend) as Arc<dyn CommandBackend>)
            .build();
        let plan = actions(&[ActionKind::Foundation, ActionKind::Planning]);

        let report = coordinator
            .execute_plan(&plan, "run the build script then deploy and test", &SelectionHints::new(false))
            .await;

        assert_eq!(report.execution.total_steps, 2);
        assert_eq!(report.execution.successful_steps, 2);
        assert!((report.execution.success_rate - 1.0).abs() < f64::EPSILON);
        assert!(report
            .execution
            .steps
            .iter()
            .all(|step| step.environment == ExecutionEnvironment::Terminal));
        assert_eq!(backend.calls(), vec!["create_constitution", "plan_bug_fixes"]);
    }

    #[tokio::test]
    async fn failed_steps_walk_fallbacks_and_the_run_continues() {
        let backend = Arc::new(LoopbackCommandBackend::new().failing_on("create_constitution"));
        let coordinator = WorkflowCoordinator::builder()
            .command_backend(Arc::clone(&backend) as Arc<dyn CommandBackend>)
            .build();
        let plan = actions(&[ActionKind::Foundation, ActionKind::Planning]);

        let report = coordinator
            .execute_plan(&plan, "deploy the build", &SelectionHints::new(false))
            .await;

        let failed = &report.execution.steps[0];
        assert!(!failed.success);
        assert!(failed.fallback_used);
        assert!(failed.error.is_some());
        assert!(report.execution.steps[1].success);
        assert!((report.execution.success_rate - 0.5).abs() < f64::EPSILON);
        // Primary terminal attempt plus one terminal fallback, then the next step.
        assert_eq!(
            backend.calls(),
            vec!["create_constitution", "create_constitution", "plan_bug_fixes"]
        );
    }

    #[tokio::test]
    async fn hybrid_checkpoints_capture_above_the_confidence_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let automation = Arc::new(LoopbackAutomationBackend::new(dir.path()));
        let coordinator = WorkflowCoordinator::builder()
            .automation_backend(Arc::clone(&automation) as Arc<dyn AutomationBackend>)
            .build();
        let plan = actions(&[ActionKind::Foundation]);
        let hints = SelectionHints::new(true).with_explicit(ExecutionEnvironment::Hybrid);

        let report = coordinator.execute_plan(&plan, "set the groundwork", &hints).await;

        let step = &report.execution.steps[0];
        assert!(step.success);
        assert!(step.screenshot.is_some());
        assert_eq!(report.analyses.len(), 1);
        assert_eq!(report.analyses[0].significance, ChangeSignificance::Minor);
        assert_eq!(automation.performed(), vec!["screenshot", "screenshot"]);
    }

    #[tokio::test]
    async fn low_confidence_hybrid_skips_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let automation = Arc::new(LoopbackAutomationBackend::new(dir.path()));
        let coordinator = WorkflowCoordinator::builder()
            .automation_backend(Arc::clone(&automation) as Arc<dyn AutomationBackend>)
            .policy(ExecutionPolicy {
                checkpoint_confidence_threshold: 1.5,
                step_timeout: Duration::from_secs(5),
            })
            .build();
        let plan = actions(&[ActionKind::Foundation]);
        let hints = SelectionHints::new(true).with_explicit(ExecutionEnvironment::Hybrid);

        let report = coordinator.execute_plan(&plan, "set the groundwork", &hints).await;

        assert!(report.execution.steps[0].success);
        assert!(report.execution.steps[0].screenshot.is_none());
        assert!(report.analyses.is_empty());
        assert!(automation.performed().is_empty());
    }

    #[tokio::test]
    async fn explicit_browser_without_automation_falls_back() {
        let coordinator = WorkflowCoordinator::builder().build();
        let plan = actions(&[ActionKind::TaskBreakdown]);
        let hints = SelectionHints::new(true).with_explicit(ExecutionEnvironment::Browser);

        let report = coordinator.execute_plan(&plan, "click the page", &hints).await;

        let step = &report.execution.steps[0];
        assert!(step.success);
        assert!(step.fallback_used);
        assert_eq!(step.environment, ExecutionEnvironment::Hybrid);
    }

    #[tokio::test]
    async fn timeouts_count_as_step_failures() {
        let backend = Arc::new(
            LoopbackCommandBackend::new().with_latency(Duration::from_millis(100)),
        );
        let coordinator = WorkflowCoordinator::builder()
            .command_backend(backend as Arc<dyn CommandBackend>)
            .policy(ExecutionPolicy {
                checkpoint_confidence_threshold: DEFAULT_CHECKPOINT_CONFIDENCE,
                step_timeout: Duration::from_millis(20),
            })
            .build();
        let plan = actions(&[ActionKind::Planning]);

        let report = coordinator
            .execute_plan(&plan, "deploy the build", &SelectionHints::new(false))
            .await;

        let step = &report.execution.steps[0];
        assert!(!step.success);
        assert!(step.error.as_deref().is_some_and(|err| err.contains("timed out")));
    }

    #[tokio::test]
    async fn tools_take_precedence_over_the_command_backend() {
        let backend = Arc::new(LoopbackCommandBackend::new());
        let coordinator = WorkflowCoordinator::builder()
            .command_backend(Arc::clone(&backend) as Arc<dyn CommandBackend>)
            .toolbox(
                Toolbox::new()
                    .with_spec_workflow(Arc::new(LoopbackWorkflowTool::new("spec-workflow"))),
            )
            .build();
        let plan = actions(&[ActionKind::Foundation]);

        let report = coordinator
            .execute_plan(&plan, "deploy the build", &SelectionHints::new(false))
            .await;

        let step = &report.execution.steps[0];
        assert!(step.success);
        assert_eq!(
            step.extracted,
            Some(Value::String(
                "spec-workflow completed create_constitution".to_owned()
            ))
        );
        assert!(backend.calls().is_empty());
    }
}
