use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use autodev_planning::AutonomousAction;
use parking_lot::Mutex;
use serde_json::json;

use super::{
    AutomationBackend, AutomationStep, CommandBackend, CommandOutcome, ExecutionError,
    StepArtifact, WorkflowTool,
};

const DEFAULT_LATENCY: Duration = Duration::from_millis(5);

/// In-process command backend; completes every command unless scripted to fail.
#[derive(Debug)]
pub struct LoopbackCommandBackend {
    latency: Duration,
    fail_commands: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl LoopbackCommandBackend {
    /// Backend that succeeds on every command.
    #[must_use]
    pub fn new() -> Self {
        Self {
            latency: DEFAULT_LATENCY,
            fail_commands: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the simulated latency.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Scripts a command identifier to fail on every run.
    #[must_use]
    pub fn failing_on(mut self, command: impl Into<String>) -> Self {
        self.fail_commands.push(command.into());
        self
    }

    /// Commands run so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl Default for LoopbackCommandBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandBackend for LoopbackCommandBackend {
    async fn run(&self, command: &str, context: &str) -> Result<CommandOutcome, ExecutionError> {
        self.calls.lock().push(command.to_owned());
        let start = Instant::now();
        tokio::time::sleep(self.latency).await;
        if self.fail_commands.iter().any(|failing| failing == command) {
            return Ok(CommandOutcome::failed(
                format!("{command} failed in loopback"),
                start.elapsed(),
            ));
        }
        Ok(CommandOutcome::succeeded(
            format!("{command} completed ({context})"),
            start.elapsed(),
        ))
    }
}

/// In-process automation backend; screenshots become small stub files.
#[derive(Debug)]
pub struct LoopbackAutomationBackend {
    root: PathBuf,
    shots: AtomicU64,
    performed: Mutex<Vec<String>>,
}

impl LoopbackAutomationBackend {
    /// Backend writing stub artifacts under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shots: AtomicU64::new(0),
            performed: Mutex::new(Vec::new()),
        }
    }

    /// Step labels performed so far, in call order.
    #[must_use]
    pub fn performed(&self) -> Vec<String> {
        self.performed.lock().clone()
    }
}

#[async_trait]
impl AutomationBackend for LoopbackAutomationBackend {
    async fn perform(&self, step: AutomationStep) -> Result<StepArtifact, ExecutionError> {
        self.performed.lock().push(step.kind_label().to_owned());
        match step {
            AutomationStep::Screenshot { name } => {
                tokio::fs::create_dir_all(&self.root)
                    .await
                    .map_err(|err| ExecutionError::Automation(err.to_string()))?;
                let stamp = self.shots.fetch_add(1, Ordering::Relaxed);
                let path = self.root.join(format!("{name}.png"));
                tokio::fs::write(&path, format!("{name}:{stamp}"))
                    .await
                    .map_err(|err| ExecutionError::Automation(err.to_string()))?;
                Ok(StepArtifact::succeeded().with_artifact(path))
            }
            AutomationStep::Evaluate { script } => {
                Ok(StepArtifact::succeeded().with_extracted(json!({ "evaluated": script })))
            }
            AutomationStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(StepArtifact::succeeded())
            }
            AutomationStep::Navigate { .. }
            | AutomationStep::Click { .. }
            | AutomationStep::Type { .. }
            | AutomationStep::Scroll { .. } => Ok(StepArtifact::succeeded()),
        }
    }
}

/// In-process workflow tool that echoes the action it was handed.
#[derive(Debug, Clone)]
pub struct LoopbackWorkflowTool {
    name: String,
    available: bool,
}

impl LoopbackWorkflowTool {
    /// Available tool with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
        }
    }

    /// Tool that reports itself unavailable.
    #[must_use]
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: false,
        }
    }
}

#[async_trait]
impl WorkflowTool for LoopbackWorkflowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn invoke(&self, action: &AutonomousAction) -> Result<String, ExecutionError> {
        Ok(format!("{} completed {}", self.name, action.command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodev_planning::ActionKind;

    #[tokio::test]
    async fn screenshot_steps_write_stub_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LoopbackAutomationBackend::new(dir.path());

        let artifact = backend
            .perform(AutomationStep::Screenshot {
                name: "baseline".into(),
            })
            .await
            .unwrap();

        let path = artifact.artifact_path.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "baseline:0");
        assert_eq!(backend.performed(), vec!["screenshot"]);
    }

    #[tokio::test]
    async fn evaluate_steps_return_extracted_values() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LoopbackAutomationBackend::new(dir.path());

        let artifact = backend
            .perform(AutomationStep::Evaluate {
                script: "window.title".into(),
            })
            .await
            .unwrap();

        assert_eq!(
            artifact.extracted,
            Some(json!({"evaluated": "window.title"}))
        );
        assert!(artifact.artifact_path.is_none());
    }

    #[tokio::test]
    async fn scripted_commands_fail_and_calls_are_recorded() {
        let backend = LoopbackCommandBackend::new()
            .with_latency(Duration::ZERO)
            .failing_on("optimize_performance");

        let failed = backend.run("optimize_performance", "slow path").await.unwrap();
        let passed = backend.run("implement_tasks", "queued work").await.unwrap();

        assert!(!failed.success);
        assert!(passed.success);
        assert_eq!(
            backend.calls(),
            vec!["optimize_performance", "implement_tasks"]
        );
    }

    #[tokio::test]
    async fn tools_echo_the_action_command() {
        let tool = LoopbackWorkflowTool::new("spec-workflow");
        let action = AutonomousAction::for_kind(
            ActionKind::Foundation,
            "constitution is missing",
            "constitution document established",
        );
        let result = tool.invoke(&action).await.unwrap();
        assert_eq!(result, "spec-workflow completed create_constitution");
    }
}
