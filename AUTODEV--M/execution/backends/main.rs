/// Loopback backends for standalone runs and tests.
pub mod loopback;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autodev_planning::{ActionKind, AutonomousAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Step-local failures surfaced by backends and the coordinator.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The needed backend is not wired into this coordinator.
    #[error("{backend} backend is unavailable")]
    BackendUnavailable {
        /// Which backend was missing.
        backend: &'static str,
    },
    /// A backend call outlived the per-step budget.
    #[error("step timed out after {0:?}")]
    Timeout(Duration),
    /// The automation backend rejected or failed a step.
    #[error("automation step failed: {0}")]
    Automation(String),
    /// Collaborator-specific failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result of one command-backend invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Whether the command reported success.
    pub success: bool,
    /// Captured output text.
    pub output: String,
    /// Wall-clock time the command took.
    pub duration: Duration,
}

impl CommandOutcome {
    /// Successful outcome.
    #[must_use]
    pub fn succeeded(output: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: true,
            output: output.into(),
            duration,
        }
    }

    /// Failed outcome; the backend ran but the command did not succeed.
    #[must_use]
    pub fn failed(output: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            output: output.into(),
            duration,
        }
    }
}

/// Scroll axis for automation steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    /// Toward the top.
    Up,
    /// Toward the bottom.
    Down,
    /// Toward the left edge.
    Left,
    /// Toward the right edge.
    Right,
}

/// One typed instruction for the automation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum AutomationStep {
    /// Open a url.
    Navigate {
        /// Destination url.
        url: String,
    },
    /// Click an element.
    Click {
        /// Selector or plain-language description.
        target: String,
    },
    /// Type text into an element.
    Type {
        /// Selector or plain-language description.
        target: String,
        /// Text to enter.
        text: String,
    },
    /// Scroll the viewport.
    Scroll {
        /// Axis to move along.
        direction: ScrollDirection,
        /// Distance in backend-defined units.
        amount: u32,
    },
    /// Capture a named screenshot.
    Screenshot {
        /// Artifact name.
        name: String,
    },
    /// Evaluate a script in the automation context.
    Evaluate {
        /// Script source.
        script: String,
    },
    /// Pause between steps.
    Wait {
        /// Pause length in milliseconds.
        millis: u64,
    },
}

impl AutomationStep {
    /// Short label for logs and artifact names.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Scroll { .. } => "scroll",
            Self::Screenshot { .. } => "screenshot",
            Self::Evaluate { .. } => "evaluate",
            Self::Wait { .. } => "wait",
        }
    }
}

/// Result of one automation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepArtifact {
    /// Whether the step succeeded.
    pub success: bool,
    /// Artifact the step produced, if any.
    pub artifact_path: Option<PathBuf>,
    /// Value the step extracted, if any.
    pub extracted: Option<Value>,
    /// Failure text when `success` is false.
    pub error: Option<String>,
}

impl StepArtifact {
    /// Successful artifact with nothing attached.
    #[must_use]
    pub const fn succeeded() -> Self {
        Self {
            success: true,
            artifact_path: None,
            extracted: None,
            error: None,
        }
    }

    /// Failed artifact carrying the error text.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            artifact_path: None,
            extracted: None,
            error: Some(error.into()),
        }
    }

    /// Attaches a produced file.
    #[must_use]
    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    /// Attaches an extracted value.
    #[must_use]
    pub fn with_extracted(mut self, value: Value) -> Self {
        self.extracted = Some(value);
        self
    }
}

/// Command-execution collaborator; no retry is implied by the engine.
#[async_trait]
pub trait CommandBackend: Send + Sync {
    /// Runs one command identifier with free-text context.
    async fn run(&self, command: &str, context: &str) -> Result<CommandOutcome, ExecutionError>;
}

/// Interactive-automation collaborator.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    /// Performs one typed step.
    async fn perform(&self, step: AutomationStep) -> Result<StepArtifact, ExecutionError>;
}

/// Named external tool invoked for whole actions.
#[async_trait]
pub trait WorkflowTool: Send + Sync {
    /// Tool name used in routing and logs.
    fn name(&self) -> &str;

    /// Whether the tool can currently be invoked.
    fn is_available(&self) -> bool;

    /// Runs the tool for one action, returning its textual result.
    async fn invoke(&self, action: &AutonomousAction) -> Result<String, ExecutionError>;
}

/// Routes action kinds to the external workflow tools.
#[derive(Default, Clone)]
pub struct Toolbox {
    spec_workflow: Option<Arc<dyn WorkflowTool>>,
    evolutionary: Option<Arc<dyn WorkflowTool>>,
}

impl Toolbox {
    /// Empty toolbox; every action runs through the command backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires the specification-workflow tool.
    #[must_use]
    pub fn with_spec_workflow(mut self, tool: Arc<dyn WorkflowTool>) -> Self {
        self.spec_workflow = Some(tool);
        self
    }

    /// Wires the evolutionary-optimization tool.
    #[must_use]
    pub fn with_evolutionary(mut self, tool: Arc<dyn WorkflowTool>) -> Self {
        self.evolutionary = Some(tool);
        self
    }

    /// Tool responsible for `kind`, if one is wired and available.
    #[must_use]
    pub fn tool_for(&self, kind: ActionKind) -> Option<&Arc<dyn WorkflowTool>> {
        let routed = match kind {
            ActionKind::Foundation
            | ActionKind::Specification
            | ActionKind::SpecificationUpdate
            | ActionKind::Planning
            | ActionKind::TaskBreakdown => self.spec_workflow.as_ref(),
            ActionKind::Optimization | ActionKind::ScheduledOptimization => {
                self.evolutionary.as_ref()
            }
            ActionKind::Implementation => None,
        };
        routed.filter(|tool| tool.is_available())
    }
}

impl fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolbox")
            .field(
                "spec_workflow",
                &self.spec_workflow.as_ref().map(|tool| tool.name()),
            )
            .field(
                "evolutionary",
                &self.evolutionary.as_ref().map(|tool| tool.name()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::loopback::LoopbackWorkflowTool;
    use super::*;

    fn toolbox() -> Toolbox {
        Toolbox::new()
            .with_spec_workflow(Arc::new(LoopbackWorkflowTool::new("spec-workflow")))
            .with_evolutionary(Arc::new(LoopbackWorkflowTool::new("evolutionary-optimizer")))
    }

    #[test]
    fn specification_actions_route_to_the_spec_tool() {
        let tools = toolbox();
        for kind in [
            ActionKind::Foundation,
            ActionKind::Specification,
            ActionKind::SpecificationUpdate,
            ActionKind::Planning,
            ActionKind::TaskBreakdown,
        ] {
            let tool = tools.tool_for(kind).unwrap();
            assert_eq!(tool.name(), "spec-workflow");
        }
    }

    #[test]
    fn optimization_actions_route_to_the_evolutionary_tool() {
        let tools = toolbox();
        for kind in [ActionKind::Optimization, ActionKind::ScheduledOptimization] {
            let tool = tools.tool_for(kind).unwrap();
            assert_eq!(tool.name(), "evolutionary-optimizer");
        }
    }

    #[test]
    fn implementation_never_routes_to_a_tool() {
        assert!(toolbox().tool_for(ActionKind::Implementation).is_none());
    }

    #[test]
    fn unavailable_tools_are_skipped() {
        let tools = Toolbox::new()
            .with_spec_workflow(Arc::new(LoopbackWorkflowTool::unavailable("spec-workflow")));
        assert!(tools.tool_for(ActionKind::Foundation).is_none());
    }

    #[test]
    fn step_labels_cover_every_variant() {
        let steps = [
            AutomationStep::Navigate {
                url: "https://example.test".into(),
            },
            AutomationStep::Click {
                target: "submit".into(),
            },
            AutomationStep::Type {
                target: "name".into(),
                text: "autodev".into(),
            },
            AutomationStep::Scroll {
                direction: ScrollDirection::Down,
                amount: 300,
            },
            AutomationStep::Screenshot {
                name: "baseline".into(),
            },
            AutomationStep::Evaluate {
                script: "1 + 1".into(),
            },
            AutomationStep::Wait { millis: 15 },
        ];
        let labels: Vec<&str> = steps.iter().map(AutomationStep::kind_label).collect();
        assert_eq!(
            labels,
            vec!["navigate", "click", "type", "scroll", "screenshot", "evaluate", "wait"]
        );
    }
}
