#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Autodev execution stack: environment selection, backend contracts, and
//! cross-environment workflow coordination.

/// Per-action environment assignment with confidence and fallbacks.
#[path = "../environment.rs"]
pub mod environment;

/// Backend contracts and the loopback implementations.
#[path = "../backends/main.rs"]
pub mod backends;

/// Plan execution across the assigned environments.
#[path = "../coordinator.rs"]
pub mod coordinator;

/// Checkpoint comparison and change classification.
#[path = "../visual.rs"]
pub mod visual;

/// Structured logging and bus events for the execution stack.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Runtime entrypoints wiring the execution stack together.
#[path = "../main.rs"]
pub mod orchestration_entry;

pub use backends::loopback::{
    LoopbackAutomationBackend, LoopbackCommandBackend, LoopbackWorkflowTool,
};
pub use backends::{
    AutomationBackend, AutomationStep, CommandBackend, CommandOutcome, ExecutionError,
    ScrollDirection, StepArtifact, Toolbox, WorkflowTool,
};
pub use coordinator::{
    ExecutionPolicy, ExecutionReport, StepRecord, WorkflowCoordinator,
    WorkflowCoordinatorBuilder, WorkflowExecution, DEFAULT_CHECKPOINT_CONFIDENCE,
};
pub use environment::{
    EnvironmentDecision, EnvironmentSelector, ExecutionEnvironment, SelectionHints,
};
pub use orchestration_entry::ExecutionRuntime;
pub use telemetry::{ExecutionTelemetry, ExecutionTelemetryBuilder};
pub use visual::{ChangeSignificance, HeuristicVisualAnalyzer, VisualAnalysis, VisualAnalyzer};
