#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Autodev evolution stack: feedback ingestion, trigger evaluation, learning
//! models, and the self-evolution cycle that closes the loop.

/// Feedback history, response rules, triggers, and the ingestor.
#[path = "../feedback/main.rs"]
pub mod feedback;

/// Pattern-keyed learning models.
#[path = "../learning.rs"]
pub mod learning;

/// Evolution cycle engine and metrics probes.
#[path = "../cycle.rs"]
pub mod cycle;

/// Source-tree watcher that synthesizes feedback on code changes.
#[path = "../watch.rs"]
pub mod watch;

/// Background timers and the cycle-request listener.
#[path = "../scheduler.rs"]
pub mod scheduler;

/// Structured logging and bus events for the evolution stack.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Runtime entrypoints wiring the evolution stack together.
#[path = "../main.rs"]
pub mod orchestration_entry;

pub use cycle::{
    CycleArchive, CycleOutcome, CycleRecorder, CycleTrigger, EvolutionCycle, EvolutionEngine,
    EvolutionEngineBuilder, LoopbackMetricsProbe, MetricsProbe, MetricsSnapshot,
    QueuedMetricsProbe, MIN_IMPROVED_METRICS,
};
pub use feedback::recorder::{FeedbackArchive, FeedbackRecorder};
pub use feedback::{
    response_label, EngineState, FeedbackIngestor, FeedbackLog, FeedbackResponse, StateCell,
    TriggerPolicy, CYCLE_REQUEST_KIND, DEFAULT_RESPONSE,
};
pub use learning::{pattern_key, LearningLedger, LearningModel};
pub use orchestration_entry::{EvolutionRuntime, EvolutionRuntimeBuilder};
pub use scheduler::{
    spawn_cycle_request_listener, spawn_evolution_timer, spawn_feedback_poll, spawn_metrics_poll,
    FeedbackFeed, QueuedFeedbackFeed, ScheduleConfig, SchedulerHandle,
};
pub use telemetry::{EvolutionTelemetry, EvolutionTelemetryBuilder};
pub use watch::SourceWatcher;
