#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Autodev context stack: project-state snapshots and request intent classification.

/// Shared project-state vocabulary.
#[path = "../model.rs"]
pub mod model;

/// Keyword-driven intent classification.
#[path = "../intent.rs"]
pub mod intent;

/// Filesystem snapshot builder.
#[path = "../snapshot.rs"]
pub mod snapshot;

/// Structured logging and bus events for the context stack.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Runtime entrypoints wiring the context stack together.
#[path = "../main.rs"]
pub mod orchestration_entry;

pub use intent::{Intent, IntentCategory, IntentClassifier, RequestScope, Urgency};
pub use model::{
    ArtifactLayout, BugReport, BugSeverity, CodeQuality, FeedbackData, FeedbackKind,
    FeedbackPriority, FeedbackSource, MarketTrend, MetricTrend, PerformanceMetric, ProjectContext,
    RecentSignals,
};
pub use orchestration_entry::ContextRuntime;
pub use snapshot::SnapshotBuilder;
pub use telemetry::{ContextTelemetry, ContextTelemetryBuilder};
