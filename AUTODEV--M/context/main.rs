use std::path::PathBuf;

use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::intent::{Intent, IntentClassifier};
use crate::model::{ProjectContext, RecentSignals};
use crate::snapshot::SnapshotBuilder;
use crate::telemetry::ContextTelemetry;

/// Front door for the context stack: intent classification plus snapshots.
#[derive(Debug)]
pub struct ContextRuntime {
    classifier: IntentClassifier,
    snapshots: SnapshotBuilder,
    telemetry: Option<ContextTelemetry>,
}

impl ContextRuntime {
    /// Wraps a snapshot builder with no telemetry attached.
    #[must_use]
    pub const fn new(snapshots: SnapshotBuilder) -> Self {
        Self {
            classifier: IntentClassifier::new(),
            snapshots,
            telemetry: None,
        }
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ContextTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Default wiring for `root` with file telemetry under `logs/context/`.
    #[must_use]
    pub fn bootstrap(root: impl Into<PathBuf>) -> Self {
        let telemetry = ContextTelemetry::builder("context")
            .log_path("logs/context/runtime.log.jsonl")
            .build()
            .ok();
        let mut runtime = Self::new(SnapshotBuilder::new(root));
        if let Some(telemetry) = telemetry {
            runtime = runtime.with_telemetry(telemetry);
        }
        runtime
    }

    /// Classifies one free-text request.
    #[must_use]
    pub fn classify(&self, request: &str) -> Intent {
        let intent = self.classifier.classify(request);
        self.log(
            LogLevel::Info,
            "intent classified",
            json!({
                "category": intent.category.to_string(),
                "domain": intent.domain,
                "urgency": intent.urgency.to_string(),
                "scope": intent.scope.to_string(),
            }),
        );
        self.event(
            "context.intent.classified",
            json!({
                "category": intent.category.to_string(),
                "keywords": intent.keywords.len(),
            }),
        );
        intent
    }

    /// Captures a fresh project context around `signals`.
    pub async fn capture(&self, signals: RecentSignals) -> ProjectContext {
        let context = self.snapshots.capture(signals).await;
        self.log(
            LogLevel::Info,
            "snapshot captured",
            json!({
                "constitution": context.has_constitution,
                "specification": context.has_specification,
                "plan": context.has_plan,
                "tasks": context.has_tasks,
                "implementation": context.has_implementation,
            }),
        );
        self.event(
            "context.snapshot.captured",
            json!({"feedback": context.feedback.len(), "bugs": context.bugs.len()}),
        );
        context
    }

    /// Snapshot builder in use.
    #[must_use]
    pub const fn snapshots(&self) -> &SnapshotBuilder {
        &self.snapshots
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
