use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use autodev_context::{FeedbackData, FeedbackKind, FeedbackPriority};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_event_bus::{BusEvent, EventPublisher};
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::learning::LearningLedger;
use crate::telemetry::EvolutionTelemetry;

/// JSONL persistence and replay for the feedback stream.
pub mod recorder;

use recorder::FeedbackRecorder;

/// Event kind published when a feedback item warrants an evolution cycle.
pub const CYCLE_REQUEST_KIND: &str = "evolution.cycle.requested";

/// Label chosen when no response rule matches.
pub const DEFAULT_RESPONSE: &str = "Monitor";

/// Floor under which a performance metric triggers evolution.
pub const DEFAULT_METRIC_FLOOR: f64 = 70.0;

/// Trailing window for the elevated-volume trigger clause, in hours.
pub const DEFAULT_TRIGGER_WINDOW_HOURS: i64 = 24;

/// Elevated items inside the window that trigger evolution.
pub const DEFAULT_ELEVATED_THRESHOLD: usize = 3;

/// Lifecycle phase of the evolution engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Waiting for feedback or a timer.
    #[default]
    Idle,
    /// Deciding the immediate response to one feedback item.
    Responding,
    /// Running an evolution cycle.
    Evolving,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Responding => "responding",
            Self::Evolving => "evolving",
        };
        f.write_str(label)
    }
}

/// Shared handle on the engine's lifecycle phase.
///
/// Feedback handling and evolution cycles hold this briefly around their own
/// transitions; neither stomps a phase it did not set.
#[derive(Debug, Clone, Default)]
pub struct StateCell {
    inner: Arc<Mutex<EngineState>>,
}

impl StateCell {
    /// New cell starting idle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub fn current(&self) -> EngineState {
        *self.inner.lock()
    }

    /// Moves `from` to `to`; any other phase is left untouched.
    pub(crate) fn transition(&self, from: EngineState, to: EngineState) -> bool {
        let mut state = self.inner.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    pub(crate) fn set(&self, next: EngineState) {
        *self.inner.lock() = next;
    }
}

// First match wins; a row with no kind or priority matches any.
struct ResponseRule {
    kind: Option<FeedbackKind>,
    priority: Option<FeedbackPriority>,
    label: &'static str,
}

const RESPONSE_RULES: &[ResponseRule] = &[
    ResponseRule {
        kind: Some(FeedbackKind::Bug),
        priority: Some(FeedbackPriority::Critical),
        label: "Immediate Fix Required",
    },
    ResponseRule {
        kind: Some(FeedbackKind::Bug),
        priority: None,
        label: "Bug Triage",
    },
    ResponseRule {
        kind: Some(FeedbackKind::PerformanceIssue),
        priority: None,
        label: "Performance Analysis",
    },
    ResponseRule {
        kind: Some(FeedbackKind::Failure),
        priority: None,
        label: "Failure Review",
    },
    ResponseRule {
        kind: Some(FeedbackKind::FeatureRequest),
        priority: None,
        label: "Backlog Candidate",
    },
    ResponseRule {
        kind: Some(FeedbackKind::Success),
        priority: None,
        label: "Reinforce Success",
    },
];

/// Picks the immediate response label for one feedback item.
#[must_use]
pub fn response_label(item: &FeedbackData) -> &'static str {
    RESPONSE_RULES
        .iter()
        .find(|rule| {
            rule.kind.is_none_or(|kind| kind == item.kind)
                && rule.priority.is_none_or(|priority| priority == item.priority)
        })
        .map_or(DEFAULT_RESPONSE, |rule| rule.label)
}

/// Decides when a feedback item warrants an evolution cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerPolicy {
    /// Performance issues with a metric under this value trigger.
    pub metric_floor: f64,
    /// Trailing window for the elevated-volume clause, in hours.
    pub window_hours: i64,
    /// Elevated items inside the window needed to trigger.
    pub elevated_threshold: usize,
}

impl TriggerPolicy {
    /// Policy with the default floor, window, and threshold.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            metric_floor: DEFAULT_METRIC_FLOOR,
            window_hours: DEFAULT_TRIGGER_WINDOW_HOURS,
            elevated_threshold: DEFAULT_ELEVATED_THRESHOLD,
        }
    }

    /// True when `item`, already appended to `log`, warrants a cycle.
    #[must_use]
    pub fn should_trigger(&self, item: &FeedbackData, log: &FeedbackLog) -> bool {
        if item.priority == FeedbackPriority::Critical {
            return true;
        }
        if item.kind == FeedbackKind::PerformanceIssue && item.any_metric_below(self.metric_floor)
        {
            return true;
        }
        let cutoff = Utc::now() - Duration::hours(self.window_hours);
        log.elevated_since(cutoff) >= self.elevated_threshold
    }
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only feedback history with optional JSONL persistence.
///
/// Appends never reorder; queries copy out so callers hold no lock.
#[derive(Debug, Default)]
pub struct FeedbackLog {
    items: Mutex<Vec<FeedbackData>>,
    recorder: Option<FeedbackRecorder>,
}

impl FeedbackLog {
    /// In-memory log with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirrors every append into `recorder`.
    #[must_use]
    pub fn with_recorder(mut self, recorder: FeedbackRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Appends one item, persisting it first when a recorder is attached.
    pub fn append(&self, item: FeedbackData) -> Result<()> {
        if let Some(recorder) = &self.recorder {
            recorder.record(&item)?;
        }
        self.items.lock().push(item);
        Ok(())
    }

    /// Items stamped inside the trailing `window`, oldest first.
    #[must_use]
    pub fn recent(&self, window: Duration) -> Vec<FeedbackData> {
        let cutoff = Utc::now() - window;
        self.items
            .lock()
            .iter()
            .filter(|item| item.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// High and critical items stamped at or after `cutoff`.
    #[must_use]
    pub fn elevated_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.items
            .lock()
            .iter()
            .filter(|item| item.is_elevated() && item.timestamp >= cutoff)
            .count()
    }

    /// Copies the whole history, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<FeedbackData> {
        self.items.lock().clone()
    }

    /// Items appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// True before the first append.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Immediate response decided for one ingested feedback item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackResponse {
    /// Item the response addresses.
    pub feedback_id: Uuid,
    /// Response label from the first matching rule.
    pub label: String,
    /// Model confidence after folding the pair into the ledger.
    pub confidence: f64,
    /// Whether the trigger policy requested an evolution cycle.
    pub evolution_requested: bool,
}

/// Front door for feedback: appends, responds, learns, and requests cycles.
///
/// Cycle requests travel as bus events rather than direct calls; whoever
/// subscribes decides when the cycle actually runs.
pub struct FeedbackIngestor {
    log: Arc<FeedbackLog>,
    ledger: Arc<LearningLedger>,
    policy: TriggerPolicy,
    state: StateCell,
    requests: Option<Arc<dyn EventPublisher>>,
    telemetry: Option<EvolutionTelemetry>,
}

impl FeedbackIngestor {
    /// Wires an ingestor over a shared log and ledger.
    #[must_use]
    pub fn new(log: Arc<FeedbackLog>, ledger: Arc<LearningLedger>, state: StateCell) -> Self {
        Self {
            log,
            ledger,
            policy: TriggerPolicy::new(),
            state,
            requests: None,
            telemetry: None,
        }
    }

    /// Overrides the trigger policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: TriggerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Publishes cycle requests through `publisher`.
    #[must_use]
    pub fn with_cycle_requests(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.requests = Some(publisher);
        self
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: EvolutionTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Trigger policy in force.
    #[must_use]
    pub const fn policy(&self) -> &TriggerPolicy {
        &self.policy
    }

    /// Appends `item`, decides the immediate response, folds the pair into
    /// the learning ledger, and requests an evolution cycle when the trigger
    /// policy fires.
    pub async fn ingest(&self, item: FeedbackData) -> Result<FeedbackResponse> {
        self.state
            .transition(EngineState::Idle, EngineState::Responding);
        let label = response_label(&item);
        self.log.append(item.clone())?;
        let confidence = self.ledger.observe(&item, label);
        let evolution_requested = self.policy.should_trigger(&item, &self.log);
        self.log_record(
            LogLevel::Info,
            "feedback ingested",
            &json!({
                "id": item.id,
                "kind": item.kind.as_label(),
                "priority": item.priority.to_string(),
                "label": label,
                "evolution_requested": evolution_requested,
            }),
        );
        if evolution_requested {
            self.request_cycle(&item).await;
        }
        self.state
            .transition(EngineState::Responding, EngineState::Idle);
        Ok(FeedbackResponse {
            feedback_id: item.id,
            label: label.to_owned(),
            confidence,
            evolution_requested,
        })
    }

    // Request failures degrade to a warning; the response already stands.
    async fn request_cycle(&self, item: &FeedbackData) {
        let Some(publisher) = &self.requests else {
            return;
        };
        let event = BusEvent {
            id: format!("evt-{}", Uuid::new_v4()),
            source: "feedback-ingestor".to_owned(),
            kind: CYCLE_REQUEST_KIND.to_owned(),
            timestamp: Utc::now().to_rfc3339(),
            payload: json!({ "feedback": item }),
        };
        if let Err(err) = publisher.publish(event).await {
            self.log_record(
                LogLevel::Warn,
                "cycle request failed",
                &json!({"error": format!("{err:#}")}),
            );
        }
    }

    fn log_record(&self, level: LogLevel, message: &str, fields: &Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.log(level, message, fields);
        }
    }
}

impl fmt::Debug for FeedbackIngestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackIngestor")
            .field("policy", &self.policy)
            .field("state", &self.state.current())
            .field("requests", &self.requests.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodev_context::FeedbackSource;
    use shared_event_bus::MemoryEventBus;

    fn item(kind: FeedbackKind, priority: FeedbackPriority, content: &str) -> FeedbackData {
        FeedbackData::new(FeedbackSource::User, kind, priority, content)
    }

    fn bare_ingestor() -> (Arc<FeedbackLog>, Arc<LearningLedger>, FeedbackIngestor) {
        let log = Arc::new(FeedbackLog::new());
        let ledger = Arc::new(LearningLedger::new());
        let ingestor =
            FeedbackIngestor::new(Arc::clone(&log), Arc::clone(&ledger), StateCell::new());
        (log, ledger, ingestor)
    }

    #[test]
    fn response_table_matches_the_known_shapes() {
        let critical_bug = item(FeedbackKind::Bug, FeedbackPriority::Critical, "crash");
        assert_eq!(response_label(&critical_bug), "Immediate Fix Required");

        let perf = item(FeedbackKind::PerformanceIssue, FeedbackPriority::Low, "slow");
        assert_eq!(response_label(&perf), "Performance Analysis");

        let success = item(FeedbackKind::Success, FeedbackPriority::Medium, "it shipped");
        assert_eq!(response_label(&success), "Reinforce Success");

        let routine = item(FeedbackKind::Improvement, FeedbackPriority::Low, "polish");
        assert_eq!(response_label(&routine), DEFAULT_RESPONSE);
    }

    #[test]
    fn response_rules_are_first_match() {
        let high_bug = item(FeedbackKind::Bug, FeedbackPriority::High, "flaky login");
        assert_eq!(response_label(&high_bug), "Bug Triage");
    }

    #[test]
    fn critical_feedback_triggers_instantly() {
        let log = FeedbackLog::new();
        let policy = TriggerPolicy::new();
        let critical = item(FeedbackKind::Improvement, FeedbackPriority::Critical, "now");
        log.append(critical.clone()).unwrap();

        assert!(policy.should_trigger(&critical, &log));
    }

    #[test]
    fn degraded_metrics_trigger_on_performance_issues() {
        let log = FeedbackLog::new();
        let policy = TriggerPolicy::new();
        let slow = item(FeedbackKind::PerformanceIssue, FeedbackPriority::Medium, "p95")
            .with_metric("response_time", 64.2);
        log.append(slow.clone()).unwrap();
        assert!(policy.should_trigger(&slow, &log));

        let fine = item(FeedbackKind::PerformanceIssue, FeedbackPriority::Medium, "p95")
            .with_metric("response_time", 82.0);
        log.append(fine.clone()).unwrap();
        assert!(!policy.should_trigger(&fine, &log));
    }

    #[test]
    fn three_elevated_items_inside_the_window_trigger() {
        let log = FeedbackLog::new();
        let policy = TriggerPolicy::new();
        for round in 0..3 {
            let report = item(
                FeedbackKind::Improvement,
                FeedbackPriority::High,
                "regressions piling up",
            );
            log.append(report.clone()).unwrap();
            assert_eq!(policy.should_trigger(&report, &log), round == 2);
        }
    }

    #[test]
    fn stale_elevated_items_fall_out_of_the_window() {
        let log = FeedbackLog::new();
        let policy = TriggerPolicy::new();
        for _ in 0..3 {
            let mut old = item(FeedbackKind::Failure, FeedbackPriority::High, "old noise");
            old.timestamp = Utc::now() - Duration::hours(25);
            log.append(old).unwrap();
        }
        let fresh = item(FeedbackKind::Failure, FeedbackPriority::High, "new failure");
        log.append(fresh.clone()).unwrap();

        assert!(!policy.should_trigger(&fresh, &log));
    }

    #[test]
    fn state_cell_moves_only_from_the_expected_phase() {
        let state = StateCell::new();
        assert_eq!(state.current(), EngineState::Idle);
        assert!(state.transition(EngineState::Idle, EngineState::Responding));
        assert!(!state.transition(EngineState::Idle, EngineState::Evolving));
        assert_eq!(state.current(), EngineState::Responding);

        state.set(EngineState::Evolving);
        assert!(!state.transition(EngineState::Responding, EngineState::Idle));
        assert_eq!(state.current(), EngineState::Evolving);
    }

    #[tokio::test]
    async fn ingest_requests_a_cycle_over_the_bus() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let (log, _, ingestor) = bare_ingestor();
        let ingestor = ingestor.with_cycle_requests(Arc::clone(&bus) as Arc<dyn EventPublisher>);

        let response = ingestor
            .ingest(item(
                FeedbackKind::Bug,
                FeedbackPriority::Critical,
                "checkout crashes on submit",
            ))
            .await
            .unwrap();

        assert!(response.evolution_requested);
        assert_eq!(response.label, "Immediate Fix Required");
        assert_eq!(log.len(), 1);
        let backlog = bus.snapshot();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].kind, CYCLE_REQUEST_KIND);
        assert_eq!(backlog[0].payload["feedback"]["priority"], "critical");
    }

    #[tokio::test]
    async fn routine_feedback_stays_quiet() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let log = Arc::new(FeedbackLog::new());
        let state = StateCell::new();
        let ingestor =
            FeedbackIngestor::new(Arc::clone(&log), Arc::new(LearningLedger::new()), state.clone())
                .with_cycle_requests(Arc::clone(&bus) as Arc<dyn EventPublisher>);

        let response = ingestor
            .ingest(item(
                FeedbackKind::Improvement,
                FeedbackPriority::Low,
                "tidy the readme",
            ))
            .await
            .unwrap();

        assert!(!response.evolution_requested);
        assert_eq!(response.label, DEFAULT_RESPONSE);
        assert!((response.confidence - 0.6).abs() < 1e-9);
        assert!(bus.snapshot().is_empty());
        assert_eq!(state.current(), EngineState::Idle);
    }

    #[tokio::test]
    async fn repeated_pairs_compound_confidence() {
        let (_, _, ingestor) = bare_ingestor();
        let mut confidence = 0.0;
        for _ in 0..3 {
            let response = ingestor
                .ingest(item(
                    FeedbackKind::Success,
                    FeedbackPriority::Medium,
                    "deploy went clean",
                ))
                .await
                .unwrap();
            confidence = response.confidence;
        }

        assert!((confidence - 0.8).abs() < 1e-9);
    }
}
