use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use autodev_context::{ContextRuntime, FeedbackData, RecentSignals, SnapshotBuilder};
use autodev_execution::{ExecutionRuntime, SelectionHints, StepRecord, WorkflowCoordinator};
use autodev_planning::{IntelligenceGatherer, MarketIntelligence, PlanningRuntime};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use tracing::instrument;
use uuid::Uuid;

use crate::feedback::{response_label, EngineState, FeedbackLog, StateCell};
use crate::learning::LearningLedger;
use crate::telemetry::EvolutionTelemetry;

/// Metrics that must strictly improve for a cycle to count as successful.
pub const MIN_IMPROVED_METRICS: usize = 3;

/// Trailing window of feedback handed to cycle snapshots, in hours.
const SIGNAL_WINDOW_HOURS: i64 = 24;

/// Request text synthesized for timer-driven cycles.
const SCHEDULED_REQUEST: &str = "improve performance across the project";

/// Named metric values captured at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When the probe sampled.
    pub taken_at: DateTime<Utc>,
    /// Metric values by name, probe order preserved.
    pub values: IndexMap<String, f64>,
}

impl MetricsSnapshot {
    /// Snapshot of `values` stamped with the current UTC time.
    #[must_use]
    pub fn new(values: IndexMap<String, f64>) -> Self {
        Self {
            taken_at: Utc::now(),
            values,
        }
    }

    /// Number of metrics strictly above their value in `baseline`.
    ///
    /// Metrics missing from either side are not compared.
    #[must_use]
    pub fn improved_over(&self, baseline: &Self) -> usize {
        self.values
            .iter()
            .filter(|(name, after)| {
                baseline
                    .values
                    .get(name.as_str())
                    .is_some_and(|before| **after > *before)
            })
            .count()
    }
}

/// Samples project health metrics for cycle bookkeeping.
#[async_trait]
pub trait MetricsProbe: Send + Sync {
    /// Takes one snapshot; errors abort the surrounding cycle.
    async fn sample(&self) -> Result<MetricsSnapshot>;
}

/// Deterministic probe used until a real metrics pipeline is wired.
///
/// Values wobble with an internal tick so consecutive snapshots differ
/// without any external state.
#[derive(Debug, Default)]
pub struct LoopbackMetricsProbe {
    ticks: AtomicU64,
}

impl LoopbackMetricsProbe {
    /// Probe starting at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsProbe for LoopbackMetricsProbe {
    async fn sample(&self) -> Result<MetricsSnapshot> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        let wobble = |base: u64, spread: u64| (base + (tick * 3 + base) % spread) as f64;
        let mut values = IndexMap::new();
        values.insert("performance".to_owned(), wobble(70, 9));
        values.insert("reliability".to_owned(), wobble(80, 7));
        values.insert("speed".to_owned(), wobble(60, 11));
        values.insert("quality".to_owned(), wobble(75, 5));
        Ok(MetricsSnapshot::new(values))
    }
}

/// Scripted probe popping pre-loaded snapshots; drained queues error.
#[derive(Debug, Default)]
pub struct QueuedMetricsProbe {
    queue: Mutex<VecDeque<MetricsSnapshot>>,
}

impl QueuedMetricsProbe {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a snapshot to the script.
    pub fn push(&self, snapshot: MetricsSnapshot) {
        self.queue.lock().push_back(snapshot);
    }

    /// Appends a snapshot built from name/value pairs.
    pub fn push_values(&self, values: &[(&str, f64)]) {
        let map = values
            .iter()
            .map(|(name, value)| ((*name).to_owned(), *value))
            .collect();
        self.push(MetricsSnapshot::new(map));
    }

    /// Snapshots still queued.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }
}

#[async_trait]
impl MetricsProbe for QueuedMetricsProbe {
    async fn sample(&self) -> Result<MetricsSnapshot> {
        let popped = self.queue.lock().pop_front();
        match popped {
            Some(snapshot) => Ok(snapshot),
            None => bail!("metrics queue is drained"),
        }
    }
}

/// What started an evolution cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleTrigger {
    /// The periodic evolution timer fired.
    Scheduled,
    /// A feedback item tripped the trigger policy.
    Feedback(FeedbackData),
    /// An operator asked for a cycle by hand.
    Manual(String),
}

impl CycleTrigger {
    /// Stable reason text recorded on the cycle.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Scheduled => "scheduled".to_owned(),
            Self::Feedback(item) => format!("feedback {} ({})", item.id, item.kind.as_label()),
            Self::Manual(reason) => format!("manual: {reason}"),
        }
    }

    fn request_text(&self) -> String {
        match self {
            Self::Scheduled => SCHEDULED_REQUEST.to_owned(),
            Self::Feedback(item) => item.content.clone(),
            Self::Manual(reason) => reason.clone(),
        }
    }
}

/// Result of asking the engine to run a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The cycle ran to completion and was appended to history.
    Completed(EvolutionCycle),
    /// Another cycle was already active; the request was dropped.
    Skipped,
}

impl CycleOutcome {
    /// True when the request was dropped.
    #[must_use]
    pub const fn was_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Sealed record of one evolution pass; history entries never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionCycle {
    /// Cycle identifier, unique per run.
    pub id: String,
    /// When the cycle began.
    pub started_at: DateTime<Utc>,
    /// When the cycle finished.
    pub completed_at: DateTime<Utc>,
    /// Why the cycle ran.
    pub trigger: String,
    /// One line per executed step, failures included.
    pub action_log: Vec<String>,
    /// Metrics sampled before the plan ran.
    pub before: MetricsSnapshot,
    /// Metrics sampled after the plan ran.
    pub after: MetricsSnapshot,
    /// Metrics that strictly improved across the cycle.
    pub improved_metrics: usize,
    /// True when at least [`MIN_IMPROVED_METRICS`] metrics improved.
    pub success: bool,
    /// Textual learnings recorded whether or not the cycle succeeded.
    pub learnings: Vec<String>,
}

/// Append-only JSONL persistence for sealed cycles.
#[derive(Debug)]
pub struct CycleRecorder {
    path: PathBuf,
    writer: Mutex<File>,
}

impl CycleRecorder {
    /// Opens (creating parents as needed) an append-mode cycle file.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating cycle directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening cycle file {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Serializes one cycle as a JSON line and flushes it.
    pub fn record(&self, cycle: &EvolutionCycle) -> Result<()> {
        let mut file = self.writer.lock();
        serde_json::to_writer(&mut *file, cycle).context("encoding cycle record")?;
        file.write_all(b"\n").context("terminating cycle record")?;
        file.flush().context("flushing cycle record")?;
        Ok(())
    }

    /// Path of the backing JSONL file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads a recorded cycle history back, oldest first.
#[derive(Debug, Clone)]
pub struct CycleArchive {
    path: PathBuf,
}

impl CycleArchive {
    /// Targets `path`; nothing is read until [`CycleArchive::load`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads every recorded cycle; blank lines are skipped, malformed lines
    /// fail with their line number.
    pub fn load(&self) -> Result<Vec<EvolutionCycle>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading cycle archive {}", self.path.display()))?;
        let mut cycles = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let cycle = serde_json::from_str(line).with_context(|| {
                format!(
                    "decoding cycle line {} in {}",
                    index + 1,
                    self.path.display()
                )
            })?;
            cycles.push(cycle);
        }
        Ok(cycles)
    }

    /// Path of the backing JSONL file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Configures an [`EvolutionEngine`].
pub struct EvolutionEngineBuilder {
    root: PathBuf,
    context: Option<ContextRuntime>,
    planning: Option<PlanningRuntime>,
    execution: Option<ExecutionRuntime>,
    probe: Option<Arc<dyn MetricsProbe>>,
    feedback_log: Option<Arc<FeedbackLog>>,
    ledger: Option<Arc<LearningLedger>>,
    state: Option<StateCell>,
    recorder: Option<CycleRecorder>,
    telemetry: Option<EvolutionTelemetry>,
}

impl EvolutionEngineBuilder {
    /// Starts a builder rooted at the current directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("."),
            context: None,
            planning: None,
            execution: None,
            probe: None,
            feedback_log: None,
            ledger: None,
            state: None,
            recorder: None,
            telemetry: None,
        }
    }

    /// Project root probed for context snapshots.
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Overrides the context runtime.
    #[must_use]
    pub fn context(mut self, runtime: ContextRuntime) -> Self {
        self.context = Some(runtime);
        self
    }

    /// Overrides the planning runtime.
    #[must_use]
    pub fn planning(mut self, runtime: PlanningRuntime) -> Self {
        self.planning = Some(runtime);
        self
    }

    /// Overrides the execution runtime.
    #[must_use]
    pub fn execution(mut self, runtime: ExecutionRuntime) -> Self {
        self.execution = Some(runtime);
        self
    }

    /// Overrides the metrics probe.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn MetricsProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Shares a feedback log with the ingestor.
    #[must_use]
    pub fn feedback_log(mut self, log: Arc<FeedbackLog>) -> Self {
        self.feedback_log = Some(log);
        self
    }

    /// Shares a learning ledger with the ingestor.
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<LearningLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Shares the lifecycle state cell.
    #[must_use]
    pub fn state(mut self, state: StateCell) -> Self {
        self.state = Some(state);
        self
    }

    /// Mirrors every sealed cycle into `recorder`.
    #[must_use]
    pub fn recorder(mut self, recorder: CycleRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn telemetry(mut self, telemetry: EvolutionTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds the engine, filling loopback defaults for anything unset.
    #[must_use]
    pub fn build(self) -> EvolutionEngine {
        let context = match self.context {
            Some(runtime) => runtime,
            None => ContextRuntime::new(SnapshotBuilder::new(self.root)),
        };
        EvolutionEngine {
            context,
            planning: self
                .planning
                .unwrap_or_else(|| PlanningRuntime::new(IntelligenceGatherer::builder().build())),
            execution: self
                .execution
                .unwrap_or_else(|| ExecutionRuntime::new(WorkflowCoordinator::builder().build())),
            probe: self
                .probe
                .unwrap_or_else(|| Arc::new(LoopbackMetricsProbe::new())),
            feedback_log: self.feedback_log.unwrap_or_default(),
            ledger: self.ledger.unwrap_or_default(),
            state: self.state.unwrap_or_default(),
            history: Mutex::new(Vec::new()),
            cycle_active: AtomicBool::new(false),
            recorder: self.recorder,
            telemetry: self.telemetry,
        }
    }
}

impl Default for EvolutionEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EvolutionEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvolutionEngineBuilder")
            .field("root", &self.root)
            .field("probe", &self.probe.is_some())
            .field("shared_log", &self.feedback_log.is_some())
            .finish()
    }
}

/// Runs evolution cycles: snapshot, plan, execute, evaluate, learn.
///
/// At most one cycle runs at a time; concurrent requests are dropped rather
/// than queued.
pub struct EvolutionEngine {
    context: ContextRuntime,
    planning: PlanningRuntime,
    execution: ExecutionRuntime,
    probe: Arc<dyn MetricsProbe>,
    feedback_log: Arc<FeedbackLog>,
    ledger: Arc<LearningLedger>,
    state: StateCell,
    history: Mutex<Vec<EvolutionCycle>>,
    cycle_active: AtomicBool,
    recorder: Option<CycleRecorder>,
    telemetry: Option<EvolutionTelemetry>,
}

impl EvolutionEngine {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> EvolutionEngineBuilder {
        EvolutionEngineBuilder::new()
    }

    /// Runs one cycle unless another is already active.
    ///
    /// Probe failures abort the cycle; everything downstream of planning is
    /// recorded on the cycle rather than raised.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, trigger: CycleTrigger) -> Result<CycleOutcome> {
        if self
            .cycle_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.log_record(
                LogLevel::Warn,
                "cycle skipped",
                &json!({"reason": trigger.reason()}),
            );
            return Ok(CycleOutcome::Skipped);
        }
        let _guard = CycleGuard { engine: self };
        self.state.set(EngineState::Evolving);

        let id = format!("cycle-{}", Uuid::new_v4());
        let started_at = Utc::now();
        self.log_record(
            LogLevel::Info,
            "cycle started",
            &json!({"id": id, "trigger": trigger.reason()}),
        );

        let before = self
            .probe
            .sample()
            .await
            .context("sampling metrics before the cycle")?;

        let request = trigger.request_text();
        let intent = self.context.classify(&request);
        let snapshot = self.context.capture(self.recent_signals()).await;

        let mut learnings = Vec::new();
        let intelligence = match self.planning.gather(&intent.domain, &intent.keywords).await {
            Ok(intelligence) => intelligence,
            Err(err) => {
                // A dark intelligence feed degrades the plan, not the cycle.
                learnings.push(format!("intelligence unavailable: {err:#}"));
                MarketIntelligence::new()
            }
        };
        let actions = self.planning.plan(&snapshot, &intent, &intelligence);
        let hints = SelectionHints::new(true);
        let report = self.execution.execute(&actions, &request, &hints).await;
        let action_log: Vec<String> = report.execution.steps.iter().map(summarize_step).collect();

        let after = self
            .probe
            .sample()
            .await
            .context("sampling metrics after the cycle")?;
        let improved = after.improved_over(&before);
        let success = improved >= MIN_IMPROVED_METRICS;
        learnings.push(if success {
            format!("{improved} metrics improved; the current plan shape is paying off")
        } else {
            format!("only {improved} metrics improved; revisit what the plan optimizes for")
        });
        if report.execution.successful_steps < report.execution.total_steps {
            learnings.push(format!(
                "{} of {} steps failed; inspect the action log before the next pass",
                report.execution.total_steps - report.execution.successful_steps,
                report.execution.total_steps
            ));
        }

        let cycle = EvolutionCycle {
            id,
            started_at,
            completed_at: Utc::now(),
            trigger: trigger.reason(),
            action_log,
            before,
            after,
            improved_metrics: improved,
            success,
            learnings,
        };
        self.history.lock().push(cycle.clone());
        // History keeps the cycle even when the disk copy fails.
        if let Some(recorder) = &self.recorder {
            if let Err(err) = recorder.record(&cycle) {
                self.log_record(
                    LogLevel::Warn,
                    "cycle persistence failed",
                    &json!({"id": cycle.id, "error": format!("{err:#}")}),
                );
            }
        }

        if let CycleTrigger::Feedback(item) = &trigger {
            let label = response_label(item);
            let outcome = if success {
                format!("cycle {} improved {improved} metrics", cycle.id)
            } else {
                format!("cycle {} improved only {improved} metrics", cycle.id)
            };
            self.ledger
                .record_outcome(item.kind, item.priority, label, outcome);
            if success {
                self.ledger.recommend(
                    item.kind,
                    item.priority,
                    label,
                    format!("repeat the {label} response for this pattern"),
                );
            }
        }

        self.log_record(
            LogLevel::Info,
            "cycle completed",
            &json!({
                "id": cycle.id,
                "success": cycle.success,
                "improved_metrics": cycle.improved_metrics,
                "steps": cycle.action_log.len(),
            }),
        );
        self.event_record(
            "evolution.cycle.completed",
            json!({"id": cycle.id, "success": cycle.success}),
        );
        Ok(CycleOutcome::Completed(cycle))
    }

    /// Copies the cycle history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<EvolutionCycle> {
        self.history.lock().clone()
    }

    /// Completion time of the most recent cycle.
    #[must_use]
    pub fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        self.history.lock().last().map(|cycle| cycle.completed_at)
    }

    /// Lifecycle phase as seen by operators.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state.current()
    }

    /// True while a cycle is running.
    #[must_use]
    pub fn cycle_active(&self) -> bool {
        self.cycle_active.load(Ordering::SeqCst)
    }

    /// Context runtime driving classification and snapshots.
    #[must_use]
    pub const fn context(&self) -> &ContextRuntime {
        &self.context
    }

    // Cycles read their own history; feedback arrives from the shared log.
    fn recent_signals(&self) -> RecentSignals {
        let mut signals = RecentSignals::new();
        signals.feedback = self.feedback_log.recent(Duration::hours(SIGNAL_WINDOW_HOURS));
        signals.last_evolution = self.history.lock().last().map(|cycle| cycle.completed_at);
        signals
    }

    fn log_record(&self, level: LogLevel, message: &str, fields: &Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.log(level, message, fields);
        }
    }

    fn event_record(&self, kind: &str, payload: Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.event(kind, payload);
        }
    }
}

impl fmt::Debug for EvolutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvolutionEngine")
            .field("state", &self.state.current())
            .field("cycles", &self.history.lock().len())
            .field("cycle_active", &self.cycle_active)
            .finish()
    }
}

// Releases the active flag and returns the state to idle, even when the
// cycle aborts early.
struct CycleGuard<'a> {
    engine: &'a EvolutionEngine,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.engine.cycle_active.store(false, Ordering::SeqCst);
        self.engine.state.set(EngineState::Idle);
    }
}

fn summarize_step(step: &StepRecord) -> String {
    if step.success {
        format!("{} succeeded in {}", step.command, step.environment)
    } else {
        let error = step.error.as_deref().unwrap_or("unknown error");
        format!("{} failed in {}: {error}", step.command, step.environment)
    }
}
