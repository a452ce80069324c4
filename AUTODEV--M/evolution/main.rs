use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use autodev_context::FeedbackData;
use shared_event_bus::{EventPublisher, EventSubscriber, FileEventPublisher, MemoryEventBus};

use crate::cycle::{
    CycleOutcome, CycleRecorder, CycleTrigger, EvolutionCycle, EvolutionEngine,
    LoopbackMetricsProbe, MetricsProbe,
};
use crate::feedback::recorder::FeedbackRecorder;
use crate::feedback::{
    EngineState, FeedbackIngestor, FeedbackLog, FeedbackResponse, StateCell, TriggerPolicy,
};
use crate::learning::{LearningLedger, LearningModel};
use crate::scheduler::{
    spawn_cycle_request_listener, spawn_evolution_timer, spawn_feedback_poll, spawn_metrics_poll,
    FeedbackFeed, ScheduleConfig, SchedulerHandle,
};
use crate::telemetry::EvolutionTelemetry;
use crate::watch::SourceWatcher;

/// Buffered cycle-request events before slow listeners start lagging.
const DEFAULT_BUS_CAPACITY: usize = 64;

/// Configures an [`EvolutionRuntime`].
pub struct EvolutionRuntimeBuilder {
    root: PathBuf,
    policy: TriggerPolicy,
    schedule: ScheduleConfig,
    bus_capacity: usize,
    probe: Option<Arc<dyn MetricsProbe>>,
    feed: Option<Arc<dyn FeedbackFeed>>,
    recorder_path: Option<PathBuf>,
    cycle_path: Option<PathBuf>,
    telemetry: Option<EvolutionTelemetry>,
}

impl EvolutionRuntimeBuilder {
    /// Starts a builder for the project at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            policy: TriggerPolicy::new(),
            schedule: ScheduleConfig::new(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            probe: None,
            feed: None,
            recorder_path: None,
            cycle_path: None,
            telemetry: None,
        }
    }

    /// Overrides the trigger policy.
    #[must_use]
    pub const fn policy(mut self, policy: TriggerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Overrides the background timer periods.
    #[must_use]
    pub const fn schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    /// Overrides the cycle-request bus capacity.
    #[must_use]
    pub const fn bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    /// Overrides the metrics probe shared by cycles and the metrics poll.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn MetricsProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Attaches an external feedback feed for the background poll.
    #[must_use]
    pub fn feed(mut self, feed: Arc<dyn FeedbackFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Persists every ingested item to a JSONL file at `path`.
    #[must_use]
    pub fn record_feedback_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.recorder_path = Some(path.into());
        self
    }

    /// Persists every sealed cycle to a JSONL file at `path`.
    #[must_use]
    pub fn record_cycles_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.cycle_path = Some(path.into());
        self
    }

    /// Attaches a telemetry handle shared by the ingestor and the engine.
    #[must_use]
    pub fn telemetry(mut self, telemetry: EvolutionTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds the runtime; fails only when a recorder cannot open its file.
    pub fn build(mut self) -> Result<EvolutionRuntime> {
        let feedback = self
            .recorder_path
            .take()
            .map(FeedbackRecorder::new)
            .transpose()?;
        let cycles = self.cycle_path.take().map(CycleRecorder::new).transpose()?;
        Ok(self.assemble(feedback, cycles))
    }

    fn assemble(
        self,
        recorder: Option<FeedbackRecorder>,
        cycles: Option<CycleRecorder>,
    ) -> EvolutionRuntime {
        let bus = Arc::new(MemoryEventBus::new(self.bus_capacity));
        let log = Arc::new(recorder.map_or_else(FeedbackLog::new, |recorder| {
            FeedbackLog::new().with_recorder(recorder)
        }));
        let ledger = Arc::new(LearningLedger::new());
        let state = StateCell::new();
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(LoopbackMetricsProbe::new()));

        let mut ingestor =
            FeedbackIngestor::new(Arc::clone(&log), Arc::clone(&ledger), state.clone())
                .with_policy(self.policy)
                .with_cycle_requests(Arc::clone(&bus) as Arc<dyn EventPublisher>);
        if let Some(telemetry) = self.telemetry.clone() {
            ingestor = ingestor.with_telemetry(telemetry);
        }

        let mut engine = EvolutionEngine::builder()
            .root(self.root)
            .probe(Arc::clone(&probe))
            .feedback_log(Arc::clone(&log))
            .ledger(Arc::clone(&ledger))
            .state(state.clone());
        if let Some(cycles) = cycles {
            engine = engine.recorder(cycles);
        }
        if let Some(telemetry) = self.telemetry {
            engine = engine.telemetry(telemetry);
        }

        EvolutionRuntime {
            engine: Arc::new(engine.build()),
            ingestor: Arc::new(ingestor),
            log,
            ledger,
            state,
            probe,
            feed: self.feed,
            schedule: self.schedule,
            bus,
        }
    }
}

impl fmt::Debug for EvolutionRuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvolutionRuntimeBuilder")
            .field("root", &self.root)
            .field("bus_capacity", &self.bus_capacity)
            .field("recorder_path", &self.recorder_path)
            .finish()
    }
}

/// Front door for the evolution stack: one ingestor and one engine sharing a
/// feedback log, a learning ledger, a state cell, and a cycle-request bus.
pub struct EvolutionRuntime {
    engine: Arc<EvolutionEngine>,
    ingestor: Arc<FeedbackIngestor>,
    log: Arc<FeedbackLog>,
    ledger: Arc<LearningLedger>,
    state: StateCell,
    probe: Arc<dyn MetricsProbe>,
    feed: Option<Arc<dyn FeedbackFeed>>,
    schedule: ScheduleConfig,
    bus: Arc<MemoryEventBus>,
}

impl EvolutionRuntime {
    /// Starts a builder for the project at `root`.
    #[must_use]
    pub fn builder(root: impl Into<PathBuf>) -> EvolutionRuntimeBuilder {
        EvolutionRuntimeBuilder::new(root)
    }

    /// Default wiring: loopback probe, file telemetry under `logs/evolution/`,
    /// and feedback plus cycle archives next to it.
    #[must_use]
    pub fn bootstrap(root: impl Into<PathBuf>) -> Self {
        let events = FileEventPublisher::new("logs/evolution/events.jsonl");
        let telemetry = EvolutionTelemetry::builder("evolution")
            .log_path("logs/evolution/runtime.log.jsonl")
            .event_publisher(Arc::new(events))
            .build()
            .ok();
        let recorder = FeedbackRecorder::new("logs/evolution/feedback.jsonl").ok();
        let cycles = CycleRecorder::new("logs/evolution/cycles.jsonl").ok();
        let mut builder = Self::builder(root);
        if let Some(telemetry) = telemetry {
            builder = builder.telemetry(telemetry);
        }
        builder.assemble(recorder, cycles)
    }

    /// Feeds one item through the ingestor.
    pub async fn ingest(&self, item: FeedbackData) -> Result<FeedbackResponse> {
        self.ingestor.ingest(item).await
    }

    /// Runs a manually triggered cycle right now.
    pub async fn run_cycle_now(&self, reason: impl Into<String>) -> Result<CycleOutcome> {
        self.engine
            .run_cycle(CycleTrigger::Manual(reason.into()))
            .await
    }

    /// Spawns the request listener, the evolution timer, the metrics poll,
    /// and, when a feed is attached, the feedback poll.
    #[must_use]
    pub fn spawn_background(&self) -> SchedulerHandle {
        let mut tasks = vec![
            spawn_cycle_request_listener(Arc::clone(&self.engine), self.bus.subscribe()),
            spawn_evolution_timer(Arc::clone(&self.engine), self.schedule.evolution_interval),
            spawn_metrics_poll(
                Arc::clone(&self.ingestor),
                Arc::clone(&self.probe),
                self.schedule.metrics_interval,
                self.ingestor.policy().metric_floor,
            ),
        ];
        if let Some(feed) = &self.feed {
            tasks.push(spawn_feedback_poll(
                Arc::clone(&self.ingestor),
                Arc::clone(feed),
                self.schedule.feedback_interval,
            ));
        }
        SchedulerHandle::new(tasks)
    }

    /// Starts a source watcher over `root` feeding this runtime's ingestor.
    pub fn watch_sources(&self, root: impl Into<PathBuf>) -> Result<SourceWatcher> {
        SourceWatcher::spawn(root, Arc::clone(&self.ingestor))
    }

    /// Engine running the cycles.
    #[must_use]
    pub fn engine(&self) -> &EvolutionEngine {
        &self.engine
    }

    /// Shared feedback log.
    #[must_use]
    pub fn feedback(&self) -> &FeedbackLog {
        &self.log
    }

    /// Copies the learning models, insertion order preserved.
    #[must_use]
    pub fn learning_models(&self) -> Vec<LearningModel> {
        self.ledger.models()
    }

    /// Copies the cycle history, oldest first.
    #[must_use]
    pub fn cycles(&self) -> Vec<EvolutionCycle> {
        self.engine.history()
    }

    /// Lifecycle phase as seen by operators.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state.current()
    }

    /// Bus carrying cycle-request events.
    #[must_use]
    pub fn bus(&self) -> &MemoryEventBus {
        &self.bus
    }
}

impl fmt::Debug for EvolutionRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvolutionRuntime")
            .field("state", &self.state.current())
            .field("feedback", &self.log.len())
            .field("cycles", &self.engine.history().len())
            .finish()
    }
}
