use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use autodev_context::{FeedbackData, FeedbackKind, FeedbackPriority, FeedbackSource};
use parking_lot::Mutex;
use shared_event_bus::BusEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::cycle::{CycleTrigger, EvolutionEngine, MetricsProbe};
use crate::feedback::{FeedbackIngestor, CYCLE_REQUEST_KIND};

/// Gap between unconditional evolution cycles.
pub const DEFAULT_EVOLUTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Gap between metric health samples.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Gap between external feedback polls.
pub const DEFAULT_FEEDBACK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Periods for the runtime's background timers; none fire at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Gap between unconditional evolution cycles.
    pub evolution_interval: Duration,
    /// Gap between metric health samples.
    pub metrics_interval: Duration,
    /// Gap between external feedback polls.
    pub feedback_interval: Duration,
}

impl ScheduleConfig {
    /// Production defaults: daily evolution, metrics every five minutes,
    /// feedback hourly.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            evolution_interval: DEFAULT_EVOLUTION_INTERVAL,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
            feedback_interval: DEFAULT_FEEDBACK_INTERVAL,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// External source of feedback items drained on a timer.
#[async_trait]
pub trait FeedbackFeed: Send + Sync {
    /// Returns whatever accumulated since the last poll; empty is normal.
    async fn poll(&self) -> Result<Vec<FeedbackData>>;
}

/// Scripted feed popping pre-loaded batches; drained feeds go quiet.
#[derive(Debug, Default)]
pub struct QueuedFeedbackFeed {
    batches: Mutex<VecDeque<Vec<FeedbackData>>>,
}

impl QueuedFeedbackFeed {
    /// Empty feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a batch to the script.
    pub fn push(&self, batch: Vec<FeedbackData>) {
        self.batches.lock().push_back(batch);
    }
}

#[async_trait]
impl FeedbackFeed for QueuedFeedbackFeed {
    async fn poll(&self) -> Result<Vec<FeedbackData>> {
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }
}

// First tick lands one full period after spawn; slow handlers skip missed
// ticks instead of bursting.
fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Runs a scheduled evolution cycle every `period`.
pub fn spawn_evolution_timer(engine: Arc<EvolutionEngine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            if let Err(err) = engine.run_cycle(CycleTrigger::Scheduled).await {
                eprintln!("scheduled evolution cycle failed: {err:#}");
            }
        }
    })
}

/// Samples `probe` every `period` and files feedback for metrics under
/// `floor`.
pub fn spawn_metrics_poll(
    ingestor: Arc<FeedbackIngestor>,
    probe: Arc<dyn MetricsProbe>,
    period: Duration,
    floor: f64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            let snapshot = match probe.sample().await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    eprintln!("metrics poll failed: {err:#}");
                    continue;
                }
            };
            for (name, value) in &snapshot.values {
                if *value >= floor {
                    continue;
                }
                let item = FeedbackData::new(
                    FeedbackSource::Performance,
                    FeedbackKind::PerformanceIssue,
                    FeedbackPriority::Medium,
                    format!("{name} at {value:.1} is under the {floor:.0} floor"),
                )
                .with_metric(name.clone(), *value);
                if let Err(err) = ingestor.ingest(item).await {
                    eprintln!("metrics feedback failed: {err:#}");
                }
            }
        }
    })
}

/// Drains `feed` every `period`, ingesting whatever it returns.
pub fn spawn_feedback_poll(
    ingestor: Arc<FeedbackIngestor>,
    feed: Arc<dyn FeedbackFeed>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            let items = match feed.poll().await {
                Ok(items) => items,
                Err(err) => {
                    eprintln!("feedback poll failed: {err:#}");
                    continue;
                }
            };
            for item in items {
                if let Err(err) = ingestor.ingest(item).await {
                    eprintln!("polled feedback failed: {err:#}");
                }
            }
        }
    })
}

/// Runs a cycle for every request event seen on `receiver`.
///
/// Lagged receivers drop missed requests and keep listening; the task ends
/// when every bus sender is gone.
pub fn spawn_cycle_request_listener(
    engine: Arc<EvolutionEngine>,
    mut receiver: broadcast::Receiver<BusEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("cycle request listener lagged, dropped {missed} events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            if event.kind != CYCLE_REQUEST_KIND {
                continue;
            }
            let trigger = serde_json::from_value::<FeedbackData>(event.payload["feedback"].clone())
                .map_or_else(
                    |_| CycleTrigger::Manual(format!("cycle request {}", event.id)),
                    CycleTrigger::Feedback,
                );
            if let Err(err) = engine.run_cycle(trigger).await {
                eprintln!("requested evolution cycle failed: {err:#}");
            }
        }
    })
}

/// Owns the background tasks; dropping it aborts them all.
#[derive(Debug)]
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Wraps already-spawned tasks.
    #[must_use]
    pub fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self { tasks }
    }

    /// Tasks still running.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Aborts every background task.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::QueuedMetricsProbe;
    use crate::feedback::{FeedbackLog, StateCell};
    use crate::learning::LearningLedger;
    use shared_event_bus::{EventPublisher, EventSubscriber, MemoryEventBus};

    fn bare_ingestor() -> (Arc<FeedbackLog>, Arc<FeedbackIngestor>) {
        let log = Arc::new(FeedbackLog::new());
        let ingestor = Arc::new(FeedbackIngestor::new(
            Arc::clone(&log),
            Arc::new(LearningLedger::new()),
            StateCell::new(),
        ));
        (log, ingestor)
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        let mut waited = Duration::ZERO;
        while !done() && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }
    }

    #[tokio::test]
    async fn metrics_poll_files_performance_feedback() {
        let (log, ingestor) = bare_ingestor();
        let probe = Arc::new(QueuedMetricsProbe::new());
        probe.push_values(&[("latency", 62.0), ("uptime", 99.0)]);

        let task = spawn_metrics_poll(
            ingestor,
            probe as Arc<dyn MetricsProbe>,
            Duration::from_millis(50),
            70.0,
        );
        wait_until(|| !log.is_empty()).await;
        task.abort();

        let items = log.all();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, FeedbackSource::Performance);
        assert_eq!(items[0].kind, FeedbackKind::PerformanceIssue);
        assert!(items[0].content.contains("latency at 62.0"));
        assert_eq!(items[0].metric("latency"), Some(62.0));
    }

    #[tokio::test]
    async fn evolution_timer_fires_after_one_period() {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(QueuedMetricsProbe::new());
        probe.push_values(&[("performance", 1.0)]);
        probe.push_values(&[("performance", 2.0)]);
        let engine = Arc::new(
            EvolutionEngine::builder()
                .root(dir.path())
                .probe(probe as Arc<dyn MetricsProbe>)
                .build(),
        );

        let task = spawn_evolution_timer(Arc::clone(&engine), Duration::from_millis(50));
        wait_until(|| !engine.history().is_empty()).await;

        // The probe is drained, so later ticks fail without recording.
        tokio::time::sleep(Duration::from_millis(150)).await;
        task.abort();

        let cycles = engine.history();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].trigger, "scheduled");
    }

    #[tokio::test]
    async fn feedback_poll_drains_the_feed() {
        let (log, ingestor) = bare_ingestor();
        let feed = Arc::new(QueuedFeedbackFeed::new());
        feed.push(vec![
            FeedbackData::new(
                FeedbackSource::Market,
                FeedbackKind::FeatureRequest,
                FeedbackPriority::Medium,
                "users want export to csv",
            ),
            FeedbackData::new(
                FeedbackSource::User,
                FeedbackKind::Success,
                FeedbackPriority::Low,
                "the new onboarding flow works",
            ),
        ]);

        let task = spawn_feedback_poll(
            ingestor,
            feed as Arc<dyn FeedbackFeed>,
            Duration::from_millis(50),
        );
        wait_until(|| log.len() >= 2).await;
        task.abort();

        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn cycle_request_listener_runs_feedback_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(8));
        let receiver = bus.subscribe();

        let log = Arc::new(FeedbackLog::new());
        let ledger = Arc::new(LearningLedger::new());
        let state = StateCell::new();
        let ingestor = Arc::new(
            FeedbackIngestor::new(Arc::clone(&log), Arc::clone(&ledger), state.clone())
                .with_cycle_requests(Arc::clone(&bus) as Arc<dyn EventPublisher>),
        );

        let probe = Arc::new(QueuedMetricsProbe::new());
        probe.push_values(&[("performance", 1.0)]);
        probe.push_values(&[("performance", 2.0)]);
        let engine = Arc::new(
            EvolutionEngine::builder()
                .root(dir.path())
                .probe(probe as Arc<dyn MetricsProbe>)
                .feedback_log(Arc::clone(&log))
                .ledger(Arc::clone(&ledger))
                .state(state)
                .build(),
        );
        let task = spawn_cycle_request_listener(Arc::clone(&engine), receiver);

        ingestor
            .ingest(FeedbackData::new(
                FeedbackSource::User,
                FeedbackKind::Bug,
                FeedbackPriority::Critical,
                "payment flow crashes",
            ))
            .await
            .unwrap();

        wait_until(|| !engine.history().is_empty()).await;
        task.abort();

        let cycles = engine.history();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].trigger.contains("feedback"));
        let model = ledger.model("bug|critical|Immediate Fix Required").unwrap();
        assert_eq!(model.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn scheduler_handle_aborts_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(EvolutionEngine::builder().root(dir.path()).build());
        let handle = SchedulerHandle::new(vec![spawn_evolution_timer(
            Arc::clone(&engine),
            Duration::from_secs(3600),
        )]);
        assert_eq!(handle.task_count(), 1);

        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.history().is_empty());
    }
}
