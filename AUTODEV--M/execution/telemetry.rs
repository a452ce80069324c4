use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use shared_event_bus::{BusEvent, EventPublisher};
use shared_logging::{JsonLogger, LogLevel};
use tokio::runtime::{Handle, Runtime};
use uuid::Uuid;

/// Configures an [`ExecutionTelemetry`] handle.
#[derive(Default)]
pub struct ExecutionTelemetryBuilder {
    source: String,
    log_path: Option<PathBuf>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl ExecutionTelemetryBuilder {
    /// Starts a builder for the given source name.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            log_path: None,
            publisher: None,
        }
    }

    /// Enables JSONL logging at `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Enables bus events through `publisher`.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Builds the handle, opening the log file if one was requested.
    pub fn build(self) -> Result<ExecutionTelemetry> {
        let logger = self
            .log_path
            .map(JsonLogger::new)
            .transpose()
            .context("opening execution telemetry log")?;
        let events = self.publisher.map(EventHandle::new).transpose()?;
        Ok(ExecutionTelemetry {
            inner: Arc::new(TelemetryInner {
                source: self.source,
                logger,
                events,
            }),
        })
    }
}

impl fmt::Debug for ExecutionTelemetryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionTelemetryBuilder")
            .field("source", &self.source)
            .field("log_path", &self.log_path)
            .field("publisher", &self.publisher.is_some())
            .finish()
    }
}

// Attaches to the ambient runtime when built inside one; owning a runtime
// there would panic on drop.
enum EventExecutor {
    Attached(Handle),
    Owned(Runtime),
}

struct EventHandle {
    executor: EventExecutor,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandle {
    fn new(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        let executor = match Handle::try_current() {
            Ok(handle) => EventExecutor::Attached(handle),
            Err(_) => EventExecutor::Owned(
                Runtime::new().context("starting execution telemetry runtime")?,
            ),
        };
        Ok(Self {
            executor,
            publisher,
        })
    }

    fn publish(&self, event: BusEvent) {
        if let Ok(handle) = Handle::try_current() {
            self.spawn_on(&handle, event);
        } else {
            match &self.executor {
                EventExecutor::Attached(handle) => self.spawn_on(handle, event),
                EventExecutor::Owned(runtime) => {
                    if let Err(err) = runtime.block_on(self.publisher.publish(event)) {
                        eprintln!("execution telemetry event failed: {err:#}");
                    }
                }
            }
        }
    }

    fn spawn_on(&self, handle: &Handle, event: BusEvent) {
        let publisher = Arc::clone(&self.publisher);
        handle.spawn(async move {
            if let Err(err) = publisher.publish(event).await {
                eprintln!("execution telemetry event failed: {err:#}");
            }
        });
    }
}

struct TelemetryInner {
    source: String,
    logger: Option<JsonLogger>,
    events: Option<EventHandle>,
}

/// Cheap-to-clone telemetry handle for the execution stack.
#[derive(Clone)]
pub struct ExecutionTelemetry {
    inner: Arc<TelemetryInner>,
}

impl ExecutionTelemetry {
    /// Starts a builder for the given source name.
    #[must_use]
    pub fn builder(source: impl Into<String>) -> ExecutionTelemetryBuilder {
        ExecutionTelemetryBuilder::new(source)
    }

    /// Source name stamped onto records and events.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Writes one structured log record; failures go to stderr only.
    pub fn log(&self, level: LogLevel, message: &str, fields: &Value) {
        if let Some(logger) = &self.inner.logger {
            if let Err(err) = logger.log_with_fields(&self.inner.source, level, message, fields) {
                eprintln!("execution telemetry log failed: {err:#}");
            }
        }
    }

    /// Publishes one bus event; failures go to stderr only.
    pub fn event(&self, kind: &str, payload: Value) {
        if let Some(events) = &self.inner.events {
            events.publish(BusEvent {
                id: format!("evt-{}", Uuid::new_v4()),
                source: self.inner.source.clone(),
                kind: kind.to_owned(),
                timestamp: Utc::now().to_rfc3339(),
                payload,
            });
        }
    }
}

impl fmt::Debug for ExecutionTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionTelemetry")
            .field("source", &self.inner.source)
            .field("logging", &self.inner.logger.is_some())
            .field("events", &self.inner.events.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;

    #[test]
    fn step_records_land_in_the_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("execution.log.jsonl");
        let telemetry = ExecutionTelemetry::builder("coordinator")
            .log_path(&path)
            .build()
            .unwrap();

        telemetry.log(
            LogLevel::Warn,
            "step completed",
            &json!({"command": "optimize_performance", "success": false}),
        );

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("step completed"));
        assert!(raw.contains("\"level\":\"WARN\""));
    }

    #[test]
    fn bus_events_carry_the_coordinator_source() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = ExecutionTelemetry::builder("coordinator")
            .event_publisher(Arc::clone(&bus) as Arc<dyn EventPublisher>)
            .build()
            .unwrap();

        telemetry.event("execution.plan.completed", json!({"success_rate": 1.0}));

        let backlog = bus.snapshot();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].source, "coordinator");
    }
}
