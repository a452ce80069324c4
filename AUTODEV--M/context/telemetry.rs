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

/// Configures a [`ContextTelemetry`] handle.
#[derive(Default)]
pub struct ContextTelemetryBuilder {
    source: String,
    log_path: Option<PathBuf>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl ContextTelemetryBuilder {
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
    pub fn build(self) -> Result<ContextTelemetry> {
        let logger = self
            .log_path
            .map(JsonLogger::new)
            .transpose()
            .context("opening context telemetry log")?;
        let events = self.publisher.map(EventHandle::new).transpose()?;
        Ok(ContextTelemetry {
            inner: Arc::new(TelemetryInner {
                source: self.source,
                logger,
                events,
            }),
        })
    }
}

impl fmt::Debug for ContextTelemetryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextTelemetryBuilder")
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
                Runtime::new().context("starting context telemetry runtime")?,
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
                        eprintln!("context telemetry event failed: {err:#}");
                    }
                }
            }
        }
    }

    fn spawn_on(&self, handle: &Handle, event: BusEvent) {
        let publisher = Arc::clone(&self.publisher);
        handle.spawn(async move {
            if let Err(err) = publisher.publish(event).await {
                eprintln!("context telemetry event failed: {err:#}");
            }
        });
    }
}

struct TelemetryInner {
    source: String,
    logger: Option<JsonLogger>,
    events: Option<EventHandle>,
}

/// Cheap-to-clone telemetry handle for the context stack.
#[derive(Clone)]
pub struct ContextTelemetry {
    inner: Arc<TelemetryInner>,
}

impl ContextTelemetry {
    /// Starts a builder for the given source name.
    #[must_use]
    pub fn builder(source: impl Into<String>) -> ContextTelemetryBuilder {
        ContextTelemetryBuilder::new(source)
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
                eprintln!("context telemetry log failed: {err:#}");
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

impl fmt::Debug for ContextTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextTelemetry")
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
    use shared_event_bus::{EventSubscriber, MemoryEventBus};

    #[test]
    fn logs_records_through_the_shared_logger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("context.log.jsonl");
        let telemetry = ContextTelemetry::builder("context")
            .log_path(&path)
            .build()
            .unwrap();

        telemetry.log(LogLevel::Info, "classified", &json!({"category": "fix"}));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("classified"));
        assert!(raw.contains("\"category\":\"fix\""));
    }

    #[test]
    fn publishes_events_on_the_bus_from_sync_context() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = ContextTelemetry::builder("context")
            .event_publisher(Arc::clone(&bus) as Arc<dyn EventPublisher>)
            .build()
            .unwrap();

        telemetry.event("context.intent.classified", json!({"category": "fix"}));

        let backlog = bus.snapshot();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].source, "context");
        assert_eq!(backlog[0].kind, "context.intent.classified");
    }

    #[tokio::test]
    async fn attaches_to_an_ambient_runtime() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let mut receiver = bus.subscribe();
        let telemetry = ContextTelemetry::builder("context")
            .event_publisher(Arc::clone(&bus) as Arc<dyn EventPublisher>)
            .build()
            .unwrap();

        telemetry.event("context.snapshot.captured", json!({"flags": 5}));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind, "context.snapshot.captured");
    }
}
