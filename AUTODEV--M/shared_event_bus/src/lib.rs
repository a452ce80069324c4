#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Publish/subscribe event plumbing shared by every autodev subsystem.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

/// One event envelope traveling across subsystem boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Caller-assigned identifier, unique per event.
    pub id: String,
    /// Subsystem that emitted the event.
    pub source: String,
    /// Dotted event kind, e.g. `evolution.cycle.requested`.
    pub kind: String,
    /// RFC 3339 emission timestamp.
    pub timestamp: String,
    /// Structured payload; consumers treat unknown shapes as opaque.
    #[serde(default)]
    pub payload: Value,
}

/// Sink half of the bus contract.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Delivers one event; implementations decide durability.
    async fn publish(&self, event: BusEvent) -> Result<()>;
}

/// Source half of the bus contract.
pub trait EventSubscriber: Send + Sync {
    /// Opens a live receiver; events published before the call are not replayed.
    fn subscribe(&self) -> broadcast::Receiver<BusEvent>;
}

/// In-process broadcast bus keeping a bounded backlog for late inspection.
#[derive(Debug)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<BusEvent>,
    backlog: Mutex<VecDeque<BusEvent>>,
    capacity: usize,
}

impl MemoryEventBus {
    /// Creates a bus retaining at most `capacity` events in its backlog.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            backlog: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Copies the retained backlog, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BusEvent> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: BusEvent) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            backlog.push_back(event.clone());
            while backlog.len() > self.capacity {
                backlog.pop_front();
            }
        }
        // A send with no receivers is not an error for a broadcast bus.
        let _ = self.sender.send(event);
        Ok(())
    }
}

impl EventSubscriber for MemoryEventBus {
    fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }
}

/// Durable publisher appending events as JSON lines.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Targets `path`; the file and its parents are created on first publish.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing JSONL file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: BusEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating event directory {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening event file {}", self.path.display()))?;
        let mut line = serde_json::to_vec(&event).context("encoding event")?;
        line.push(b'\n');
        file.write_all(&line)
            .await
            .with_context(|| format!("appending event to {}", self.path.display()))?;
        file.flush().await.context("flushing event file")?;
        Ok(())
    }
}
