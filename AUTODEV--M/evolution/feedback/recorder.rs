use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use autodev_context::FeedbackData;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Append-only JSONL persistence for the feedback stream.
#[derive(Debug)]
pub struct FeedbackRecorder {
    path: PathBuf,
    writer: Mutex<File>,
}

impl FeedbackRecorder {
    /// Opens (creating parents as needed) an append-mode feedback file.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating feedback directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening feedback file {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Serializes one item as a JSON line and flushes it.
    pub fn record(&self, item: &FeedbackData) -> Result<()> {
        let mut file = self.writer.lock();
        serde_json::to_writer(&mut *file, item).context("encoding feedback item")?;
        file.write_all(b"\n").context("terminating feedback item")?;
        file.flush().context("flushing feedback item")?;
        Ok(())
    }

    /// Path of the backing JSONL file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads a recorded feedback stream back, oldest first.
#[derive(Debug, Clone)]
pub struct FeedbackArchive {
    path: PathBuf,
}

impl FeedbackArchive {
    /// Targets `path`; nothing is read until [`FeedbackArchive::load`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads every recorded item; blank lines are skipped, malformed lines
    /// fail with their line number.
    pub fn load(&self) -> Result<Vec<FeedbackData>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading feedback archive {}", self.path.display()))?;
        let mut items = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let item = serde_json::from_str(line).with_context(|| {
                format!(
                    "decoding feedback line {} in {}",
                    index + 1,
                    self.path.display()
                )
            })?;
            items.push(item);
        }
        Ok(items)
    }

    /// Loads the newest `count` items, oldest of those first.
    pub fn tail(&self, count: usize) -> Result<Vec<FeedbackData>> {
        let mut items = self.load()?;
        let skip = items.len().saturating_sub(count);
        items.drain(..skip);
        Ok(items)
    }

    /// Loads every item recorded at or after `cutoff`.
    pub fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<FeedbackData>> {
        let mut items = self.load()?;
        items.retain(|item| item.timestamp >= cutoff);
        Ok(items)
    }

    /// Path of the backing JSONL file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodev_context::{FeedbackKind, FeedbackPriority, FeedbackSource};

    #[test]
    fn recorded_items_round_trip_through_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback/history.jsonl");
        let recorder = FeedbackRecorder::new(&path).unwrap();

        let first = FeedbackData::new(
            FeedbackSource::User,
            FeedbackKind::Bug,
            FeedbackPriority::Critical,
            "checkout crashes on submit",
        );
        let second = FeedbackData::new(
            FeedbackSource::Performance,
            FeedbackKind::PerformanceIssue,
            FeedbackPriority::Medium,
            "latency at 64.2",
        )
        .with_metric("latency", 64.2);
        recorder.record(&first).unwrap();
        recorder.record(&second).unwrap();

        let loaded = FeedbackArchive::new(&path).load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[1].metric("latency"), Some(64.2));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let recorder = FeedbackRecorder::new(&path).unwrap();
        recorder
            .record(&FeedbackData::new(
                FeedbackSource::System,
                FeedbackKind::Improvement,
                FeedbackPriority::Low,
                "source file changed: lib.rs",
            ))
            .unwrap();
        std::fs::write(
            &path,
            format!("{}\n\n", std::fs::read_to_string(&path).unwrap()),
        )
        .unwrap();

        let loaded = FeedbackArchive::new(&path).load().unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn tail_keeps_only_the_newest_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let recorder = FeedbackRecorder::new(&path).unwrap();
        for label in ["first", "second", "third"] {
            recorder
                .record(&FeedbackData::new(
                    FeedbackSource::User,
                    FeedbackKind::FeatureRequest,
                    FeedbackPriority::Low,
                    label,
                ))
                .unwrap();
        }

        let tail = FeedbackArchive::new(&path).tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "second");
        assert_eq!(tail[1].content, "third");
        assert_eq!(FeedbackArchive::new(&path).tail(9).unwrap().len(), 3);
    }

    #[test]
    fn since_drops_items_older_than_the_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let recorder = FeedbackRecorder::new(&path).unwrap();

        let mut stale = FeedbackData::new(
            FeedbackSource::System,
            FeedbackKind::Improvement,
            FeedbackPriority::Low,
            "source file changed: engine.rs",
        );
        stale.timestamp = Utc::now() - chrono::Duration::hours(48);
        let fresh = FeedbackData::new(
            FeedbackSource::User,
            FeedbackKind::Bug,
            FeedbackPriority::High,
            "export hangs on large projects",
        );
        recorder.record(&stale).unwrap();
        recorder.record(&fresh).unwrap();

        let window = FeedbackArchive::new(&path)
            .since(Utc::now() - chrono::Duration::hours(24))
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, fresh.id);
    }

    #[test]
    fn malformed_lines_name_their_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();

        let err = FeedbackArchive::new(&path).load().unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
    }

    #[test]
    fn missing_archives_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FeedbackArchive::new(dir.path().join("absent.jsonl"));
        assert!(archive.load().is_err());
    }
}
