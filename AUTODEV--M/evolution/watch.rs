use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use autodev_context::{FeedbackData, FeedbackKind, FeedbackPriority, FeedbackSource};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;

use crate::feedback::FeedbackIngestor;

/// File extensions treated as source code.
const WATCHED_EXTENSIONS: [&str; 5] = ["go", "js", "py", "rs", "ts"];

/// How often the drain task checks for buffered filesystem events.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bursts inside this window after an emission are dropped, not deferred.
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Most file names spelled out in one synthesized item.
const MAX_NAMED_FILES: usize = 5;

/// Watches a source tree and turns edits into low-priority feedback.
///
/// Editors that save in multi-write bursts produce one item, not one per
/// write. Dropping the watcher stops both the filesystem hook and the drain
/// task.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    root: PathBuf,
}

impl SourceWatcher {
    /// Starts watching `root` recursively, feeding `ingestor`.
    pub fn spawn(root: impl Into<PathBuf>, ingestor: Arc<FeedbackIngestor>) -> Result<Self> {
        let root = root.into();
        // Bridges notify's synchronous callback into the async drain task.
        let (tx, rx) = mpsc::channel();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            })
            .context("starting the source watcher")?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("watching {}", root.display()))?;
        let task = tokio::spawn(drain_events(rx, ingestor));
        Ok(Self {
            _watcher: watcher,
            task,
            root,
        })
    }

    /// Stops the drain task; the filesystem hook dies with the watcher.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Directory under watch.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl fmt::Debug for SourceWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceWatcher")
            .field("root", &self.root)
            .field("running", &!self.task.is_finished())
            .finish()
    }
}

async fn drain_events(rx: mpsc::Receiver<Event>, ingestor: Arc<FeedbackIngestor>) {
    // None until the first emission; the first burst is never debounced.
    let mut last_emit: Option<Instant> = None;
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let mut touched = Vec::new();
        let mut disconnected = false;
        loop {
            match rx.try_recv() {
                Ok(event) => collect_sources(&event, &mut touched),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        let debounced = last_emit.is_some_and(|at| at.elapsed() < DEBOUNCE);
        if !touched.is_empty() && !debounced {
            last_emit = Some(Instant::now());
            if let Err(err) = ingestor.ingest(synthesize(&touched)).await {
                eprintln!("source watcher feedback failed: {err:#}");
            }
        }
        if disconnected {
            return;
        }
    }
}

fn collect_sources(event: &Event, touched: &mut Vec<String>) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }
    for path in &event.paths {
        if !is_watched_source(path) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(OsStr::to_str) {
            if !touched.iter().any(|seen| seen == name) {
                touched.push(name.to_owned());
            }
        }
    }
}

fn is_watched_source(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| WATCHED_EXTENSIONS.contains(&ext))
}

fn synthesize(touched: &[String]) -> FeedbackData {
    let content = if let [single] = touched {
        format!("source file changed: {single}")
    } else {
        let shown = touched
            .iter()
            .take(MAX_NAMED_FILES)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if touched.len() > MAX_NAMED_FILES {
            format!("{} source files changed: {shown}, ...", touched.len())
        } else {
            format!("{} source files changed: {shown}", touched.len())
        }
    };
    FeedbackData::new(
        FeedbackSource::System,
        FeedbackKind::Improvement,
        FeedbackPriority::Low,
        content,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{FeedbackLog, StateCell};
    use crate::learning::LearningLedger;

    fn watcher_pair(root: &Path) -> (SourceWatcher, Arc<FeedbackLog>) {
        let log = Arc::new(FeedbackLog::new());
        let ingestor = Arc::new(FeedbackIngestor::new(
            Arc::clone(&log),
            Arc::new(LearningLedger::new()),
            StateCell::default(),
        ));
        let watcher = SourceWatcher::spawn(root, ingestor).unwrap();
        (watcher, log)
    }

    #[test]
    fn extension_filter_matches_the_watched_set() {
        assert!(is_watched_source(Path::new("src/engine.rs")));
        assert!(is_watched_source(Path::new("scripts/report.py")));
        assert!(!is_watched_source(Path::new("docs/notes.md")));
        assert!(!is_watched_source(Path::new("Makefile")));
    }

    #[test]
    fn burst_summaries_name_at_most_five_files() {
        let names: Vec<String> = (0..7).map(|i| format!("f{i}.rs")).collect();
        let item = synthesize(&names);
        assert!(item.content.starts_with("7 source files changed:"));
        assert!(item.content.ends_with(", ..."));

        let single = synthesize(&["engine.rs".to_owned()]);
        assert_eq!(single.content, "source file changed: engine.rs");
        assert_eq!(single.priority, FeedbackPriority::Low);
        assert_eq!(single.kind, FeedbackKind::Improvement);
    }

    #[tokio::test]
    async fn source_changes_synthesize_low_priority_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, log) = watcher_pair(dir.path());
        tokio::time::sleep(Duration::from_millis(150)).await;

        std::fs::write(dir.path().join("engine.rs"), "fn main() {}").unwrap();

        let mut waited = Duration::ZERO;
        while log.is_empty() && waited < Duration::from_secs(3) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }
        watcher.stop();

        let items = log.all();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, FeedbackSource::System);
        assert_eq!(items[0].priority, FeedbackPriority::Low);
        assert!(items[0].content.contains("engine.rs"));
    }

    #[tokio::test]
    async fn non_source_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, log) = watcher_pair(dir.path());
        tokio::time::sleep(Duration::from_millis(150)).await;

        std::fs::write(dir.path().join("notes.md"), "todo list").unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        watcher.stop();
        assert!(log.is_empty());
    }
}
