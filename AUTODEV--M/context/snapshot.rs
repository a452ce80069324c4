use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::model::{ArtifactLayout, CodeQuality, ProjectContext, RecentSignals};

/// Builds [`ProjectContext`] values by probing the project tree.
///
/// The builder is a pure reader; presence flags reflect the filesystem at
/// capture time and nothing is cached between captures.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    root: PathBuf,
    layout: ArtifactLayout,
    quality: CodeQuality,
}

impl SnapshotBuilder {
    /// Targets `root` with the conventional artifact layout.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            layout: ArtifactLayout::default(),
            quality: CodeQuality::Good,
        }
    }

    /// Overrides where artifacts are looked up.
    #[must_use]
    pub fn with_layout(mut self, layout: ArtifactLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Overrides the code-health grade stamped onto snapshots.
    #[must_use]
    pub const fn with_quality(mut self, grade: CodeQuality) -> Self {
        self.quality = grade;
        self
    }

    /// Project root being probed.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Probes artifact presence and merges `signals` into a fresh context.
    pub async fn capture(&self, signals: RecentSignals) -> ProjectContext {
        let mut context = ProjectContext::new()
            .with_quality(self.quality)
            .with_signals(signals);
        context.captured_at = Utc::now();
        context.has_constitution = file_present(&self.root.join(&self.layout.constitution)).await;
        context.has_specification =
            dir_has_document(&self.root.join(&self.layout.specifications)).await;
        context.has_plan = dir_has_document(&self.root.join(&self.layout.plans)).await;
        context.has_tasks = dir_has_document(&self.root.join(&self.layout.tasks)).await;
        context.has_implementation =
            dir_has_entries(&self.root.join(&self.layout.implementation)).await;
        context
    }
}

async fn file_present(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

// Unreadable directories count as absent; nothing here is fatal.
async fn dir_has_document(path: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(path).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.path().extension().is_some_and(|ext| ext == "md") {
            return true;
        }
    }
    false
}

async fn dir_has_entries(path: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(path).await else {
        return false;
    };
    matches!(entries.next_entry().await, Ok(Some(_)))
}
