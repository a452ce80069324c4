use std::fmt;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backends::ExecutionError;

/// How much two checkpoints differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSignificance {
    /// Nothing detectably changed.
    None,
    /// Changes worth noting, not worth replanning for.
    Minor,
    /// Changes that should steer the next planning pass.
    Major,
}

impl fmt::Display for ChangeSignificance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::Minor => "minor",
            Self::Major => "major",
        };
        f.write_str(label)
    }
}

/// Outcome of comparing two checkpoint artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualAnalysis {
    /// Detected changes, as free text.
    pub changes: Vec<String>,
    /// Magnitude tier.
    pub significance: ChangeSignificance,
    /// What to do about it.
    pub recommendation: String,
}

impl VisualAnalysis {
    /// Builds an analysis; an empty change list always reads as no change.
    #[must_use]
    pub fn from_changes(
        changes: Vec<String>,
        significance: ChangeSignificance,
        recommendation: impl Into<String>,
    ) -> Self {
        let significance = if changes.is_empty() {
            ChangeSignificance::None
        } else {
            significance
        };
        Self {
            changes,
            significance,
            recommendation: recommendation.into(),
        }
    }
}

/// Checkpoint-comparison collaborator. Outputs are indicative, not
/// byte-exact reproducible; callers must tolerate that.
#[async_trait]
pub trait VisualAnalyzer: Send + Sync {
    /// Compares two checkpoints in before/after order against a goal.
    async fn compare(
        &self,
        before: &Path,
        after: &Path,
        goal: &str,
    ) -> Result<VisualAnalysis, ExecutionError>;
}

// Size drift at or under this share of the before-artifact reads as minor.
const MINOR_DRIFT_RATIO: f64 = 0.1;

/// Byte-footprint comparison; a stand-in until a real perception backend is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicVisualAnalyzer;

impl HeuristicVisualAnalyzer {
    /// Stateless analyzer handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VisualAnalyzer for HeuristicVisualAnalyzer {
    async fn compare(
        &self,
        before: &Path,
        after: &Path,
        goal: &str,
    ) -> Result<VisualAnalysis, ExecutionError> {
        let before_len = tokio::fs::metadata(before)
            .await
            .with_context(|| format!("reading checkpoint {}", before.display()))?
            .len();
        let after_len = tokio::fs::metadata(after)
            .await
            .with_context(|| format!("reading checkpoint {}", after.display()))?
            .len();

        if before_len == after_len {
            return Ok(VisualAnalysis::from_changes(
                Vec::new(),
                ChangeSignificance::None,
                format!("no visible drift against {goal}; keep the current course"),
            ));
        }

        let delta = before_len.abs_diff(after_len);
        let ratio = delta as f64 / before_len.max(1) as f64;
        let changes = vec![format!(
            "byte footprint moved from {before_len} to {after_len}"
        )];
        if ratio <= MINOR_DRIFT_RATIO {
            Ok(VisualAnalysis::from_changes(
                changes,
                ChangeSignificance::Minor,
                format!("minor drift against {goal}; fold into the next planning pass"),
            ))
        } else {
            Ok(VisualAnalysis::from_changes(
                changes,
                ChangeSignificance::Major,
                format!("major drift against {goal}; schedule a focused review"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn checkpoint(dir: &tempfile::TempDir, name: &str, bytes: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, "x".repeat(bytes)).await.unwrap();
        path
    }

    #[tokio::test]
    async fn identical_footprints_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let before = checkpoint(&dir, "before.png", 100).await;
        let after = checkpoint(&dir, "after.png", 100).await;

        let analysis = HeuristicVisualAnalyzer::new()
            .compare(&before, &after, "login page")
            .await
            .unwrap();

        assert_eq!(analysis.significance, ChangeSignificance::None);
        assert!(analysis.changes.is_empty());
    }

    #[tokio::test]
    async fn small_drift_reads_as_minor() {
        let dir = tempfile::tempdir().unwrap();
        let before = checkpoint(&dir, "before.png", 100).await;
        let after = checkpoint(&dir, "after.png", 105).await;

        let analysis = HeuristicVisualAnalyzer::new()
            .compare(&before, &after, "dashboard")
            .await
            .unwrap();

        assert_eq!(analysis.significance, ChangeSignificance::Minor);
        assert_eq!(analysis.changes.len(), 1);
    }

    #[tokio::test]
    async fn large_drift_reads_as_major() {
        let dir = tempfile::tempdir().unwrap();
        let before = checkpoint(&dir, "before.png", 100).await;
        let after = checkpoint(&dir, "after.png", 300).await;

        let analysis = HeuristicVisualAnalyzer::new()
            .compare(&before, &after, "dashboard")
            .await
            .unwrap();

        assert_eq!(analysis.significance, ChangeSignificance::Major);
        assert!(analysis.recommendation.contains("focused review"));
    }

    #[tokio::test]
    async fn missing_checkpoints_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let before = checkpoint(&dir, "before.png", 10).await;
        let missing = dir.path().join("absent.png");

        let result = HeuristicVisualAnalyzer::new()
            .compare(&before, &missing, "dashboard")
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn empty_change_lists_force_significance_none() {
        let analysis = VisualAnalysis::from_changes(
            Vec::new(),
            ChangeSignificance::Major,
            "keep the current course",
        );
        assert_eq!(analysis.significance, ChangeSignificance::None);
    }
}
