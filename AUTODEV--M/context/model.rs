use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse grade attached to the project's current code health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeQuality {
    /// Widespread defects or missing structure.
    Poor,
    /// Working but rough.
    Fair,
    /// Healthy baseline.
    #[default]
    Good,
    /// Polished and well tested.
    Excellent,
}

impl fmt::Display for CodeQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        };
        f.write_str(label)
    }
}

/// Origin of a feedback item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSource {
    /// Submitted by a human operator.
    User,
    /// Synthesized by the engine itself.
    System,
    /// Derived from market intelligence.
    Market,
    /// Derived from metric polling.
    Performance,
    /// Emitted by an evolution cycle.
    Evolution,
}

impl fmt::Display for FeedbackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::User => "user",
            Self::System => "system",
            Self::Market => "market",
            Self::Performance => "performance",
            Self::Evolution => "evolution",
        };
        f.write_str(label)
    }
}

/// What a feedback item reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Something worked and should be reinforced.
    Success,
    /// Something failed outright.
    Failure,
    /// A suggestion for doing better.
    Improvement,
    /// A defect report.
    Bug,
    /// A request for new capability.
    FeatureRequest,
    /// A measured performance regression.
    PerformanceIssue,
}

impl FeedbackKind {
    /// Stable snake_case label used in pattern keys and payloads.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Improvement => "improvement",
            Self::Bug => "bug",
            Self::FeatureRequest => "feature_request",
            Self::PerformanceIssue => "performance_issue",
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// How quickly a feedback item demands attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackPriority {
    /// Informational.
    Low,
    /// Routine.
    Medium,
    /// Should be handled in the current pass.
    High,
    /// Demands an immediate response.
    Critical,
}

impl FeedbackPriority {
    /// True for the high and critical tiers counted by trigger windows.
    #[must_use]
    pub const fn is_elevated(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for FeedbackPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// One feedback item; immutable once appended to the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackData {
    /// Unique identifier assigned at creation.
    pub id: Uuid,
    /// Origin of the item.
    pub source: FeedbackSource,
    /// What the item reports.
    pub kind: FeedbackKind,
    /// Free-text description.
    pub content: String,
    /// Optional named numeric measurements.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metrics: IndexMap<String, f64>,
    /// Creation time; the history log keeps these monotonic.
    pub timestamp: DateTime<Utc>,
    /// Attention tier.
    pub priority: FeedbackPriority,
}

impl FeedbackData {
    /// Builds an item stamped with a fresh id and the current UTC time.
    #[must_use]
    pub fn new(
        source: FeedbackSource,
        kind: FeedbackKind,
        priority: FeedbackPriority,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            kind,
            content: content.into(),
            metrics: IndexMap::new(),
            timestamp: Utc::now(),
            priority,
        }
    }

    /// Attaches a named measurement, replacing any previous value.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Looks up a named measurement.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// True if any attached measurement sits below `floor`.
    #[must_use]
    pub fn any_metric_below(&self, floor: f64) -> bool {
        self.metrics.values().any(|value| *value < floor)
    }

    /// True for high or critical priority.
    #[must_use]
    pub const fn is_elevated(&self) -> bool {
        self.priority.is_elevated()
    }
}

/// One market or technology signal relevant to the project's domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTrend {
    /// What the signal is about.
    pub topic: String,
    /// Relevance score in [0, 1].
    pub relevance: f64,
    /// Where the signal came from.
    pub source: String,
}

impl MarketTrend {
    /// Builds a trend signal.
    #[must_use]
    pub fn new(topic: impl Into<String>, relevance: f64, source: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            relevance,
            source: source.into(),
        }
    }
}

/// Severity tier of a reported defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BugSeverity {
    /// Cosmetic.
    Low,
    /// Annoying but workable.
    Medium,
    /// Blocks a feature.
    High,
    /// Blocks the product.
    Critical,
}

impl fmt::Display for BugSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// One open defect known to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugReport {
    /// Unique identifier assigned at creation.
    pub id: Uuid,
    /// What is broken.
    pub description: String,
    /// Severity tier.
    pub severity: BugSeverity,
    /// When the defect was reported.
    pub reported_at: DateTime<Utc>,
}

impl BugReport {
    /// Builds a report stamped with a fresh id and the current UTC time.
    #[must_use]
    pub fn new(description: impl Into<String>, severity: BugSeverity) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            severity,
            reported_at: Utc::now(),
        }
    }

    /// True for critical severity.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self.severity, BugSeverity::Critical)
    }
}

/// Direction a tracked metric is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricTrend {
    /// Getting better.
    Improving,
    /// Holding steady.
    Stable,
    /// Getting worse.
    Declining,
}

impl fmt::Display for MetricTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Improving => "improving",
            Self::Stable => "stable",
            Self::Declining => "declining",
        };
        f.write_str(label)
    }
}

/// One tracked performance measurement with its acceptance threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    /// Metric name, e.g. `response_time_score`.
    pub name: String,
    /// Last observed value.
    pub value: f64,
    /// Value below which the metric needs attention.
    pub threshold: f64,
    /// Movement direction across recent observations.
    pub trend: MetricTrend,
}

impl PerformanceMetric {
    /// Builds a metric observation.
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64, threshold: f64, trend: MetricTrend) -> Self {
        Self {
            name: name.into(),
            value,
            threshold,
            trend,
        }
    }

    /// True when the value is below threshold while still declining.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.value < self.threshold && self.trend == MetricTrend::Declining
    }
}

/// In-memory history handed to the snapshot builder by the loop owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentSignals {
    /// Recent feedback items, oldest first.
    pub feedback: Vec<FeedbackData>,
    /// Recent market signals.
    pub trends: Vec<MarketTrend>,
    /// Open defects.
    pub bugs: Vec<BugReport>,
    /// Latest metric observations.
    pub metrics: Vec<PerformanceMetric>,
    /// Completion time of the most recent evolution cycle, if any.
    pub last_evolution: Option<DateTime<Utc>>,
}

impl RecentSignals {
    /// Empty signal set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a feedback item.
    #[must_use]
    pub fn with_feedback(mut self, item: FeedbackData) -> Self {
        self.feedback.push(item);
        self
    }

    /// Appends a market signal.
    #[must_use]
    pub fn with_trend(mut self, trend: MarketTrend) -> Self {
        self.trends.push(trend);
        self
    }

    /// Appends a defect.
    #[must_use]
    pub fn with_bug(mut self, bug: BugReport) -> Self {
        self.bugs.push(bug);
        self
    }

    /// Appends a metric observation.
    #[must_use]
    pub fn with_metric(mut self, metric: PerformanceMetric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Records when the last evolution cycle finished.
    #[must_use]
    pub const fn with_last_evolution(mut self, at: DateTime<Utc>) -> Self {
        self.last_evolution = Some(at);
        self
    }
}

/// Everything the planner needs to know about the project, rebuilt per pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    /// When the snapshot was taken; flags reflect this instant only.
    pub captured_at: DateTime<Utc>,
    /// A constitution document exists.
    pub has_constitution: bool,
    /// At least one specification document exists.
    pub has_specification: bool,
    /// At least one plan document exists.
    pub has_plan: bool,
    /// At least one task document exists.
    pub has_tasks: bool,
    /// The implementation directory is populated.
    pub has_implementation: bool,
    /// Coarse code-health grade.
    pub code_quality: CodeQuality,
    /// Recent feedback items, oldest first.
    pub feedback: Vec<FeedbackData>,
    /// Recent market signals.
    pub trends: Vec<MarketTrend>,
    /// Open defects.
    pub bugs: Vec<BugReport>,
    /// Latest metric observations.
    pub metrics: Vec<PerformanceMetric>,
    /// Completion time of the most recent evolution cycle, if any.
    pub last_evolution: Option<DateTime<Utc>>,
}

impl ProjectContext {
    /// Empty context with all artifact flags cleared.
    #[must_use]
    pub fn new() -> Self {
        Self {
            captured_at: Utc::now(),
            has_constitution: false,
            has_specification: false,
            has_plan: false,
            has_tasks: false,
            has_implementation: false,
            code_quality: CodeQuality::default(),
            feedback: Vec::new(),
            trends: Vec::new(),
            bugs: Vec::new(),
            metrics: Vec::new(),
            last_evolution: None,
        }
    }

    /// Sets the constitution flag.
    #[must_use]
    pub const fn with_constitution(mut self, present: bool) -> Self {
        self.has_constitution = present;
        self
    }

    /// Sets the specification flag.
    #[must_use]
    pub const fn with_specification(mut self, present: bool) -> Self {
        self.has_specification = present;
        self
    }

    /// Sets the plan flag.
    #[must_use]
    pub const fn with_plan(mut self, present: bool) -> Self {
        self.has_plan = present;
        self
    }

    /// Sets the tasks flag.
    #[must_use]
    pub const fn with_tasks(mut self, present: bool) -> Self {
        self.has_tasks = present;
        self
    }

    /// Sets the implementation flag.
    #[must_use]
    pub const fn with_implementation(mut self, present: bool) -> Self {
        self.has_implementation = present;
        self
    }

    /// Sets the code-health grade.
    #[must_use]
    pub const fn with_quality(mut self, grade: CodeQuality) -> Self {
        self.code_quality = grade;
        self
    }

    /// Merges recent history into the context.
    #[must_use]
    pub fn with_signals(mut self, signals: RecentSignals) -> Self {
        self.feedback = signals.feedback;
        self.trends = signals.trends;
        self.bugs = signals.bugs;
        self.metrics = signals.metrics;
        self.last_evolution = signals.last_evolution;
        self
    }

    /// Metrics currently below threshold and declining.
    pub fn degraded_metrics(&self) -> impl Iterator<Item = &PerformanceMetric> {
        self.metrics.iter().filter(|metric| metric.is_degraded())
    }

    /// Defects at critical severity.
    pub fn critical_bugs(&self) -> impl Iterator<Item = &BugReport> {
        self.bugs.iter().filter(|bug| bug.is_critical())
    }

    /// Feedback at high or critical priority.
    pub fn elevated_feedback(&self) -> impl Iterator<Item = &FeedbackData> {
        self.feedback.iter().filter(|item| item.is_elevated())
    }

    /// True when no cycle ever ran or the last one is at least `days` old.
    #[must_use]
    pub fn evolution_stale(&self, days: i64) -> bool {
        self.last_evolution
            .is_none_or(|at| Utc::now() - at >= Duration::days(days))
    }
}

impl Default for ProjectContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Where project artifacts live, relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLayout {
    /// Constitution document path.
    pub constitution: PathBuf,
    /// Directory holding specification documents.
    pub specifications: PathBuf,
    /// Directory holding plan documents.
    pub plans: PathBuf,
    /// Directory holding task documents.
    pub tasks: PathBuf,
    /// Directory holding the implementation.
    pub implementation: PathBuf,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            constitution: PathBuf::from("memory/constitution.md"),
            specifications: PathBuf::from("specs"),
            plans: PathBuf::from("plans"),
            tasks: PathBuf::from("tasks"),
            implementation: PathBuf::from("src"),
        }
    }
}
