use autodev_context::{FeedbackData, FeedbackKind, FeedbackPriority};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Confidence assigned to a pattern before any observation lands.
pub const BASE_CONFIDENCE: f64 = 0.5;

/// Confidence gained per observed feedback/response pair.
pub const CONFIDENCE_STEP: f64 = 0.1;

/// Builds the ledger key for one feedback/response pairing.
#[must_use]
pub fn pattern_key(kind: FeedbackKind, priority: FeedbackPriority, response: &str) -> String {
    format!("{}|{priority}|{response}", kind.as_label())
}

/// Accumulated memory for one recurring feedback/response pattern.
///
/// Confidence starts at [`BASE_CONFIDENCE`], grows by [`CONFIDENCE_STEP`] per
/// observed pair, and caps at 1.0; it never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningModel {
    /// Ledger key, `kind|priority|response`.
    pub pattern: String,
    /// Trust in the pattern, in `[BASE_CONFIDENCE, 1.0]`.
    pub confidence: f64,
    /// Volume-damped success projection.
    pub success_rate: f64,
    /// Pairs folded in so far.
    pub observations: usize,
    /// Feedback contents seen under this pattern, oldest first.
    pub contexts: Vec<String>,
    /// Cycle outcomes recorded against this pattern, oldest first.
    pub outcomes: Vec<String>,
    /// Recommendations accumulated from completed cycles.
    pub recommendations: Vec<String>,
}

impl LearningModel {
    /// Fresh model for `pattern` with no observations.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            confidence: BASE_CONFIDENCE,
            success_rate: 0.0,
            observations: 0,
            contexts: Vec::new(),
            outcomes: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    fn observe(&mut self, context: String) {
        self.contexts.push(context);
        self.observations += 1;
        self.confidence = (self.confidence + CONFIDENCE_STEP).min(1.0);
        // One observation never claims certainty; the projection is damped
        // by volume so it approaches confidence from below.
        let n = self.observations as f64;
        self.success_rate = self.confidence * n / (n + 1.0);
    }
}

/// Thread-safe collection of learning models keyed by pattern.
///
/// Appends dominate reads here; a single mutex over an insertion-ordered map
/// keeps iteration deterministic.
#[derive(Debug, Default)]
pub struct LearningLedger {
    models: Mutex<IndexMap<String, LearningModel>>,
}

impl LearningLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one feedback/response pair into the matching model, creating it
    /// on first sight. Returns the confidence after the update.
    pub fn observe(&self, item: &FeedbackData, response: &str) -> f64 {
        let key = pattern_key(item.kind, item.priority, response);
        let mut models = self.models.lock();
        let model = models
            .entry(key.clone())
            .or_insert_with(|| LearningModel::new(key));
        model.observe(item.content.clone());
        model.confidence
    }

    /// Appends a cycle outcome to the matching model without touching its
    /// confidence; the pair was already counted when it was observed.
    pub fn record_outcome(
        &self,
        kind: FeedbackKind,
        priority: FeedbackPriority,
        response: &str,
        outcome: impl Into<String>,
    ) {
        let key = pattern_key(kind, priority, response);
        let mut models = self.models.lock();
        let model = models
            .entry(key.clone())
            .or_insert_with(|| LearningModel::new(key));
        model.outcomes.push(outcome.into());
    }

    /// Appends a recommendation to the matching model.
    pub fn recommend(
        &self,
        kind: FeedbackKind,
        priority: FeedbackPriority,
        response: &str,
        recommendation: impl Into<String>,
    ) {
        let key = pattern_key(kind, priority, response);
        let mut models = self.models.lock();
        let model = models
            .entry(key.clone())
            .or_insert_with(|| LearningModel::new(key));
        model.recommendations.push(recommendation.into());
    }

    /// Looks up one model by pattern key.
    #[must_use]
    pub fn model(&self, pattern: &str) -> Option<LearningModel> {
        self.models.lock().get(pattern).cloned()
    }

    /// Copies every model, insertion order preserved.
    #[must_use]
    pub fn models(&self) -> Vec<LearningModel> {
        self.models.lock().values().cloned().collect()
    }

    /// Distinct patterns seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.lock().len()
    }

    /// True before the first observation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.lock().is_empty()
    }
}
