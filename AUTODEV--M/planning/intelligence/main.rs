/// Synthetic, HTTP, and queued intelligence sources.
pub mod sources;

/// TOML configuration for source sets.
pub mod config;

use anyhow::{bail, Result};
use async_trait::async_trait;
use autodev_context::MarketTrend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::telemetry::PlanningTelemetry;

/// Relevance floor applied when no screen is configured.
pub const DEFAULT_MIN_RELEVANCE: f64 = 0.2;
/// Per-list cap applied when no screen is configured.
pub const DEFAULT_MAX_SIGNALS: usize = 16;

/// A competitor movement observed in the project's domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorSignal {
    /// Who moved.
    pub name: String,
    /// How strongly, in [0, 1].
    pub momentum: f64,
}

impl CompetitorSignal {
    /// Builds a competitor signal.
    #[must_use]
    pub fn new(name: impl Into<String>, momentum: f64) -> Self {
        Self {
            name: name.into(),
            momentum,
        }
    }
}

/// A user-demand signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandSignal {
    /// What users are asking for.
    pub need: String,
    /// How loudly, in [0, 1].
    pub intensity: f64,
}

impl DemandSignal {
    /// Builds a demand signal.
    #[must_use]
    pub fn new(need: impl Into<String>, intensity: f64) -> Self {
        Self {
            need: need.into(),
            intensity,
        }
    }
}

/// An opening the project could exploit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunitySignal {
    /// What the opening is.
    pub description: String,
    /// Attractiveness, in [0, 1].
    pub score: f64,
}

impl OpportunitySignal {
    /// Builds an opportunity signal.
    #[must_use]
    pub fn new(description: impl Into<String>, score: f64) -> Self {
        Self {
            description: description.into(),
            score,
        }
    }
}

/// One gathered bundle of market signals; opaque to the planner beyond counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketIntelligence {
    /// Trend signals.
    pub trends: Vec<MarketTrend>,
    /// Competitor signals.
    pub competitors: Vec<CompetitorSignal>,
    /// Demand signals.
    pub demands: Vec<DemandSignal>,
    /// Opportunity signals.
    pub opportunities: Vec<OpportunitySignal>,
    /// When the bundle was assembled.
    pub gathered_at: DateTime<Utc>,
}

impl MarketIntelligence {
    /// Empty bundle stamped with the current UTC time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trends: Vec::new(),
            competitors: Vec::new(),
            demands: Vec::new(),
            opportunities: Vec::new(),
            gathered_at: Utc::now(),
        }
    }

    /// Appends a trend signal.
    #[must_use]
    pub fn with_trend(mut self, trend: MarketTrend) -> Self {
        self.trends.push(trend);
        self
    }

    /// Appends a competitor signal.
    #[must_use]
    pub fn with_competitor(mut self, competitor: CompetitorSignal) -> Self {
        self.competitors.push(competitor);
        self
    }

    /// Appends a demand signal.
    #[must_use]
    pub fn with_demand(mut self, demand: DemandSignal) -> Self {
        self.demands.push(demand);
        self
    }

    /// Appends an opportunity signal.
    #[must_use]
    pub fn with_opportunity(mut self, opportunity: OpportunitySignal) -> Self {
        self.opportunities.push(opportunity);
        self
    }

    /// Total signals across all four lists.
    #[must_use]
    pub fn signal_count(&self) -> usize {
        self.trends.len() + self.competitors.len() + self.demands.len() + self.opportunities.len()
    }

    /// True when every list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signal_count() == 0
    }

    /// Folds another bundle into this one, keeping the earliest stamp.
    pub fn merge(&mut self, other: Self) {
        self.trends.extend(other.trends);
        self.competitors.extend(other.competitors);
        self.demands.extend(other.demands);
        self.opportunities.extend(other.opportunities);
        if other.gathered_at < self.gathered_at {
            self.gathered_at = other.gathered_at;
        }
    }
}

impl Default for MarketIntelligence {
    fn default() -> Self {
        Self::new()
    }
}

/// External intelligence collaborator; tests inject deterministic sources.
#[async_trait]
pub trait IntelligenceSource: Send + Sync {
    /// Source name used in telemetry and failure strings.
    fn name(&self) -> &str;

    /// Pulls signals for a domain and keyword set.
    async fn gather(&self, domain: &str, keywords: &[String]) -> Result<MarketIntelligence>;
}

/// Relevance floor and size cap applied to gathered bundles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalScreen {
    min_relevance: f64,
    max_signals: usize,
}

impl SignalScreen {
    /// Builds a screen, rejecting out-of-range bounds.
    pub fn new(min_relevance: f64, max_signals: usize) -> Result<Self> {
        if !(0.0..=1.0).contains(&min_relevance) {
            bail!("min_relevance {min_relevance} outside [0, 1]");
        }
        if max_signals == 0 {
            bail!("max_signals must be at least 1");
        }
        Ok(Self {
            min_relevance,
            max_signals,
        })
    }

    /// Relevance floor for trend signals.
    #[must_use]
    pub const fn min_relevance(&self) -> f64 {
        self.min_relevance
    }

    /// Per-list signal cap.
    #[must_use]
    pub const fn max_signals(&self) -> usize {
        self.max_signals
    }

    fn apply(&self, intelligence: &mut MarketIntelligence) {
        intelligence
            .trends
            .retain(|trend| trend.relevance >= self.min_relevance);
        intelligence.trends.truncate(self.max_signals);
        intelligence.competitors.truncate(self.max_signals);
        intelligence.demands.truncate(self.max_signals);
        intelligence.opportunities.truncate(self.max_signals);
    }
}

impl Default for SignalScreen {
    fn default() -> Self {
        Self {
            min_relevance: DEFAULT_MIN_RELEVANCE,
            max_signals: DEFAULT_MAX_SIGNALS,
        }
    }
}

struct SourceHandle {
    name: String,
    source: Box<dyn IntelligenceSource>,
}

/// Configures an [`IntelligenceGatherer`].
#[derive(Default)]
pub struct IntelligenceGathererBuilder {
    sources: Vec<SourceHandle>,
    screen: Option<SignalScreen>,
    telemetry: Option<PlanningTelemetry>,
}

impl IntelligenceGathererBuilder {
    /// Registers a source under its own name.
    #[must_use]
    pub fn source(mut self, source: impl IntelligenceSource + 'static) -> Self {
        self.sources.push(SourceHandle {
            name: source.name().to_owned(),
            source: Box::new(source),
        });
        self
    }

    /// Overrides the default screen.
    #[must_use]
    pub const fn screen(mut self, screen: SignalScreen) -> Self {
        self.screen = Some(screen);
        self
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn telemetry(mut self, telemetry: PlanningTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds the gatherer, seeding a synthetic source when none were given.
    #[must_use]
    pub fn build(mut self) -> IntelligenceGatherer {
        if self.sources.is_empty() {
            let fallback = sources::SyntheticIntelligenceSource::new();
            self.sources.push(SourceHandle {
                name: fallback.name().to_owned(),
                source: Box::new(fallback),
            });
        }
        IntelligenceGatherer {
            sources: self.sources,
            screen: self.screen.unwrap_or_default(),
            telemetry: self.telemetry,
        }
    }
}

/// Fans a gather request across every source and screens the merge.
pub struct IntelligenceGatherer {
    sources: Vec<SourceHandle>,
    screen: SignalScreen,
    telemetry: Option<PlanningTelemetry>,
}

impl IntelligenceGatherer {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> IntelligenceGathererBuilder {
        IntelligenceGathererBuilder::default()
    }

    /// Names of the registered sources, in registration order.
    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|handle| handle.name.as_str()).collect()
    }

    /// Pulls from every source, merging what arrives.
    ///
    /// Individual source failures become strings; the call only errors when
    /// every source failed and nothing was gathered.
    pub async fn collect(&self, domain: &str, keywords: &[String]) -> Result<MarketIntelligence> {
        let pulls = self
            .sources
            .iter()
            .map(|handle| handle.source.gather(domain, keywords));
        let results = futures::future::join_all(pulls).await;

        let mut merged = MarketIntelligence::new();
        let mut failures = Vec::new();
        for (handle, result) in self.sources.iter().zip(results) {
            match result {
                Ok(batch) => merged.merge(batch),
                Err(err) => failures.push(format!("{}: {err:#}", handle.name)),
            }
        }

        if merged.is_empty() && !failures.is_empty() {
            bail!("all intelligence sources failed: {}", failures.join("; "));
        }

        self.screen.apply(&mut merged);

        if let Some(telemetry) = &self.telemetry {
            telemetry.log(
                LogLevel::Info,
                "intelligence gathered",
                &json!({
                    "domain": domain,
                    "signals": merged.signal_count(),
                    "failed_sources": failures.len(),
                }),
            );
            telemetry.event(
                "planning.intelligence.gathered",
                json!({"domain": domain, "signals": merged.signal_count()}),
            );
        }
        Ok(merged)
    }
}

impl std::fmt::Debug for IntelligenceGatherer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntelligenceGatherer")
            .field("sources", &self.source_names())
            .field("screen", &self.screen)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::sources::QueuedIntelligenceSource;
    use super::*;

    fn bundle_with_trends(pairs: &[(&str, f64)]) -> MarketIntelligence {
        let mut bundle = MarketIntelligence::new();
        for (topic, relevance) in pairs {
            bundle = bundle.with_trend(MarketTrend::new(*topic, *relevance, "scripted"));
        }
        bundle
    }

    #[tokio::test]
    async fn merges_batches_from_every_source() {
        let first = QueuedIntelligenceSource::new("first");
        first.push(bundle_with_trends(&[("edge inference", 0.9)]));
        let second = QueuedIntelligenceSource::new("second");
        second.push(
            bundle_with_trends(&[("wasm tooling", 0.7)])
                .with_demand(DemandSignal::new("faster builds", 0.8)),
        );

        let gatherer = IntelligenceGatherer::builder()
            .source(first)
            .source(second)
            .build();
        let merged = gatherer.collect("web", &[]).await.unwrap();

        assert_eq!(merged.trends.len(), 2);
        assert_eq!(merged.demands.len(), 1);
        assert_eq!(merged.signal_count(), 3);
    }

    #[tokio::test]
    async fn screen_drops_low_relevance_trends() {
        let source = QueuedIntelligenceSource::new("scripted");
        source.push(bundle_with_trends(&[
            ("strong signal", 0.9),
            ("weak signal", 0.05),
        ]));

        let gatherer = IntelligenceGatherer::builder()
            .source(source)
            .screen(SignalScreen::new(0.5, 8).unwrap())
            .build();
        let merged = gatherer.collect("web", &[]).await.unwrap();

        assert_eq!(merged.trends.len(), 1);
        assert_eq!(merged.trends[0].topic, "strong signal");
    }

    #[tokio::test]
    async fn partial_failure_still_returns_signals() {
        let healthy = QueuedIntelligenceSource::new("healthy");
        healthy.push(bundle_with_trends(&[("edge inference", 0.9)]));
        let drained = QueuedIntelligenceSource::new("drained");

        let gatherer = IntelligenceGatherer::builder()
            .source(healthy)
            .source(drained)
            .build();
        let merged = gatherer.collect("web", &[]).await.unwrap();
        assert_eq!(merged.trends.len(), 1);
    }

    #[tokio::test]
    async fn total_failure_is_an_error() {
        let drained = QueuedIntelligenceSource::new("drained");
        let gatherer = IntelligenceGatherer::builder().source(drained).build();

        let err = gatherer.collect("web", &[]).await.unwrap_err();
        assert!(err.to_string().contains("all intelligence sources failed"));
    }

    #[test]
    fn screen_rejects_bad_bounds() {
        assert!(SignalScreen::new(-0.1, 4).is_err());
        assert!(SignalScreen::new(1.5, 4).is_err());
        assert!(SignalScreen::new(0.5, 0).is_err());
        assert!(SignalScreen::new(0.5, 4).is_ok());
    }

    #[test]
    fn builder_seeds_a_synthetic_fallback() {
        let gatherer = IntelligenceGatherer::builder().build();
        assert_eq!(gatherer.source_names(), vec!["synthetic"]);
    }
}
