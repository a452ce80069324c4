use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use autodev_context::MarketTrend;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use super::{
    CompetitorSignal, DemandSignal, IntelligenceSource, MarketIntelligence, OpportunitySignal,
};

/// User agent presented by the HTTP source.
pub const DEFAULT_USER_AGENT: &str = "autodev-intelligence/0.1";

const SYNTHETIC_LATENCY_MS: u64 = 20;
const SYNTHETIC_KEYWORD_CAP: usize = 3;

/// Offline source deriving plausible signals from the request itself.
///
/// Seeded construction makes the output reproducible for tests; the default
/// constructor draws entropy like any other jittered source.
#[derive(Debug, Clone)]
pub struct SyntheticIntelligenceSource {
    rng: SmallRng,
}

impl SyntheticIntelligenceSource {
    /// Entropy-seeded source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    /// Deterministic source for a fixed seed.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Default for SyntheticIntelligenceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntelligenceSource for SyntheticIntelligenceSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn gather(&self, domain: &str, keywords: &[String]) -> Result<MarketIntelligence> {
        tokio::time::sleep(Duration::from_millis(SYNTHETIC_LATENCY_MS)).await;
        let mut rng = self.rng.clone();

        let mut bundle = MarketIntelligence::new();
        if keywords.is_empty() {
            bundle = bundle.with_trend(MarketTrend::new(
                format!("{domain} tooling"),
                jitter(&mut rng),
                "synthetic",
            ));
        } else {
            for keyword in keywords.iter().take(SYNTHETIC_KEYWORD_CAP) {
                bundle = bundle.with_trend(MarketTrend::new(
                    format!("{keyword} adoption"),
                    jitter(&mut rng),
                    "synthetic",
                ));
            }
        }
        Ok(bundle
            .with_competitor(CompetitorSignal::new(
                format!("{domain} incumbent"),
                jitter(&mut rng),
            ))
            .with_demand(DemandSignal::new(
                format!("faster {domain} delivery"),
                jitter(&mut rng),
            ))
            .with_opportunity(OpportunitySignal::new(
                format!("automate {domain} regression checks"),
                jitter(&mut rng),
            )))
    }
}

fn jitter(rng: &mut SmallRng) -> f64 {
    (rng.gen_range(0.30_f64..0.95) * 100.0).round() / 100.0
}

/// Network source pulling a JSON signal bundle from one endpoint.
#[derive(Debug, Clone)]
pub struct HttpIntelligenceSource {
    name: String,
    url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpIntelligenceSource {
    /// Builds the source with a bounded request timeout.
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("building intelligence http client")?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            auth_token: None,
            client,
        })
    }

    /// Sends a bearer token with every request.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

#[async_trait]
impl IntelligenceSource for HttpIntelligenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn gather(&self, domain: &str, keywords: &[String]) -> Result<MarketIntelligence> {
        let mut request = self.client.get(&self.url).query(&[("domain", domain)]);
        if !keywords.is_empty() {
            request = request.query(&[("keywords", keywords.join(","))]);
        }
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("querying intelligence source {}", self.name))?
            .error_for_status()
            .with_context(|| format!("intelligence source {} rejected the request", self.name))?;
        let remote: RemoteBundle = response
            .json()
            .await
            .with_context(|| format!("decoding intelligence source {}", self.name))?;
        Ok(remote.into_intelligence(&self.name))
    }
}

#[derive(Debug, Deserialize)]
struct RemoteBundle {
    #[serde(default)]
    trends: Vec<RemoteTrend>,
    #[serde(default)]
    competitors: Vec<RemoteCompetitor>,
    #[serde(default)]
    demands: Vec<RemoteDemand>,
    #[serde(default)]
    opportunities: Vec<RemoteOpportunity>,
}

#[derive(Debug, Deserialize)]
struct RemoteTrend {
    topic: String,
    relevance: f64,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteCompetitor {
    name: String,
    momentum: f64,
}

#[derive(Debug, Deserialize)]
struct RemoteDemand {
    need: String,
    intensity: f64,
}

#[derive(Debug, Deserialize)]
struct RemoteOpportunity {
    description: String,
    score: f64,
}

impl RemoteBundle {
    fn into_intelligence(self, fallback_source: &str) -> MarketIntelligence {
        let mut bundle = MarketIntelligence::new();
        bundle.trends = self
            .trends
            .into_iter()
            .map(|trend| {
                MarketTrend::new(
                    trend.topic,
                    trend.relevance,
                    trend.source.unwrap_or_else(|| fallback_source.to_owned()),
                )
            })
            .collect();
        bundle.competitors = self
            .competitors
            .into_iter()
            .map(|competitor| CompetitorSignal::new(competitor.name, competitor.momentum))
            .collect();
        bundle.demands = self
            .demands
            .into_iter()
            .map(|demand| DemandSignal::new(demand.need, demand.intensity))
            .collect();
        bundle.opportunities = self
            .opportunities
            .into_iter()
            .map(|opportunity| OpportunitySignal::new(opportunity.description, opportunity.score))
            .collect();
        bundle
    }
}

/// Scripted source popping pre-loaded bundles; drained queues error.
#[derive(Debug)]
pub struct QueuedIntelligenceSource {
    name: String,
    batches: Mutex<VecDeque<MarketIntelligence>>,
}

impl QueuedIntelligenceSource {
    /// Empty queue under the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batches: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a bundle to the script.
    pub fn push(&self, bundle: MarketIntelligence) {
        self.batches.lock().push_back(bundle);
    }

    /// Bundles still queued.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl IntelligenceSource for QueuedIntelligenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn gather(&self, _domain: &str, _keywords: &[String]) -> Result<MarketIntelligence> {
        let popped = self.batches.lock().pop_front();
        match popped {
            Some(bundle) => Ok(bundle),
            None => bail!("intelligence queue for {} is drained", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_synthetic_output_is_reproducible() {
        let keywords = vec!["deploy".to_owned(), "pipeline".to_owned()];
        let first = SyntheticIntelligenceSource::seeded(7)
            .gather("web", &keywords)
            .await
            .unwrap();
        let second = SyntheticIntelligenceSource::seeded(7)
            .gather("web", &keywords)
            .await
            .unwrap();

        assert_eq!(first.trends, second.trends);
        assert_eq!(first.competitors, second.competitors);
        assert_eq!(first.demands, second.demands);
        assert_eq!(first.opportunities, second.opportunities);
    }

    #[tokio::test]
    async fn synthetic_covers_domain_when_keywords_are_empty() {
        let bundle = SyntheticIntelligenceSource::seeded(3)
            .gather("api", &[])
            .await
            .unwrap();
        assert_eq!(bundle.trends.len(), 1);
        assert!(bundle.trends[0].topic.contains("api"));
        assert!(bundle.signal_count() >= 4);
    }

    #[tokio::test]
    async fn queued_source_pops_in_order_then_errors() {
        let source = QueuedIntelligenceSource::new("scripted");
        source.push(MarketIntelligence::new().with_demand(DemandSignal::new("first", 0.5)));
        source.push(MarketIntelligence::new().with_demand(DemandSignal::new("second", 0.5)));

        let first = source.gather("web", &[]).await.unwrap();
        assert_eq!(first.demands[0].need, "first");
        let second = source.gather("web", &[]).await.unwrap();
        assert_eq!(second.demands[0].need, "second");
        assert!(source.gather("web", &[]).await.is_err());
    }

    #[test]
    fn remote_bundles_fall_back_to_the_source_name() {
        let remote: RemoteBundle = serde_json::from_value(serde_json::json!({
            "trends": [
                {"topic": "edge inference", "relevance": 0.9},
                {"topic": "wasm tooling", "relevance": 0.6, "source": "feed"},
            ],
            "demands": [{"need": "faster builds", "intensity": 0.7}],
        }))
        .unwrap();

        let bundle = remote.into_intelligence("scan-api");
        assert_eq!(bundle.trends[0].source, "scan-api");
        assert_eq!(bundle.trends[1].source, "feed");
        assert_eq!(bundle.demands.len(), 1);
        assert!(bundle.competitors.is_empty());
    }

    #[test]
    fn http_source_builds_with_auth() {
        let source = HttpIntelligenceSource::new(
            "scan-api",
            "https://intel.example/api/signals",
            Duration::from_secs(5),
        )
        .unwrap()
        .with_auth_token("token-123");
        assert_eq!(source.name(), "scan-api");
    }
}
