use anyhow::Result;
use autodev_context::{Intent, ProjectContext};
use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::actions::AutonomousAction;
use crate::intelligence::{IntelligenceGatherer, MarketIntelligence};
use crate::planner::ActionPlanner;
use crate::telemetry::PlanningTelemetry;

/// Front door for the planning stack: intelligence gathering plus the rule planner.
#[derive(Debug)]
pub struct PlanningRuntime {
    planner: ActionPlanner,
    gatherer: IntelligenceGatherer,
    telemetry: Option<PlanningTelemetry>,
}

impl PlanningRuntime {
    /// Wraps a gatherer with no telemetry attached.
    #[must_use]
    pub const fn new(gatherer: IntelligenceGatherer) -> Self {
        Self {
            planner: ActionPlanner::new(),
            gatherer,
            telemetry: None,
        }
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PlanningTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Default wiring: synthetic intelligence and file telemetry under `logs/planning/`.
    #[must_use]
    pub fn bootstrap() -> Self {
        let telemetry = PlanningTelemetry::builder("planning")
            .log_path("logs/planning/runtime.log.jsonl")
            .build()
            .ok();
        let mut builder = IntelligenceGatherer::builder();
        if let Some(telemetry) = &telemetry {
            builder = builder.telemetry(telemetry.clone());
        }
        let mut runtime = Self::new(builder.build());
        if let Some(telemetry) = telemetry {
            runtime = runtime.with_telemetry(telemetry);
        }
        runtime
    }

    /// Pulls market intelligence for a domain and keyword set.
    pub async fn gather(&self, domain: &str, keywords: &[String]) -> Result<MarketIntelligence> {
        self.gatherer.collect(domain, keywords).await
    }

    /// Runs the trigger rules over one observation.
    #[must_use]
    pub fn plan(
        &self,
        context: &ProjectContext,
        intent: &Intent,
        intelligence: &MarketIntelligence,
    ) -> Vec<AutonomousAction> {
        let actions = self.planner.plan(context, intent, intelligence);
        self.log(
            LogLevel::Info,
            "plan assembled",
            json!({
                "actions": actions.len(),
                "top_priority": actions.first().map(|action| action.priority),
            }),
        );
        self.event(
            "planning.plan.assembled",
            json!({"actions": actions.len()}),
        );
        actions
    }

    /// Gathers intelligence for the intent's domain, then plans with it.
    pub async fn gather_and_plan(
        &self,
        context: &ProjectContext,
        intent: &Intent,
    ) -> Result<Vec<AutonomousAction>> {
        let intelligence = self.gather(&intent.domain, &intent.keywords).await?;
        Ok(self.plan(context, intent, &intelligence))
    }

    /// Gatherer in use.
    #[must_use]
    pub const fn gatherer(&self) -> &IntelligenceGatherer {
        &self.gatherer
    }

    fn log(&self, level: LogLevel, message: &str, fields: Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.log(level, message, &fields);
        }
    }

    fn event(&self, kind: &str, payload: Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.event(kind, payload);
        }
    }
}
