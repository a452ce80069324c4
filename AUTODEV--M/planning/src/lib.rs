#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Autodev planning stack: trigger-rule action planning and market intelligence.

/// Action vocabulary shared with the execution stack.
#[path = "../actions.rs"]
pub mod actions;

/// Market-intelligence gathering behind an injectable source trait.
#[path = "../intelligence/main.rs"]
pub mod intelligence;

/// Trigger-rule action planner.
#[path = "../planner.rs"]
pub mod planner;

/// Structured logging and bus events for the planning stack.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Runtime entrypoints wiring the planning stack together.
#[path = "../main.rs"]
pub mod orchestration_entry;

pub use actions::{ActionKind, AutonomousAction};
pub use intelligence::config::SourcesDocument;
pub use intelligence::{
    CompetitorSignal, DemandSignal, IntelligenceGatherer, IntelligenceGathererBuilder,
    IntelligenceSource, MarketIntelligence, OpportunitySignal, SignalScreen,
};
pub use orchestration_entry::PlanningRuntime;
pub use planner::{ActionPlanner, EVOLUTION_DUE_DAYS};
pub use telemetry::{PlanningTelemetry, PlanningTelemetryBuilder};
