use std::fmt;

use autodev_planning::{ActionKind, AutonomousAction};
use serde::{Deserialize, Serialize};

/// Where a step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionEnvironment {
    /// Command backend only.
    Terminal,
    /// Automation backend only.
    Browser,
    /// Terminal action bracketed by automation checkpoints.
    Hybrid,
}

impl fmt::Display for ExecutionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Terminal => "terminal",
            Self::Browser => "browser",
            Self::Hybrid => "hybrid",
        };
        f.write_str(label)
    }
}

/// One environment assignment; never edited after creation. A failed attempt
/// walks `fallbacks` instead of rewriting the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDecision {
    /// Command identifier of the assigned action.
    pub action_command: String,
    /// Assigned environment.
    pub environment: ExecutionEnvironment,
    /// Assignment confidence in [0, 1].
    pub confidence: f64,
    /// Why this environment was chosen.
    pub reasoning: String,
    /// Environments to try on failure; terminal is always the last resort.
    pub fallbacks: Vec<ExecutionEnvironment>,
}

/// Caller-side signals the selector folds into its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionHints {
    /// Environment the caller demands; honored unmodified.
    pub explicit: Option<ExecutionEnvironment>,
    /// Whether an automation backend is wired in.
    pub automation_available: bool,
    /// Whether unexplored research findings are waiting.
    pub pending_research: bool,
    /// Whether a recent checkpoint comparison exists.
    pub recent_visual_analysis: bool,
    /// Automation steps already queued for this plan.
    pub queued_automation_steps: usize,
}

impl SelectionHints {
    /// Hints with every signal off except automation availability.
    #[must_use]
    pub const fn new(automation_available: bool) -> Self {
        Self {
            explicit: None,
            automation_available,
            pending_research: false,
            recent_visual_analysis: false,
            queued_automation_steps: 0,
        }
    }

    /// Demands a specific environment.
    #[must_use]
    pub const fn with_explicit(mut self, environment: ExecutionEnvironment) -> Self {
        self.explicit = Some(environment);
        self
    }

    /// Marks unexplored research findings.
    #[must_use]
    pub const fn with_pending_research(mut self) -> Self {
        self.pending_research = true;
        self
    }

    /// Marks a recent checkpoint comparison.
    #[must_use]
    pub const fn with_recent_visual_analysis(mut self) -> Self {
        self.recent_visual_analysis = true;
        self
    }

    /// Sets the queued automation step count.
    #[must_use]
    pub const fn with_queued_automation_steps(mut self, steps: usize) -> Self {
        self.queued_automation_steps = steps;
        self
    }
}

impl Default for SelectionHints {
    fn default() -> Self {
        Self::new(false)
    }
}

const WEB_INDICATORS: &[&str] = &[
    "browser",
    "click",
    "form",
    "navigate",
    "page",
    "screenshot",
    "ui",
    "visual",
    "web",
];

const TERMINAL_INDICATORS: &[&str] = &[
    "build",
    "command",
    "compile",
    "deploy",
    "file",
    "git",
    "install",
    "script",
    "test",
];

// Hit margins at or under this stay hybrid rather than committing to one side.
const BALANCE_MARGIN: usize = 2;

const BASE_CONFIDENCE: f64 = 0.55;
const CONFIDENCE_PER_HIT: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.95;
const BALANCED_CONFIDENCE: f64 = 0.6;
const HEURISTIC_CONFIDENCE: f64 = 0.75;
const DEGRADED_CONFIDENCE: f64 = 0.5;

/// Indicator-count environment selector with per-category heuristics.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvironmentSelector;

impl EnvironmentSelector {
    /// Stateless selector handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Assigns an environment for one action given the triggering text.
    #[must_use]
    pub fn decide(
        &self,
        action: &AutonomousAction,
        request: &str,
        hints: &SelectionHints,
    ) -> EnvironmentDecision {
        if let Some(environment) = hints.explicit {
            return EnvironmentDecision {
                action_command: action.command.clone(),
                environment,
                confidence: 1.0,
                reasoning: format!("{environment} explicitly requested"),
                fallbacks: fallback_chain(environment),
            };
        }
        if let Some(decision) = category_heuristic(action, hints) {
            return decision;
        }

        let folded = request.to_lowercase();
        let web = hit_count(&folded, WEB_INDICATORS);
        let terminal = hit_count(&folded, TERMINAL_INDICATORS);

        let (environment, confidence, reasoning) = if web > terminal {
            let margin = web - terminal;
            if !hints.automation_available {
                (
                    ExecutionEnvironment::Terminal,
                    DEGRADED_CONFIDENCE,
                    format!("web indicators lead {web}:{terminal} but no automation backend is wired"),
                )
            } else if margin <= BALANCE_MARGIN {
                (
                    ExecutionEnvironment::Hybrid,
                    scaled_confidence(margin),
                    format!("web indicators lead terminal {web}:{terminal} inside the balance margin"),
                )
            } else {
                (
                    ExecutionEnvironment::Browser,
                    scaled_confidence(margin),
                    format!("web indicators outnumber terminal {web}:{terminal}"),
                )
            }
        } else if terminal > web {
            let margin = terminal - web;
            if margin <= BALANCE_MARGIN && hints.automation_available {
                (
                    ExecutionEnvironment::Hybrid,
                    scaled_confidence(margin),
                    format!("terminal indicators lead web {terminal}:{web} inside the balance margin"),
                )
            } else {
                (
                    ExecutionEnvironment::Terminal,
                    scaled_confidence(margin),
                    format!("terminal indicators outnumber web {terminal}:{web}"),
                )
            }
        } else if hints.automation_available {
            (
                ExecutionEnvironment::Hybrid,
                BALANCED_CONFIDENCE,
                format!("indicators balanced at {web}:{terminal}"),
            )
        } else {
            (
                ExecutionEnvironment::Terminal,
                BALANCED_CONFIDENCE,
                "indicators balanced and no automation backend is wired".to_owned(),
            )
        };

        EnvironmentDecision {
            action_command: action.command.clone(),
            environment,
            confidence,
            reasoning,
            fallbacks: fallback_chain(environment),
        }
    }
}

// Fixed per-category preferences that outrank the indicator counts.
fn category_heuristic(
    action: &AutonomousAction,
    hints: &SelectionHints,
) -> Option<EnvironmentDecision> {
    if !hints.automation_available {
        return None;
    }
    let reasoning = match action.kind {
        ActionKind::Foundation | ActionKind::Specification | ActionKind::SpecificationUpdate
            if hints.pending_research =>
        {
            format!("pending research steers {} to hybrid", action.command)
        }
        ActionKind::Optimization | ActionKind::ScheduledOptimization
            if hints.recent_visual_analysis =>
        {
            format!("recent visual analysis steers {} to hybrid", action.command)
        }
        ActionKind::Implementation if hints.queued_automation_steps > 0 => format!(
            "{} queued automation steps steer {} to hybrid",
            hints.queued_automation_steps, action.command
        ),
        _ => return None,
    };
    Some(EnvironmentDecision {
        action_command: action.command.clone(),
        environment: ExecutionEnvironment::Hybrid,
        confidence: HEURISTIC_CONFIDENCE,
        reasoning,
        fallbacks: fallback_chain(ExecutionEnvironment::Hybrid),
    })
}

fn hit_count(folded: &str, indicators: &[&str]) -> usize {
    folded
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| indicators.contains(token))
        .count()
}

fn scaled_confidence(margin: usize) -> f64 {
    let scaled = CONFIDENCE_PER_HIT.mul_add(margin as f64, BASE_CONFIDENCE);
    scaled.min(MAX_CONFIDENCE)
}

fn fallback_chain(environment: ExecutionEnvironment) -> Vec<ExecutionEnvironment> {
    match environment {
        ExecutionEnvironment::Browser => vec![
            ExecutionEnvironment::Hybrid,
            ExecutionEnvironment::Terminal,
        ],
        ExecutionEnvironment::Hybrid | ExecutionEnvironment::Terminal => {
            vec![ExecutionEnvironment::Terminal]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action() -> AutonomousAction {
        action_of(ActionKind::TaskBreakdown)
    }

    fn action_of(kind: ActionKind) -> AutonomousAction {
        AutonomousAction::for_kind(kind, "queued for this run", "environment decided")
    }

    fn decide(request: &str, hints: &SelectionHints) -> EnvironmentDecision {
        EnvironmentSelector::new().decide(&action(), request, hints)
    }

    #[test]
    fn explicit_requests_are_honored_unmodified() {
        let hints = SelectionHints::new(false).with_explicit(ExecutionEnvironment::Browser);
        let decision = decide("deploy the build", &hints);
        assert_eq!(decision.environment, ExecutionEnvironment::Browser);
        assert!((decision.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clear_web_margin_assigns_browser() {
        let decision = decide(
            "click the page form in the browser ui and grab a screenshot",
            &SelectionHints::new(true),
        );
        assert_eq!(decision.environment, ExecutionEnvironment::Browser);
        assert!((decision.confidence - 0.95).abs() < f64::EPSILON);
        assert_eq!(
            decision.fallbacks,
            vec![ExecutionEnvironment::Hybrid, ExecutionEnvironment::Terminal]
        );
    }

    #[test]
    fn narrow_web_margin_stays_hybrid() {
        let decision = decide("click the page during the build", &SelectionHints::new(true));
        assert_eq!(decision.environment, ExecutionEnvironment::Hybrid);
        assert!((decision.confidence - 0.65).abs() < 1e-9);
    }

    #[test]
    fn clear_terminal_margin_assigns_terminal() {
        let decision = decide(
            "run the build script then deploy and test",
            &SelectionHints::new(true),
        );
        assert_eq!(decision.environment, ExecutionEnvironment::Terminal);
        assert_eq!(decision.fallbacks, vec![ExecutionEnvironment::Terminal]);
    }

    #[test]
    fn web_lead_without_automation_degrades_to_terminal() {
        let decision = decide(
            "click the page form in the browser ui and grab a screenshot",
            &SelectionHints::new(false),
        );
        assert_eq!(decision.environment, ExecutionEnvironment::Terminal);
        assert!(decision.reasoning.contains("no automation backend"));
        assert_eq!(
            decision.fallbacks.last(),
            Some(&ExecutionEnvironment::Terminal)
        );
    }

    #[test]
    fn balanced_indicators_prefer_hybrid_when_automation_exists() {
        let with_automation = decide("click the build", &SelectionHints::new(true));
        assert_eq!(with_automation.environment, ExecutionEnvironment::Hybrid);

        let without = decide("click the build", &SelectionHints::new(false));
        assert_eq!(without.environment, ExecutionEnvironment::Terminal);
    }

    #[test]
    fn optimization_with_visual_history_steers_hybrid() {
        let hints = SelectionHints::new(true).with_recent_visual_analysis();
        let decision = EnvironmentSelector::new().decide(
            &action_of(ActionKind::Optimization),
            "run the build script then deploy and test",
            &hints,
        );
        assert_eq!(decision.environment, ExecutionEnvironment::Hybrid);
        assert!((decision.confidence - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn implementation_with_queued_steps_steers_hybrid() {
        let hints = SelectionHints::new(true).with_queued_automation_steps(3);
        let decision = EnvironmentSelector::new().decide(
            &action_of(ActionKind::Implementation),
            "implement the parser",
            &hints,
        );
        assert_eq!(decision.environment, ExecutionEnvironment::Hybrid);
        assert!(decision.reasoning.contains("queued automation steps"));
    }

    #[test]
    fn heuristics_require_an_automation_backend() {
        let hints = SelectionHints::new(false).with_recent_visual_analysis();
        let decision = EnvironmentSelector::new().decide(
            &action_of(ActionKind::Optimization),
            "tighten the hot path",
            &hints,
        );
        assert_eq!(decision.environment, ExecutionEnvironment::Terminal);
    }
}
