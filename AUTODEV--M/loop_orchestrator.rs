use std::io::{self, Write};

use anyhow::{Context, Result};
use autodev_context::{
    ContextRuntime, FeedbackData, FeedbackKind, FeedbackPriority, FeedbackSource, RecentSignals,
};
use autodev_evolution::{CycleOutcome, EvolutionRuntime, SchedulerHandle, SourceWatcher};
use autodev_execution::{ExecutionRuntime, SelectionHints};
use autodev_planning::{AutonomousAction, MarketIntelligence, PlanningRuntime};
use chrono::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// High-level REPL driving the context, planning, execution, and evolution
/// runtimes as one loop.
struct LoopOrchestrator {
    context: ContextRuntime,
    planning: PlanningRuntime,
    execution: ExecutionRuntime,
    evolution: EvolutionRuntime,
    last_plan: Vec<AutonomousAction>,
    last_request: String,
    background: SchedulerHandle,
    _watcher: Option<SourceWatcher>,
}

impl LoopOrchestrator {
    /// Bootstraps every runtime with file telemetry and starts the
    /// background timers plus the source watcher.
    fn bootstrap() -> Self {
        let evolution = EvolutionRuntime::bootstrap(".");
        let background = evolution.spawn_background();
        let watcher = match evolution.watch_sources(".") {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                eprintln!("source watcher unavailable: {err:#}");
                None
            }
        };
        Self {
            context: ContextRuntime::bootstrap("."),
            planning: PlanningRuntime::bootstrap(),
            execution: ExecutionRuntime::bootstrap(),
            evolution,
            last_plan: Vec::new(),
            last_request: String::new(),
            background,
            _watcher: watcher,
        }
    }

    async fn run(&mut self) -> Result<()> {
        println!("Loop orchestrator ready. Type 'help' for options.");
        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin).lines();
        loop {
            print!("autodev> ");
            io::stdout().flush()?;
            let line = match reader.next_line().await? {
                Some(line) => line.trim().to_string(),
                None => break,
            };
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, ' ');
            let command = parts.next().unwrap_or("");
            let args = parts.next().unwrap_or("").trim();
            match command {
                "classify" => self.handle_classify(args),
                "snapshot" => self.handle_snapshot().await,
                "plan" => self.handle_plan(args).await,
                "execute" => self.handle_execute().await,
                "feedback" => self.handle_feedback(args).await?,
                "cycle" => self.handle_cycle(args).await?,
                "models" => self.handle_models(),
                "history" => self.handle_history(),
                "status" => self.print_status(),
                "help" => Self::print_help(),
                "exit" | "quit" => break,
                other => println!("Unknown command: {other}. Type 'help' for usage."),
            }
        }
        Ok(())
    }

    fn handle_classify(&self, args: &str) {
        if args.is_empty() {
            println!("Usage: classify <request>");
            return;
        }
        let intent = self.context.classify(args);
        println!(
            "Intent: {} (domain {}, urgency {}, scope {})",
            intent.category, intent.domain, intent.urgency, intent.scope
        );
        if !intent.keywords.is_empty() {
            println!("Keywords: {}", intent.keywords.join(", "));
        }
    }

    async fn handle_snapshot(&self) {
        let snapshot = self.context.capture(self.signals()).await;
        println!(
            "Snapshot: constitution={} specification={} plan={} tasks={} implementation={} quality={}",
            snapshot.has_constitution,
            snapshot.has_specification,
            snapshot.has_plan,
            snapshot.has_tasks,
            snapshot.has_implementation,
            snapshot.code_quality
        );
        println!(
            "Signals: {} feedback, {} trends, {} bugs, {} metrics.",
            snapshot.feedback.len(),
            snapshot.trends.len(),
            snapshot.bugs.len(),
            snapshot.metrics.len()
        );
    }

    async fn handle_plan(&mut self, args: &str) {
        let request = if args.is_empty() {
            "improve performance across the project"
        } else {
            args
        };
        let intent = self.context.classify(request);
        let snapshot = self.context.capture(self.signals()).await;
        let intelligence = match self.planning.gather(&intent.domain, &intent.keywords).await {
            Ok(intelligence) => intelligence,
            Err(err) => {
                println!("Intelligence unavailable ({err:#}); planning without it.");
                MarketIntelligence::new()
            }
        };
        let actions = self.planning.plan(&snapshot, &intent, &intelligence);
        if actions.is_empty() {
            println!("Nothing to plan; the project is in maintenance shape.");
        } else {
            println!("Plan with {} actions:", actions.len());
            for action in &actions {
                println!(
                    "  [{}] {} - {}",
                    action.priority, action.command, action.justification
                );
            }
        }
        self.last_plan = actions;
        self.last_request = request.to_string();
    }

    async fn handle_execute(&self) {
        if self.last_plan.is_empty() {
            println!("No plan available. Run `plan <request>` first.");
            return;
        }
        let hints = SelectionHints::new(true);
        let report = self
            .execution
            .execute(&self.last_plan, &self.last_request, &hints)
            .await;
        println!(
            "Execution {}: {}/{} steps succeeded (rate {:.2}).",
            report.execution.id,
            report.execution.successful_steps,
            report.execution.total_steps,
            report.execution.success_rate
        );
        for step in report.execution.steps.iter().filter(|step| !step.success) {
            println!(
                "  failed: {} ({})",
                step.command,
                step.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    async fn handle_feedback(&self, args: &str) -> Result<()> {
        let mut parts = args.splitn(3, ' ');
        let fields = (parts.next(), parts.next(), parts.next());
        let (Some(kind), Some(priority), Some(content)) = fields else {
            Self::print_feedback_help();
            return Ok(());
        };
        let (Some(kind), Some(priority)) = (parse_kind(kind), parse_priority(priority)) else {
            Self::print_feedback_help();
            return Ok(());
        };
        let item = FeedbackData::new(FeedbackSource::User, kind, priority, content);
        let response = self
            .evolution
            .ingest(item)
            .await
            .context("feedback ingestion failed")?;
        println!(
            "Response: {} (confidence {:.2}{}).",
            response.label,
            response.confidence,
            if response.evolution_requested {
                ", evolution requested"
            } else {
                ""
            }
        );
        Ok(())
    }

    async fn handle_cycle(&self, args: &str) -> Result<()> {
        let reason = if args.is_empty() {
            "operator requested a cycle"
        } else {
            args
        };
        let outcome = self
            .evolution
            .run_cycle_now(reason)
            .await
            .context("evolution cycle failed")?;
        match outcome {
            CycleOutcome::Completed(cycle) => {
                println!(
                    "Cycle {} {}: {} metrics improved across {} steps.",
                    cycle.id,
                    if cycle.success { "succeeded" } else { "fell short" },
                    cycle.improved_metrics,
                    cycle.action_log.len()
                );
                for learning in &cycle.learnings {
                    println!("  learned: {learning}");
                }
            }
            CycleOutcome::Skipped => println!("A cycle is already running; request dropped."),
        }
        Ok(())
    }

    fn handle_models(&self) {
        let models = self.evolution.learning_models();
        if models.is_empty() {
            println!("No learning models yet. Ingest feedback first.");
            return;
        }
        for model in models {
            println!(
                "  {} - confidence {:.2}, success rate {:.2}, {} observations",
                model.pattern, model.confidence, model.success_rate, model.observations
            );
        }
    }

    fn handle_history(&self) {
        let cycles = self.evolution.cycles();
        if cycles.is_empty() {
            println!("No cycles yet. Run `cycle` or ingest critical feedback.");
            return;
        }
        for cycle in cycles {
            println!(
                "  {} - {} - {} ({} metrics improved)",
                cycle.id,
                cycle.trigger,
                if cycle.success { "success" } else { "fell short" },
                cycle.improved_metrics
            );
        }
    }

    fn print_status(&self) {
        println!(
            "Status:\n  State: {}\n  Feedback items: {}\n  Cycles: {}\n  Learning models: {}\n  Background tasks: {}\n  Logs in ./logs",
            self.evolution.state(),
            self.evolution.feedback().len(),
            self.evolution.cycles().len(),
            self.evolution.learning_models().len(),
            self.background.task_count()
        );
    }

    fn signals(&self) -> RecentSignals {
        let mut signals = RecentSignals::new();
        signals.feedback = self.evolution.feedback().recent(Duration::hours(24));
        signals.last_evolution = self
            .evolution
            .cycles()
            .last()
            .map(|cycle| cycle.completed_at);
        signals
    }

    fn print_help() {
        println!(
            "Commands:
  classify <request>  - Classify a request into an intent
  snapshot            - Capture the current project context
  plan [request]      - Plan autonomous actions for a request
  execute             - Execute the last plan
  feedback <kind> <priority> <text> - Ingest a feedback item
  cycle [reason]      - Run an evolution cycle now
  models              - Show learning models
  history             - Show completed evolution cycles
  status              - Print orchestrator state
  help                - Show this message
  exit                - Quit orchestrator"
        );
    }

    fn print_feedback_help() {
        println!("Usage: feedback <kind> <priority> <text>");
        println!("Kinds: success failure improvement bug feature_request performance_issue");
        println!("Priorities: low medium high critical");
    }
}

fn parse_kind(label: &str) -> Option<FeedbackKind> {
    match label {
        "success" => Some(FeedbackKind::Success),
        "failure" => Some(FeedbackKind::Failure),
        "improvement" => Some(FeedbackKind::Improvement),
        "bug" => Some(FeedbackKind::Bug),
        "feature_request" => Some(FeedbackKind::FeatureRequest),
        "performance_issue" => Some(FeedbackKind::PerformanceIssue),
        _ => None,
    }
}

fn parse_priority(label: &str) -> Option<FeedbackPriority> {
    match label {
        "low" => Some(FeedbackPriority::Low),
        "medium" => Some(FeedbackPriority::Medium),
        "high" => Some(FeedbackPriority::High),
        "critical" => Some(FeedbackPriority::Critical),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut orchestrator = LoopOrchestrator::bootstrap();
    orchestrator.run().await
}
