//! k8s-rca command line
//!
//! One subcommand per investigation operation. Investigations live in the
//! local store, so a session can be continued across invocations.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use k8s_rca::models::{Finding, Hypothesis, NextStep, SessionStage, StepResult};
use k8s_rca::services::agents::AgentKind;
use k8s_rca::services::coordinator::AnalysisSelection;
use k8s_rca::services::investigation::{session::group_findings, TransitionOutcome};
use k8s_rca::AppState;

#[derive(Debug, Parser)]
#[clap(
    name = "k8s-rca",
    version,
    about = "Hypothesis-driven root cause analysis for Kubernetes"
)]
struct Cli {
    /// Configuration file (defaults to ~/.k8s-rca/config.json)
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, env = "RCA_LOG_LEVEL", default_value = "warn", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[clap(long, env = "RCA_LOG_JSON", global = true)]
    log_json: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an investigation
    New {
        #[clap(long)]
        title: String,
        /// Namespace to investigate (defaults to the configured namespace)
        #[clap(long)]
        namespace: Option<String>,
        /// Free-form context: symptoms, recent changes
        #[clap(long)]
        context: Option<String>,
    },
    /// Check that the model provider and the cluster are reachable
    Check,
    /// List investigations, most recent first
    List,
    /// Show one investigation
    Show {
        id: String,
        #[clap(long)]
        json: bool,
    },
    /// Run the analyzers and start the interactive session
    Analyze {
        id: String,
        /// resources, events, logs, metrics, topology or comprehensive
        #[clap(long, default_value = "comprehensive", value_parser = parse_selection)]
        agent: AnalysisSelection,
    },
    /// List findings grouped by component
    Components { id: String },
    /// Select finding N and generate hypotheses for it
    Select { id: String, finding: usize },
    /// List the open hypotheses
    Hypotheses { id: String },
    /// Select hypothesis N and build its investigation plan
    Hypothesis { id: String, index: usize },
    /// Show the plan, results so far and runnable steps
    Steps { id: String },
    /// Execute runnable step N
    Step { id: String, index: usize },
    /// Accept the pending conclusion
    Accept { id: String },
    /// Reject the current hypothesis, or open hypothesis N with --candidate
    Reject {
        id: String,
        #[clap(long)]
        candidate: Option<usize>,
    },
    /// Show the latest conclusion
    Conclusion { id: String },
    /// Return to component selection, keeping history
    Restart { id: String },
    /// Generate the root cause analysis report
    Report {
        id: String,
        /// Also write the report to this file
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Ask the assistant about an investigation
    Ask { id: String, question: String },
    /// Suggest next actions for the current findings
    Suggest { id: String },
    /// Mark an investigation completed
    Complete { id: String },
}

fn parse_selection(value: &str) -> std::result::Result<AnalysisSelection, String> {
    match value.trim().to_lowercase().as_str() {
        "comprehensive" | "all" => Ok(AnalysisSelection::All),
        other => other.parse::<AgentKind>().map(AnalysisSelection::Only),
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .context("Invalid log level")?;
    let filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
    }

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}

/// CLI positions are 1-based
fn position(n: usize, what: &str) -> Result<usize> {
    if n == 0 {
        bail!("{} numbers start at 1", what);
    }
    Ok(n - 1)
}

fn print_outcome(outcome: &TransitionOutcome) {
    println!("Stage: {}", outcome.stage);
    for warning in &outcome.warnings {
        println!("Warning: {}", warning);
    }
}

fn print_hypotheses(hypotheses: &[Hypothesis]) {
    if hypotheses.is_empty() {
        println!("No open hypotheses.");
        return;
    }
    for (i, h) in hypotheses.iter().enumerate() {
        println!("{}. {} (confidence {:.2})", i + 1, h.description, h.confidence);
        for step in &h.investigation_steps {
            println!("     - {}", step);
        }
        if !h.related_components.is_empty() {
            println!("     related: {}", h.related_components.join(", "));
        }
    }
}

fn print_next_steps(steps: &[NextStep]) {
    for (i, step) in steps.iter().enumerate() {
        println!(
            "{}. [{}] {} ({})",
            i + 1,
            step.priority,
            step.description,
            step.action.label()
        );
    }
}

fn print_result(result: &StepResult) {
    println!(
        "Assessment: {} (confidence {:.2})",
        result.analysis.assessment.as_str(),
        result.analysis.confidence
    );
    let keys: Vec<&str> = result.evidence.keys().map(String::as_str).collect();
    if !keys.is_empty() {
        println!("Evidence: {}", keys.join(", "));
    }
    if let Some(conclusion) = result.conclusion() {
        println!("Conclusion: {} (confidence {:.2})", conclusion.text, conclusion.confidence);
    }
}

fn print_findings(findings: &[Finding]) {
    let mut n = 0;
    for group in group_findings(findings) {
        println!("{}:", group.name);
        for finding in &group.findings {
            n += 1;
            println!("  {}. {}", n, finding.summary());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let state = AppState::initialize(cli.config.as_deref())
        .context("Failed to initialize application state")?;

    match cli.command {
        Commands::New {
            title,
            namespace,
            context,
        } => {
            let namespace = namespace.unwrap_or_else(|| state.config().default_namespace.clone());
            let id = state.store().create(&title, &namespace, context)?;
            println!("{}", id);
        }
        Commands::Check => {
            let report = state.check().await;
            let status = |error: &Option<String>| match error {
                Some(e) => format!("FAILED ({})", e),
                None => "ok".to_string(),
            };
            println!("Model ({} {}): {}", report.provider, report.model, status(&report.llm_error));
            println!("Cluster: {}", status(&report.cluster_error));
            if !report.is_healthy() {
                bail!("health check failed");
            }
        }
        Commands::List => {
            for row in state.store().list()? {
                println!(
                    "{}  {:<11}  {:<20}  {}",
                    row.id, row.status.as_str(), row.namespace, row.title
                );
            }
        }
        Commands::Show { id, json } => {
            let investigation = state.store().require(&id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&investigation)?);
            } else {
                println!("{} ({})", investigation.title, investigation.status);
                println!("Namespace: {}", investigation.namespace);
                println!("Stage: {}", investigation.session.stage);
                if let Some(context) = &investigation.context {
                    println!("Context: {}", context);
                }
                for finding in &investigation.accumulated_findings {
                    println!("  {}", finding);
                }
                if !investigation.summary.is_empty() {
                    println!("\n{}", investigation.summary);
                }
            }
        }
        Commands::Analyze { id, agent } => {
            let analysis = state.analyze(&id, agent).await?;
            for report in &analysis.reports {
                println!(
                    "{}: {} findings, {} errors",
                    report.agent,
                    report.findings.len(),
                    report.errors.len()
                );
            }
            for root in &analysis.root_causes {
                println!("Likely root cause: {} [{}]", root.component, root.severity);
            }
            print_findings(&analysis.prioritized_findings());
        }
        Commands::Components { id } => {
            let session = state.session(&id)?;
            print_findings(session.snapshot()?.initial_findings());
        }
        Commands::Select { id, finding } => {
            let session = state.session(&id)?;
            let index = position(finding, "Finding")?;
            let findings = session.numbered_findings()?;
            let finding = findings
                .get(index)
                .with_context(|| format!("No finding #{}", index + 1))?;
            let namespace = state.store().require(&id)?.namespace;
            let outcome = session
                .select_finding(&state.engine(&namespace), finding)
                .await?;
            print_outcome(&outcome);
            print_hypotheses(&session.candidate_hypotheses()?);
        }
        Commands::Hypotheses { id } => {
            print_hypotheses(&state.session(&id)?.candidate_hypotheses()?);
        }
        Commands::Hypothesis { id, index } => {
            let session = state.session(&id)?;
            let namespace = state.store().require(&id)?.namespace;
            let outcome = session
                .select_hypothesis(&state.engine(&namespace), position(index, "Hypothesis")?)
                .await?;
            print_outcome(&outcome);
            print_next_steps(&session.investigation_view()?.next_steps);
        }
        Commands::Steps { id } => {
            let view = state.session(&id)?.investigation_view()?;
            println!("{}: {}", view.component, view.finding.issue);
            println!("Hypothesis: {}", view.hypothesis.description);
            for (i, result) in view.results.iter().enumerate() {
                println!("\nResult {}: {}", i + 1, result.step.description);
                print_result(result);
            }
            println!();
            print_next_steps(&view.next_steps);
            if view.pending_conclusion.is_some() {
                println!("\nA conclusion is pending; run `accept` to confirm it.");
            }
        }
        Commands::Step { id, index } => {
            let session = state.session(&id)?;
            let namespace = state.store().require(&id)?.namespace;
            let (result, outcome) = session
                .execute_step(&state.engine(&namespace), position(index, "Step")?)
                .await?;
            print_result(&result);
            print_outcome(&outcome);
            if outcome.stage == SessionStage::Investigation {
                print_next_steps(&session.investigation_view()?.next_steps);
            }
        }
        Commands::Accept { id } => {
            let outcome = state.session(&id)?.accept_conclusion(state.evidence_log())?;
            print_outcome(&outcome);
        }
        Commands::Reject { id, candidate } => {
            let session = state.session(&id)?;
            let outcome = match candidate {
                Some(n) => session.reject_candidate(position(n, "Hypothesis")?)?,
                None => session.reject_hypothesis()?,
            };
            print_outcome(&outcome);
            if outcome.stage == SessionStage::HypothesisGeneration {
                print_hypotheses(&session.candidate_hypotheses()?);
            }
        }
        Commands::Conclusion { id } => match state.session(&id)?.conclusion_view()? {
            Some(view) => {
                println!("{}: {}", view.component, view.hypothesis.description);
                println!(
                    "{} (confidence {:.2}, {})",
                    view.conclusion.text,
                    view.conclusion.confidence,
                    if view.conclusion.confirmed {
                        "confirmed"
                    } else {
                        "unconfirmed"
                    }
                );
                for rec in &view.conclusion.recommendations {
                    println!("  - {}", rec);
                }
            }
            None => println!("No conclusion yet."),
        },
        Commands::Restart { id } => {
            print_outcome(&state.session(&id)?.restart()?);
        }
        Commands::Report { id, output } => {
            let namespace = state.store().require(&id)?.namespace;
            let report = state
                .session(&id)?
                .generate_report(&state.engine(&namespace))
                .await?;
            if let Some(path) = output {
                std::fs::write(&path, &report)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            println!("{}", report);
        }
        Commands::Ask { id, question } => {
            let namespace = state.store().require(&id)?.namespace;
            let reply = state.assistant(&namespace).ask(&id, &question).await?;
            println!("{}", reply);
        }
        Commands::Suggest { id } => {
            let investigation = state.store().require(&id)?;
            let findings = investigation.session.initial_findings().to_vec();
            let suggestions = state
                .assistant(&investigation.namespace)
                .suggest_next_actions(&id, &findings)
                .await?;
            for (i, s) in suggestions.iter().enumerate() {
                println!("{}. [{}] {}", i + 1, s.priority, s.text);
                if !s.reasoning.is_empty() {
                    println!("     {}", s.reasoning);
                }
            }
        }
        Commands::Complete { id } => {
            state.store().mark_completed(&id)?;
            println!("Investigation {} completed", id);
        }
    }

    Ok(())
}
