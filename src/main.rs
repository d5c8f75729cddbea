//! Lumen CLI - run, validate and resume workflow documents

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use rustc_hash::FxHashMap;
use serde_json::Value;

use lumen::ast::load_document;
use lumen::checkpoint::CheckpointStore;
use lumen::config::LumenConfig;
use lumen::error::{FixSuggestion, LumenError};
use lumen::provider::create_provider;
use lumen::runtime::{Orchestrator, RunControl, RunOutcome, RunSettings, RunStatus};
use lumen::tools::ToolRegistry;
use lumen::validation::Validator;

#[derive(Parser)]
#[command(name = "lumen")]
#[command(about = "Lumen - checkpointed, resumable runner for prompt workflows")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file
    Run {
        /// Path to .lumen.md file
        file: PathBuf,

        /// Workflow input, repeatable (name=value; JSON values are parsed)
        #[arg(short, long = "input", value_name = "NAME=VALUE")]
        inputs: Vec<String>,

        /// Override the run id (default: <name>-<timestamp>)
        #[arg(long)]
        id: Option<String>,

        /// Override default provider (claude, mock)
        #[arg(short, long)]
        provider: Option<String>,

        /// Override default model
        #[arg(short, long)]
        model: Option<String>,

        /// Run without writing checkpoints
        #[arg(long)]
        no_checkpoint: bool,
    },

    /// Validate a workflow file (no engine calls)
    Validate {
        /// Path to .lumen.md file
        file: PathBuf,
    },

    /// Resume a checkpointed run
    Resume {
        /// Workflow id of the run
        id: String,

        /// Workflow file (default: the path recorded in the checkpoint)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Resume despite drift, or restart over a corrupted checkpoint
        #[arg(long)]
        force: bool,

        /// Override default provider (claude, mock)
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Manage checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List checkpoints, newest first
    List {
        /// Show only last N checkpoints
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show details of a checkpoint
    Show {
        /// Workflow id
        id: String,
    },

    /// Delete terminal checkpoints and backups older than the retention window
    Clean {
        /// Retention in days (default: checkpoint.retention_days)
        #[arg(short, long)]
        days: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match load_config() {
        Ok(config) => match cli.command {
            Commands::Run {
                file,
                inputs,
                id,
                provider,
                model,
                no_checkpoint,
            } => run_workflow(config, &file, &inputs, id, provider, model, no_checkpoint).await,
            Commands::Validate { file } => validate_workflow(&config, &file).await,
            Commands::Resume {
                id,
                file,
                force,
                provider,
            } => resume_workflow(config, &id, file, force, provider).await,
            Commands::Checkpoints { action } => handle_checkpoint_command(&config, action).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        let suggestion = e.fix_suggestion().map(str::to_string);
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = suggestion {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        tracing::debug!("{:?}", miette::Report::new(e));
        std::process::exit(1);
    }
}

fn load_config() -> Result<LumenConfig, LumenError> {
    Ok(LumenConfig::load()?.with_env())
}

/// `name=value`; the value is JSON when it parses, else a string
fn parse_inputs(raw: &[String]) -> Result<FxHashMap<String, Value>, LumenError> {
    raw.iter()
        .map(|pair| {
            let (name, value) = pair.split_once('=').ok_or_else(|| LumenError::InvalidParameter {
                name: pair.clone(),
                reason: "expected NAME=VALUE".to_string(),
            })?;
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
            Ok((name.trim().to_string(), value))
        })
        .collect()
}

fn orchestrator(config: &LumenConfig, provider_override: Option<String>, checkpoints: bool) -> Result<Orchestrator, LumenError> {
    let provider_name = provider_override.unwrap_or_else(|| config.provider_name().to_string());
    let provider = create_provider(&provider_name, config)?;

    println!(
        "{} Using provider: {} | model: {}",
        "→".cyan(),
        provider.name().cyan().bold(),
        config.provider.model.as_deref().unwrap_or("(document)").cyan()
    );

    let control = RunControl::new();
    let on_signal = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} cancelling, writing a final checkpoint...", "⏸".yellow());
            on_signal.cancel();
        }
    });

    let mut orchestrator = Orchestrator::new(provider)
        .with_tools(ToolRegistry::new())
        .with_settings(RunSettings::from_config(config))
        .with_control(control);
    if checkpoints {
        orchestrator = orchestrator.with_store(CheckpointStore::from_config(config));
    }
    Ok(orchestrator)
}

async fn run_workflow(
    mut config: LumenConfig,
    file: &Path,
    raw_inputs: &[String],
    id: Option<String>,
    provider_override: Option<String>,
    model_override: Option<String>,
    no_checkpoint: bool,
) -> Result<(), LumenError> {
    let doc = load_document(file).await?;
    let inputs = parse_inputs(raw_inputs)?;
    if model_override.is_some() {
        config.provider.model = model_override;
    }

    let orchestrator = orchestrator(&config, provider_override, !no_checkpoint)?;
    let id = id.unwrap_or_else(|| Orchestrator::new_run_id(&doc));
    println!("{} Running '{}' as {}", "→".cyan(), doc.name.bold(), id.cyan());

    let outcome = orchestrator.run_with_id(&id, &doc, &inputs).await?;
    print_outcome(&outcome);
    Ok(())
}

async fn resume_workflow(
    config: LumenConfig,
    id: &str,
    file: Option<PathBuf>,
    force: bool,
    provider_override: Option<String>,
) -> Result<(), LumenError> {
    let store = CheckpointStore::from_config(&config);
    let file = match file {
        Some(file) => file,
        None => store
            .load(id)
            .await?
            .and_then(|state| state.source_path)
            .ok_or_else(|| LumenError::CheckpointNotFound {
                workflow: id.to_string(),
            })?,
    };

    let doc = load_document(&file).await?;
    let orchestrator = orchestrator(&config, provider_override, true)?;
    println!("{} Resuming {} from {}", "→".cyan(), id.cyan(), file.display());

    let outcome = orchestrator.resume(id, &doc, force).await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome.status {
        RunStatus::Completed => println!(
            "{} {} completed in {} turn(s), {} tokens",
            "✓".green(),
            outcome.workflow_id,
            outcome.turns,
            outcome.usage.total_tokens()
        ),
        RunStatus::Cancelled => println!(
            "{} {} cancelled; resume with `lumen resume {}`",
            "⏸".yellow(),
            outcome.workflow_id,
            outcome.workflow_id
        ),
        other => println!("{} {} ended as {}", "✗".red(), outcome.workflow_id, other),
    }

    let outputs = outcome.outputs();
    if !outputs.is_empty() {
        println!("{}", "Variables:".cyan().bold());
        for (name, value) in outputs {
            println!("  {} = {}", name, value);
        }
    }
    if let Some(output) = &outcome.output {
        println!("{}", "Output:".cyan().bold());
        println!("{}", output);
    }
}

async fn validate_workflow(config: &LumenConfig, file: &Path) -> Result<(), LumenError> {
    let doc = load_document(file).await?;
    let report = Validator::new()
        .with_known_tools(config.known_tools.iter().cloned())
        .validate(&doc);

    for warning in &report.warnings {
        println!("{} {}", "⚠".yellow(), warning);
        if let Some(fix) = warning.suggestion() {
            println!("    {}", fix.dimmed());
        }
    }
    for error in &report.errors {
        println!("{} {}", "✗".red(), error);
    }
    let report = report.into_result()?;

    println!("{} Workflow '{}' is valid", "✓".green(), file.display());
    println!("  Name: {}", doc.name);
    println!("  Model: {}", if doc.model.is_empty() { "(default)" } else { &doc.model });
    println!("  Parameters: {}", doc.declared_parameters().len());
    println!("  Tools: {}", doc.tools.len());
    println!("  Sub-workflows: {}", doc.invocations.len());
    for default in &report.defaults {
        println!("  Default {} = {}", default.name, default.value);
    }

    Ok(())
}

async fn handle_checkpoint_command(config: &LumenConfig, action: CheckpointAction) -> Result<(), LumenError> {
    let store = CheckpointStore::from_config(config);

    match action {
        CheckpointAction::List { limit } => {
            let mut checkpoints = store.list().await?;
            checkpoints.sort_by(|a, b| b.modified.cmp(&a.modified));
            if let Some(n) = limit {
                checkpoints.truncate(n);
            }

            println!("Found {} checkpoints in {}:\n", checkpoints.len(), store.dir().display());
            println!("{:<40} {:>12} {:>8} {:>20}", "WORKFLOW ID", "STATUS", "STEP", "MODIFIED");
            println!("{}", "-".repeat(83));

            for summary in checkpoints {
                let status = match (summary.archived, summary.status) {
                    (true, _) => "archived".to_string(),
                    (false, Some(status)) => status.to_string(),
                    (false, None) => "corrupted".to_string(),
                };
                let step = summary
                    .step
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<40} {:>12} {:>8} {:>20}",
                    summary.workflow_id,
                    status,
                    step,
                    summary.modified.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }

        CheckpointAction::Show { id } => {
            let state = store
                .load(&id)
                .await?
                .ok_or_else(|| LumenError::CheckpointNotFound { workflow: id.clone() })?;

            println!("Checkpoint: {}", state.workflow_id.bold());
            println!("  Workflow: {}", state.workflow_name);
            if let Some(path) = &state.source_path {
                println!("  File: {}", path.display());
            }
            println!("  Status: {}", state.status);
            println!("  Model: {}", state.model);
            println!("  Step: {} | Turns: {}", state.step, state.turns);
            println!("  Started: {}", state.started_at.format("%Y-%m-%d %H:%M:%S"));

            if !state.evolution.variables.is_empty() {
                println!("\n{}", "Variables:".cyan().bold());
                for (name, value) in &state.evolution.variables {
                    println!("  {} = {}", name, value);
                }
            }
            if !state.completed_tools.is_empty() {
                println!("\n{}", "Tool calls:".cyan().bold());
                for tool in &state.completed_tools {
                    let mark = if tool.success { "✓".green() } else { "✗".red() };
                    println!("  {} {} ({})", mark, tool.name, tool.call_id);
                }
            }
            if !state.evolution.insights.is_empty() {
                println!("\n{}", "Insights:".cyan().bold());
                for insight in &state.evolution.insights {
                    println!("  • {}", insight);
                }
            }
            Ok(())
        }

        CheckpointAction::Clean { days } => {
            let days = days.unwrap_or(config.checkpoint.retention_days);
            let removed = store.sweep(days).await?;
            for path in &removed {
                println!("  {} {}", "removed".dimmed(), path.display());
            }
            println!("Deleted {} checkpoint file(s) older than {} day(s)", removed.len(), days);
            Ok(())
        }
    }
}
