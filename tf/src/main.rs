//! tf - CLI entry point for the orchestration core

use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use graphstore::ProjectStore;
use taskforge::cli::{Cli, Command};
use taskforge::config::Config;
use taskforge::domain::Request;
use taskforge::graph::GraphExport;
use taskforge::llm::create_adapter;
use taskforge::orchestrator::Orchestrator;
use taskforge::scheduler::RunOutcome;

fn setup_logging(cli_level: Option<&str>, config_level: Option<&str>) {
    // Priority: CLI --log-level > config file > RUST_LOG > default (info)
    let level = cli_level.or(config_level);
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref());
    let config = Arc::new(config);

    match cli.command {
        Command::Run { text } => run_project(config, &text.join(" "), true).await,
        Command::Create { text } => run_project(config, &text.join(" "), false).await,
        Command::Status { project_id } => show_status(&config, &project_id),
        Command::Events { project_id, tail } => show_events(&config, &project_id, tail),
    }
}

async fn run_project(config: Arc<Config>, text: &str, execute: bool) -> Result<()> {
    let adapter = create_adapter(&config.llm, config.cache_ttl_seconds)
        .map_err(|e| eyre::eyre!("Failed to build LLM adapter: {}", e))?;
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&config), adapter));

    let project_id = orchestrator.create_project(Request::new(text)).await?;
    println!("project: {}", project_id);

    for warning in orchestrator.project_warnings(&project_id).await? {
        warn!(%warning, "Analyzer warning");
    }

    if !execute {
        let status = orchestrator.get_project_status(&project_id).await?;
        println!(
            "created: {} tasks ready, {} min of critical-path work",
            status.ready_count, status.critical_path_remaining
        );
        return Ok(());
    }

    orchestrator.start_project(&project_id).await?;
    info!(project_id = %project_id, "Run started");

    let outcome = tokio::select! {
        outcome = orchestrator.wait_for_project(&project_id) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupt received, cancelling run");
            orchestrator.cancel_project(&project_id).await?;
            let outcome = orchestrator.wait_for_project(&project_id).await?;
            orchestrator.shutdown().await;
            outcome
        }
    };

    let status = orchestrator.get_project_status(&project_id).await?;
    println!(
        "{}: {} completed, {} failed, {} min of critical-path work remaining",
        status.status, status.completed_count, status.failed_count, status.critical_path_remaining
    );

    match outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Cancelled => {
            std::process::exit(130);
        }
        RunOutcome::Failed { error, message } => {
            eyre::bail!("Run failed ({}): {}", error, message)
        }
    }
}

fn show_status(config: &Config, project_id: &str) -> Result<()> {
    let store = ProjectStore::open(config.project_dir(project_id))
        .wrap_err("Failed to open project state directory")?;
    let Some(export) = store.read_graph::<GraphExport>()? else {
        eyre::bail!("No persisted graph for project {}", project_id);
    };

    let mut counts = std::collections::BTreeMap::new();
    for task in &export.nodes {
        *counts.entry(task.status.to_string()).or_insert(0usize) += 1;
    }

    println!("project: {}", export.project_id);
    println!("tasks: {}", export.nodes.len());
    for (status, count) in counts {
        println!("  {}: {}", status, count);
    }
    println!("invocations: {}", export.invocations_started);
    Ok(())
}

fn show_events(config: &Config, project_id: &str, tail: Option<usize>) -> Result<()> {
    let store = ProjectStore::open(config.project_dir(project_id))
        .wrap_err("Failed to open project state directory")?;
    let events = store.read_events()?;
    let skip = tail.map(|n| events.len().saturating_sub(n)).unwrap_or(0);
    for event in events.iter().skip(skip) {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}
