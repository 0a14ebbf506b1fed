//! `aorctl` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — validate a DAG definition JSON file.
//! - `run`      — execute a DAG in-process with simulated workers.
//! - `config`   — print the effective configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use api::{ControlPlane, SubmitRequest};
use clap::{Parser, Subcommand};
use cli::{AppConfig, Worker};
use engine::{DagDefinition, FailurePolicy};
use nodes::simulated::SimulatedExecutor;
use nodes::{ExecutorSet, NodeKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "aorctl",
    about = "Agent orchestration runtime control tool",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "AOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a DAG definition JSON file and print its execution order.
    Validate {
        /// Path to the DAG JSON file.
        path: PathBuf,
    },
    /// Register a DAG, run it to completion with simulated workers and print
    /// the final run as JSON.
    Run {
        /// Path to the DAG JSON file.
        path: PathBuf,
        /// Spec name; defaults to the file stem.
        #[arg(long)]
        name: Option<String>,
        /// Budget in cents.
        #[arg(long)]
        budget: Option<i64>,
        /// Let independent branches continue after a step fails.
        #[arg(long)]
        tolerant: bool,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// JSON input handed to every step.
        #[arg(long)]
        input: Option<String>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Validate { path } => {
            let dag = read_dag(&path)?;
            let checked = engine::validate_dag(&dag.nodes).and_then(|order| {
                config.orchestrator.check_node_timeouts(&dag.nodes)?;
                Ok(order)
            });
            match checked {
                Ok(order) => {
                    println!("Workflow is valid. Execution order: {order:?}");
                }
                Err(e) => {
                    eprintln!("Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Run {
            path,
            name,
            budget,
            tolerant,
            tags,
            input,
        } => {
            let dag = read_dag(&path)?;
            let name = name
                .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "workflow".to_owned());
            let input = match input {
                Some(raw) => serde_json::from_str(&raw).context("--input is not valid JSON")?,
                None => serde_json::Value::Null,
            };

            let mut req = SubmitRequest::new(engine::SpecRef::latest(name.as_str())).input(input);
            req.budget_cents = budget;
            req.tags = tags;
            if tolerant {
                req.policy = Some(FailurePolicy::Tolerant);
            }

            let view = run_locally(&config, &name, dag, req).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn read_dag(path: &Path) -> anyhow::Result<DagDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid DAG JSON in {}", path.display()))
}

async fn run_locally(
    config: &AppConfig,
    name: &str,
    dag: DagDefinition,
    req: SubmitRequest,
) -> anyhow::Result<engine::RunView> {
    let plane = Arc::new(ControlPlane::new(config.orchestrator.clone())?);
    plane.register_spec(name, dag).await?;
    let run = plane.submit_workflow(req).await?;

    let shutdown = CancellationToken::new();
    let sweeper = plane.spawn_sweeper(shutdown.clone());

    let executors = ExecutorSet::new(
        Arc::new(SimulatedExecutor::new(NodeKind::Llm)),
        Arc::new(SimulatedExecutor::new(NodeKind::Function)),
        Arc::new(SimulatedExecutor::new(NodeKind::Tool)),
    );
    let workers: Vec<_> = (0..config.worker.workers)
        .map(|i| {
            let worker = Worker::new(
                format!("local-{i}"),
                Arc::clone(&plane),
                executors.clone(),
                &config.worker,
            );
            tokio::spawn(worker.run(shutdown.clone()))
        })
        .collect();

    let mut canceled = false;
    let view = loop {
        let view = plane.get_workflow_run(run.id).await?;
        if view.run.status.is_terminal() {
            break view;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !canceled => {
                warn!(run_id = %run.id, "interrupted; canceling run");
                plane.cancel_workflow_run(run.id).await?;
                canceled = true;
            }
            _ = tokio::time::sleep(config.worker.poll_interval()) => {}
        }
    };

    shutdown.cancel();
    for handle in workers {
        handle.await.context("worker task panicked")?;
    }
    sweeper.await.context("sweeper task panicked")?;

    info!(
        run_id = %view.run.id,
        status = %view.run.status,
        cost_cents = view.run.accumulated_cost_cents,
        "run finished"
    );
    Ok(view)
}
