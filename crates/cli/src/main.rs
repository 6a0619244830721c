//! `workflow-engine` CLI entry-point.
//!
//! Available sub-commands:
//! - `run`: execute a workflow file once and print the `RunResult`.
//! - `validate`: check a workflow file and print its execution order.
//! - `serve`: start the API server over a directory of workflows.
//!
//! Engine settings come from flags with environment fallbacks; this is the
//! only place the environment is read. Exit codes: 0 completed, 1 failed
//! (or load error), 2 partial.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use engine::{
    EngineConfig, ExecutionGraph, RetryPolicy, RunOptions, WorkflowDefinition, WorkflowEngine,
};
use operators::builtin::{register_builtins, register_remote};
use operators::{OperatorRegistry, Payload};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "workflow-engine",
    about = "Concurrent DAG engine for eDiscovery document workflows",
    version
)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct EngineArgs {
    /// Base URL of the AI backend serving the remote operators.
    #[arg(long, env = "AI_BACKEND_URL", default_value = "http://localhost:8000", global = true)]
    ai_backend_url: String,

    /// Cap on concurrently running nodes per run (unbounded if unset).
    #[arg(long, env = "ENGINE_MAX_PARALLELISM", global = true)]
    max_parallelism: Option<usize>,

    /// Timeout for nodes that do not declare one.
    #[arg(long, env = "ENGINE_NODE_TIMEOUT_MS", default_value_t = 60_000, global = true)]
    node_timeout_ms: u64,

    /// Abort a run on the first node failure.
    #[arg(long, env = "ENGINE_FAIL_FAST", global = true)]
    fail_fast: bool,

    /// Retries for nodes that do not declare a retry policy.
    #[arg(long, env = "ENGINE_MAX_RETRIES", default_value_t = 0, global = true)]
    max_retries: u32,

    /// How long a cancelled operator may take to return.
    #[arg(long, env = "ENGINE_CANCEL_GRACE_MS", default_value_t = 5_000, global = true)]
    cancel_grace_ms: u64,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            default_node_timeout: Duration::from_millis(self.node_timeout_ms),
            max_parallelism: self.max_parallelism,
            fail_fast: self.fail_fast,
            retry: RetryPolicy::with_retries(self.max_retries),
            cancel_grace: Duration::from_millis(self.cancel_grace_ms),
            run_timeout: None,
        }
    }

    fn registry(&self) -> anyhow::Result<OperatorRegistry> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("workflow-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("cannot build HTTP client")?;

        let mut registry = OperatorRegistry::new();
        register_builtins(&mut registry)?;
        register_remote(&mut registry, &self.ai_backend_url, client)?;
        Ok(registry)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Execute a workflow definition file once.
    Run {
        /// Path to the workflow YAML or JSON file.
        path: PathBuf,
        /// Run inputs as a JSON object.
        #[arg(long, conflicts_with = "input_file")]
        input: Option<String>,
        /// Read run inputs from a JSON file.
        #[arg(long)]
        input_file: Option<PathBuf>,
        /// Wall-clock limit for the whole run.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Validate a workflow definition file.
    Validate {
        /// Path to the workflow YAML or JSON file.
        path: PathBuf,
    },
    /// Start the REST API server.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
        /// Directory of workflow definitions to serve.
        #[arg(long, env = "WORKFLOW_DIR", default_value = "workflows")]
        workflows: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(1)
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let registry = cli.engine.registry()?;
    let config = cli.engine.config();

    match cli.command {
        Command::Run {
            path,
            input,
            input_file,
            timeout_ms,
        } => {
            let definition = load(&path)?;
            let inputs = read_inputs(input.as_deref(), input_file.as_deref())?;
            let engine = WorkflowEngine::new(registry, config);
            let options = RunOptions {
                timeout_ms,
                ..RunOptions::default()
            };

            let result = engine
                .execute_definition(&definition, inputs, options, interrupt_token())
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::from(result.exit_code() as u8))
        }
        Command::Validate { path } => {
            let definition = load(&path)?;
            let graph = ExecutionGraph::build(&definition, &registry)?;
            println!(
                "Workflow '{}' is valid. Execution order: {:?}",
                definition.name,
                graph.order()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve { bind, workflows } => {
            let mut engine = WorkflowEngine::new(registry, config);
            let names = engine
                .load_dir(&workflows)
                .with_context(|| format!("cannot load workflows from {}", workflows.display()))?;
            info!(dir = %workflows.display(), workflows = ?names, "workflow catalog loaded");
            api::serve(&bind, engine).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    WorkflowDefinition::load(path).with_context(|| format!("cannot load {}", path.display()))
}

fn read_inputs(inline: Option<&str>, file: Option<&Path>) -> anyhow::Result<Payload> {
    let source = match (inline, file) {
        (Some(json), _) => json.to_owned(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?,
        (None, None) => return Ok(Payload::new()),
    };
    match serde_json::from_str(&source).context("run inputs are not valid JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("run inputs must be a JSON object"),
    }
}

/// A token cancelled by Ctrl-C, so an interrupted run still reports what it
/// finished.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            trigger.cancel();
        }
    });
    token
}
