// crates/dagcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dagcore::{
    CodeRuntime, ExecutionEvent, NodeEvent, NodeInstance, NodeStatus, NodeType, RunRecord,
    RunStatus, Value, Workflow,
};
use dagruntime::{
    EngineConfig, ExecutionLimits, FileRunStore, FlowRuntime, MemoryStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dag")]
#[command(about = "dagflow workflow engine CLI", long_about = None)]
struct Cli {
    /// Show debug logs (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        catalog: CatalogArgs,

        #[command(flatten)]
        engine: EngineArgs,

        /// Directory to write the run record into
        #[arg(long, env = "DAGFLOW_RECORD_DIR")]
        record_dir: Option<PathBuf>,

        /// Print the run record as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Validate a workflow file without running it
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,

        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// List available builtin node types
    Nodes,

    /// Create an example workflow and node type catalog
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,

        /// Node type catalog output path
        #[arg(long, default_value = "node_types.json")]
        node_types: PathBuf,
    },
}

#[derive(Args)]
struct CatalogArgs {
    /// JSON array of extra node types (python/shell code or builtin aliases)
    #[arg(short = 't', long)]
    node_types: Option<PathBuf>,
}

#[derive(Args)]
struct EngineArgs {
    /// Maximum concurrent node executions
    #[arg(short, long, env = "DAGFLOW_WORKERS", default_value_t = 10)]
    workers: usize,

    /// Per-node wall clock limit in milliseconds
    #[arg(long, env = "DAGFLOW_TIMEOUT_MS", default_value_t = 30_000)]
    timeout_ms: u64,

    /// Per-node memory limit in MiB for python/shell nodes
    #[arg(long, env = "DAGFLOW_MEMORY_MB")]
    memory_mb: Option<u64>,

    /// Deadline for the whole run in milliseconds
    #[arg(long)]
    run_timeout_ms: Option<u64>,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        let mut limits = ExecutionLimits::default().with_timeout(Duration::from_millis(self.timeout_ms));
        if let Some(mb) = self.memory_mb {
            limits = limits.with_max_memory(mb * 1024 * 1024);
        }
        let config = EngineConfig::default()
            .with_max_workers(self.workers)
            .with_limits(limits);
        match self.run_timeout_ms {
            Some(ms) => config.with_run_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            file,
            catalog,
            engine,
            record_dir,
            json,
        } => {
            let record = run_workflow(&file, &catalog, engine.config(), record_dir).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_summary(&record);
            }
            if record.status != RunStatus::Succeeded {
                bail!("run {} finished with status {:?}", record.run_id, record.status);
            }
        }

        Commands::Validate { file, catalog } => {
            validate_workflow(&file, &catalog).await?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output, node_types } => {
            create_example_workflow(&output, &node_types)?;
        }
    }

    Ok(())
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read workflow {}", file.display()))?;
    serde_json::from_str(&workflow_json)
        .with_context(|| format!("{} is not a valid workflow", file.display()))
}

/// Standard builtins plus whatever the catalog file adds
fn build_runtime(catalog: &CatalogArgs, config: EngineConfig) -> Result<FlowRuntime> {
    let registry = dagnodes::standard_registry();
    let mut node_types = dagnodes::standard_node_types(&registry);
    if let Some(path) = &catalog.node_types {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read node types {}", path.display()))?;
        let extra: Vec<NodeType> = serde_json::from_str(&text)
            .with_context(|| format!("{} is not a node type list", path.display()))?;
        tracing::debug!("Loaded {} node types from {}", extra.len(), path.display());
        node_types.extend(extra);
    }

    let store = Arc::new(MemoryStore::with_contents([], node_types));
    Ok(FlowRuntime::with_stores(store.clone(), store, registry, config)?)
}

async fn run_workflow(
    file: &Path,
    catalog: &CatalogArgs,
    config: EngineConfig,
    record_dir: Option<PathBuf>,
) -> Result<RunRecord> {
    eprintln!("🚀 Loading workflow from: {}", file.display());
    let workflow = load_workflow(file)?;
    eprintln!("📋 Workflow: {}", workflow.name);
    eprintln!("   Nodes: {}", workflow.nodes.len());
    eprintln!("   Edges: {}", workflow.edges.len());
    eprintln!();

    let mut runtime = build_runtime(catalog, config)?;
    if let Some(dir) = record_dir {
        runtime = runtime.with_run_store(Arc::new(FileRunStore::new(dir)));
    }

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let done = matches!(event, ExecutionEvent::RunCompleted { .. });
            print_event(event);
            if done {
                break;
            }
        }
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling run");
            on_interrupt.cancel();
        }
    });

    let result = runtime.execute(&workflow, cancel).await;
    if result.is_ok() {
        // RunCompleted ends the listener
        let _ = event_task.await;
    } else {
        event_task.abort();
    }
    Ok(result?)
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted { run_id, .. } => {
            eprintln!("▶️  Run {} started", run_id);
        }
        ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
            eprintln!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeSucceeded { node_id, duration_ms, .. } => {
            eprintln!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, status, error, .. } => {
            eprintln!("  ❌ Node {} {:?}: {}", node_id, status, error.message);
        }
        ExecutionEvent::NodeSkipped { node_id, reason, .. } => {
            eprintln!("  ⏭️  Node {} skipped: {}", node_id, reason.message);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => {
                eprintln!("     ℹ️  [{}] {}", node_id, message);
            }
            NodeEvent::Warning { message } => {
                eprintln!("     ⚠️  [{}] {}", node_id, message);
            }
            NodeEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    eprintln!("     📊 [{}] {}% - {}", node_id, percent, msg);
                } else {
                    eprintln!("     📊 [{}] {}%", node_id, percent);
                }
            }
        },
        ExecutionEvent::RunCompleted { status, duration_ms, .. } => match status {
            RunStatus::Succeeded => eprintln!("✨ Run completed successfully in {}ms", duration_ms),
            RunStatus::Failed => eprintln!("💥 Run failed after {}ms", duration_ms),
            RunStatus::Cancelled => eprintln!("🛑 Run cancelled after {}ms", duration_ms),
        },
    }
}

fn print_summary(record: &RunRecord) {
    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", record.run_id);
    println!("   Status: {:?}", record.status);
    println!(
        "   Succeeded: {}/{} nodes",
        record.count(NodeStatus::Succeeded),
        record.results.len()
    );

    println!();
    println!("📤 Outputs:");
    for (node_id, result) in &record.results {
        match (&result.output, &result.error) {
            (Some(output), _) => {
                let text = serde_json::to_string(output).unwrap_or_else(|_| format!("{:?}", output));
                println!("   {}: {}", node_id, text);
            }
            (None, Some(error)) => println!("   {}: {:?} ({})", node_id, result.status, error.message),
            (None, None) => println!("   {}: {:?}", node_id, result.status),
        }
    }
}

async fn validate_workflow(file: &Path, catalog: &CatalogArgs) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let runtime = build_runtime(catalog, EngineConfig::default())?;
    let graph = runtime.validate(&workflow)?;
    let node_types = runtime.node_types().snapshot(&workflow).await?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", graph.model().len());
    println!("   Edges: {}", graph.model().edge_count());
    println!("   Node types: {}", node_types.len());
    let order: Vec<&str> = graph
        .order()
        .iter()
        .map(|idx| graph.model().node(*idx).id.as_str())
        .collect();
    println!("   Order: {}", order.join(" → "));

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = dagnodes::standard_registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

/// Example catalog: one python node type on top of the builtins
fn example_node_types() -> Vec<NodeType> {
    vec![NodeType::new(
        "py.square",
        CodeRuntime::Python,
        "def run(inputs, config):\n    return inputs[\"default\"] ** 2\n",
    )
    .with_name("Square (python)")]
}

fn example_workflow() -> Workflow {
    let mut workflow = Workflow::new("Example workflow").public();

    let seed = workflow.add_node(
        NodeInstance::new("seed", "value.echo")
            .with_config(Value::object([("v", 3)]))
            .with_position(100.0, 100.0),
    );
    let double = workflow.add_node(NodeInstance::new("double", "math.double").with_position(350.0, 100.0));
    let square = workflow.add_node(NodeInstance::new("square", "py.square").with_position(600.0, 100.0));
    let log = workflow.add_node(
        NodeInstance::new("log", "debug.log")
            .with_config(Value::object([("message", "squared result")]))
            .with_position(850.0, 100.0),
    );

    workflow.connect(seed, double.clone());
    workflow.connect(double, square.clone());
    workflow.connect_labeled(square, log, "result");
    workflow
}

fn create_example_workflow(output: &Path, node_types: &Path) -> Result<()> {
    std::fs::write(output, serde_json::to_string_pretty(&example_workflow())?)?;
    std::fs::write(node_types, serde_json::to_string_pretty(&example_node_types())?)?;

    println!("✨ Created example workflow: {}", output.display());
    println!("   and node types: {}", node_types.display());
    println!();
    println!("Run it with:");
    println!(
        "  dag run --file {} --node-types {}",
        output.display(),
        node_types.display()
    );

    Ok(())
}
