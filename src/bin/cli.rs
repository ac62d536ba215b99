use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use toolflow::prelude::*;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;

/// Config file picked up next to a workflow when `--config` is not given
const DEFAULT_CONFIG_FILE: &str = "toolflow.yaml";

#[derive(Parser)]
#[command(name = "toolflow")]
#[command(about = "Run tool-calling workflows", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single workflow file
    Run {
        /// Path to the workflow JSON or YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Path to toolflow.yaml (default: next to FILE)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Execution mode: mock or real (overrides config)
        #[arg(short, long)]
        mode: Option<ExecutionMode>,

        /// Maximum number of steps running at once (overrides workflow and config)
        #[arg(short = 'n', long)]
        concurrency: Option<usize>,

        /// Context variable as key=value; values are parsed as JSON when possible
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Print the execution record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate workflow files without running them
    Validate {
        /// Path to workflow file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// List workflows in a directory
    List {
        /// Path to the workflows directory
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Run a workflow several times and compare the runs
    Compare {
        /// Path to the workflow JSON or YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Number of runs
        #[arg(short, long, default_value_t = 3)]
        runs: usize,

        /// Path to toolflow.yaml (default: next to FILE)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn log_filter(verbose: bool) -> &'static str {
    if verbose {
        "toolflow=debug"
    } else {
        "toolflow=info"
    }
}

#[cfg(feature = "otel")]
fn init_otel_tracing(verbose: bool) {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime::Tokio;
    use opentelemetry_sdk::trace::TracerProvider;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("Failed to create OTLP exporter: {}", e);
            init_tracing(verbose);
            return;
        }
    };

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .build();

    let tracer = provider.tracer("toolflow");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(EnvFilter::new(log_filter(verbose)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(otel_layer)
        .init();

    opentelemetry::global::set_tracer_provider(provider);
}

fn init_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_filter(verbose)))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "otel")]
    init_otel_tracing(cli.verbose);

    #[cfg(not(feature = "otel"))]
    init_tracing(cli.verbose);

    let result = run(cli).await;

    #[cfg(feature = "otel")]
    opentelemetry::global::shutdown_tracer_provider();

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "toolflow failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Run {
            file,
            config,
            mode,
            concurrency,
            vars,
            json,
        } => run_workflow(file, config, mode, concurrency, vars, json).await,
        Commands::Validate { path } => validate(path).await,
        Commands::List { dir } => list_workflows(dir).await,
        Commands::Compare { file, runs, config } => compare_runs(file, runs, config).await,
    }
}

/// Load the explicit config, or `toolflow.yaml` beside the workflow if present
fn load_config(workflow_file: &Path, config: Option<PathBuf>) -> anyhow::Result<EngineConfig> {
    let path = match config {
        Some(path) => path,
        None => {
            let candidate = workflow_file
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_CONFIG_FILE);
            if !candidate.exists() {
                return Ok(EngineConfig::default());
            }
            candidate
        }
    };

    if !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }
    tracing::debug!(config = %path.display(), "Loading engine config");
    Ok(EngineConfig::load(&path)?)
}

fn parse_vars(vars: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut context = Map::new();
    for var in vars {
        let Some((key, raw)) = var.split_once('=') else {
            anyhow::bail!("Invalid --var '{}', expected KEY=VALUE", var);
        };
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        context.insert(key.trim().to_string(), value);
    }
    Ok(context)
}

async fn prepare_store(file: &Path, config: &EngineConfig) -> anyhow::Result<(WorkflowStore, String)> {
    if !file.exists() {
        anyhow::bail!("Workflow file not found: {}", file.display());
    }

    let workflow = WorkflowLoader::load_file(file)?;
    let store = WorkflowStore::from_config(config)?;
    let workflow_id = store.register(workflow).await?;
    Ok((store, workflow_id))
}

async fn run_workflow(
    file: PathBuf,
    config: Option<PathBuf>,
    mode: Option<ExecutionMode>,
    concurrency: Option<usize>,
    vars: Vec<String>,
    json: bool,
) -> anyhow::Result<bool> {
    let config = load_config(&file, config)?;
    let (store, workflow_id) = prepare_store(&file, &config).await?;

    let mut options = config.execute_options();
    if let Some(mode) = mode {
        options.mode = mode;
    }
    if let Some(limit) = concurrency {
        options = options.concurrency(limit);
    }

    let outcome = store
        .execute(&workflow_id, parse_vars(&vars)?, options)
        .await?;
    let record = store.get_execution(&outcome.test_run_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&store, &workflow_id, &record).await;
    }

    Ok(outcome.success)
}

async fn validate(path: PathBuf) -> anyhow::Result<bool> {
    if !path.exists() {
        anyhow::bail!("Path not found: {}", path.display());
    }

    let workflows = if path.is_dir() {
        WorkflowLoader::load_directory(&path)?
    } else {
        vec![WorkflowLoader::load_file(&path)?]
    };

    if workflows.is_empty() {
        println!("No workflows found in: {}", path.display());
        return Ok(true);
    }

    let mut all_valid = true;
    for workflow in &workflows {
        match StepGraph::build(workflow) {
            Ok(graph) => println!(
                "✓ {} is valid ({} steps, {} dependency levels)",
                workflow.id,
                graph.len(),
                graph.execution_levels().len()
            ),
            Err(e) => {
                all_valid = false;
                println!("✗ {}: {}", workflow.id, e);
            }
        }
    }

    Ok(all_valid)
}

async fn list_workflows(dir: PathBuf) -> anyhow::Result<bool> {
    if !dir.exists() {
        anyhow::bail!("Directory not found: {}", dir.display());
    }

    let workflows = WorkflowLoader::load_directory(&dir)?;

    if workflows.is_empty() {
        println!("No workflows found in: {}", dir.display());
        return Ok(true);
    }

    println!("Workflows in {}:\n", dir.display());

    for workflow in &workflows {
        let graph = StepGraph::build(workflow)?;
        println!(
            "  {} ({} steps, concurrency {}, entry: {})",
            workflow.id,
            graph.len(),
            graph.concurrency_limit(),
            graph.entry_set().join(", ")
        );
        for (i, level) in graph.execution_levels().iter().enumerate() {
            println!("    Level {}: [{}]", i, level.join(", "));
        }
    }

    Ok(true)
}

async fn compare_runs(file: PathBuf, runs: usize, config: Option<PathBuf>) -> anyhow::Result<bool> {
    if runs == 0 {
        anyhow::bail!("--runs must be at least 1");
    }

    let config = load_config(&file, config)?;
    let (store, workflow_id) = prepare_store(&file, &config).await?;

    let mut run_ids = Vec::with_capacity(runs);
    for _ in 0..runs {
        let outcome = store
            .execute(&workflow_id, Map::new(), config.execute_options())
            .await?;
        run_ids.push(outcome.test_run_id);
    }

    let report = store.compare_executions(&run_ids, &workflow_id).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(report.success_rate >= 1.0)
}

async fn print_record(store: &WorkflowStore, workflow_id: &str, record: &ExecutionRecord) {
    println!("\n=== Workflow Result ===\n");
    println!("Success: {}", if record.success() { "YES" } else { "NO" });
    println!("Run ID: {}", record.test_run_id);
    println!("Time: {}ms\n", record.time_taken);

    let Some(workflow) = store.get_workflow(workflow_id).await else {
        return;
    };

    for step in &workflow.steps {
        let Some(result) = record.step_results.get(&step.id) else {
            continue;
        };
        let marker = match result.status {
            StepStatus::Succeeded => "✓",
            StepStatus::Failed => "✗",
            StepStatus::Skipped => "-",
            _ => " ",
        };
        println!(
            "  {} {} [{}] {}ms",
            marker, step.id, result.status, result.time_taken
        );
        if let Some(err) = &result.error {
            println!("      Error: {}", err);
        }
    }

    if let Some(failure) = &record.failure {
        println!("\n{}", failure);
    }
}
