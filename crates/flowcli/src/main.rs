// crates/flowcli/src/main.rs

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::HttpCoordinator;
use flowcore::{
    Configuration, ElementKind, ExecutionEvent, Flow, FlowPart, FlowType, LicenseLevel,
    RunOutcome, StepEvent, Value,
};
use flowruntime::{FlowRuntime, NodeWorker, NodeWorkerConfig, RunnerConfig};
use flownodes::ProcessScriptExecutor;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one flow against a file
    Run {
        /// Path to configuration JSON file
        #[arg(short, long)]
        config: PathBuf,

        /// Flow name or uid
        #[arg(long)]
        flow: String,

        /// Working file handed to the flow
        #[arg(long)]
        file: String,

        /// Extra variables as name=value; values are parsed as JSON when possible
        #[arg(long = "var")]
        vars: Vec<String>,

        /// License tier for the run
        #[arg(long, value_enum, default_value_t = License::Enterprise)]
        license: License,
    },

    /// Validate the flows in a configuration file
    Validate {
        /// Path to configuration JSON file
        config: PathBuf,
    },

    /// List available elements
    Elements,

    /// Run a processing node against a coordinator
    Node {
        /// Coordinator base URL
        #[arg(long, env = "FLOW_SERVER", default_value = "http://localhost:3000")]
        server: String,

        /// Address this node registers under
        #[arg(long, env = "FLOW_NODE_ADDRESS")]
        address: String,

        /// Display name on first registration
        #[arg(long)]
        name: Option<String>,

        /// Worker loops to suggest on first registration
        #[arg(long)]
        runners: Option<u32>,

        /// Path to configuration JSON file
        #[arg(short, long, env = "FLOW_CONFIG")]
        config: PathBuf,

        /// Seconds between polls when idle
        #[arg(long, default_value_t = 10)]
        poll: u64,

        /// Path prefix rewrite as from=to; repeatable
        #[arg(long = "map")]
        mappings: Vec<String>,
    },

    /// Create an example configuration
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flows.json")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum License {
    Free,
    Basic,
    Standard,
    Professional,
    Enterprise,
}

impl From<License> for LicenseLevel {
    fn from(license: License) -> Self {
        match license {
            License::Free => LicenseLevel::Free,
            License::Basic => LicenseLevel::Basic,
            License::Standard => LicenseLevel::Standard,
            License::Professional => LicenseLevel::Professional,
            License::Enterprise => LicenseLevel::Enterprise,
        }
    }
}

fn parse_var(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("variable must be name=value, got '{}'", raw))?;
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(value));
    Ok((name.to_string(), value))
}

fn parse_mapping(raw: &str) -> Result<(String, String)> {
    raw.split_once('=')
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .ok_or_else(|| anyhow::anyhow!("mapping must be from=to, got '{}'", raw))
}

fn runtime_for(configuration: Configuration, license: LicenseLevel) -> FlowRuntime {
    let registry = flownodes::standard_registry();
    let config = RunnerConfig {
        license,
        ..RunnerConfig::default()
    };
    FlowRuntime::new(
        Arc::new(registry),
        Arc::new(configuration),
        config,
        Arc::new(ProcessScriptExecutor::shell()),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            config,
            flow,
            file,
            vars,
            license,
        } => {
            let vars = vars
                .iter()
                .map(|v| parse_var(v))
                .collect::<Result<HashMap<_, _>>>()?;
            run_flow(config, flow, file, vars, license.into()).await?;
        }

        Commands::Validate { config } => {
            validate_configuration(config)?;
        }

        Commands::Elements => {
            list_elements();
        }

        Commands::Node {
            server,
            address,
            name,
            runners,
            config,
            poll,
            mappings,
        } => {
            let path_mappings = mappings
                .iter()
                .map(|m| parse_mapping(m))
                .collect::<Result<Vec<_>>>()?;
            let worker_config = NodeWorkerConfig {
                address,
                name,
                flow_runners: runners,
                poll_interval: Duration::from_secs(poll),
                path_mappings,
                ..NodeWorkerConfig::default()
            };
            run_node(server, config, worker_config).await?;
        }

        Commands::Init { output } => {
            create_example_configuration(output)?;
        }
    }

    Ok(())
}

async fn run_flow(
    config: PathBuf,
    flow: String,
    file: String,
    vars: HashMap<String, Value>,
    license: LicenseLevel,
) -> Result<()> {
    println!("🚀 Loading configuration from: {}", config.display());
    let configuration = Configuration::from_json_file(&config)?;
    let runtime = runtime_for(configuration, license);

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();

    // Spawn event listener
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { flow_name, working_file, .. } => {
                    println!("▶️  Flow '{}' started on {}", flow_name, working_file);
                }
                ExecutionEvent::StepStarted { element, depth, .. } => {
                    println!("  {}⚡ {}", "  ".repeat(depth), element);
                }
                ExecutionEvent::StepCompleted { output, duration_ms, .. } => {
                    println!("     ✅ output {} in {}ms", output, duration_ms);
                }
                ExecutionEvent::StepFailed { error, .. } => {
                    println!("     ❌ {}", error);
                }
                ExecutionEvent::StepEvent { event, .. } => match event {
                    StepEvent::Info { message } => println!("     ℹ️  {}", message),
                    StepEvent::Warning { message } => println!("     ⚠️  {}", message),
                    StepEvent::Progress { percent, .. } => println!("     📊 {}%", percent),
                },
                ExecutionEvent::RunCompleted { .. } => {}
            }
        }
    });

    let report = runtime
        .run_flow(&flow, file, vars, CancellationToken::new())
        .await?;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", report.execution_id);
    println!("   Flow: {}", report.flow_name);
    println!("   Steps: {}", report.executed_nodes.len());
    println!("   Duration: {}ms", report.duration_ms);
    match &report.outcome {
        RunOutcome::Completed { code } => println!("✨ Completed with output {}", code),
        RunOutcome::Failed(failure) => println!("💥 Failed: {}", failure.reason),
        RunOutcome::Canceled => println!("🛑 Canceled"),
    }
    if let Some(outcome) = &report.failure_flow {
        println!("   Failure flow: {}", outcome.label());
    }

    if report.outcome.is_completed() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("flow did not complete"))
    }
}

fn validate_configuration(config: PathBuf) -> Result<()> {
    println!("🔍 Validating configuration: {}", config.display());

    let configuration = Configuration::from_json_file(&config)?;
    let registry = flownodes::standard_registry();
    let mut problems = 0;

    for flow in &configuration.flows {
        println!("  • {} ({} parts)", flow.name, flow.parts.len());
        if let Err(e) = flowruntime::graph::validate(flow) {
            println!("    ❌ {}", e);
            problems += 1;
            continue;
        }
        for part in flowruntime::graph::unreachable_parts(flow)? {
            println!("    ⚠️  part {} is unreachable", part);
        }
        for part in &flow.parts {
            let known = match part.kind {
                ElementKind::Plugin => registry.get(&part.flow_element_uid).is_some(),
                ElementKind::Script => configuration
                    .script(part.flow_element_uid.rsplit(':').next().unwrap_or_default())
                    .is_some(),
                _ => true,
            };
            if !known {
                println!("    ❌ unknown element '{}' in part {}", part.flow_element_uid, part.display_name());
                problems += 1;
            }
        }
    }

    if problems == 0 {
        println!("✅ Configuration is valid: {} flows", configuration.flows.len());
        Ok(())
    } else {
        Err(anyhow::anyhow!("{} problems found", problems))
    }
}

fn list_elements() {
    println!("📦 Available Elements:");
    println!();

    let registry = flownodes::standard_registry();

    for element in registry.list_elements() {
        if let Some(metadata) = registry.get_metadata(&element) {
            println!("  • {} ({})", element, metadata.category);
            println!("    {}", metadata.description);
            for output in &metadata.outputs {
                println!("      {} → {}", output.code, output.description);
            }
        } else {
            println!("  • {}", element);
        }
    }
}

async fn run_node(server: String, config: PathBuf, worker_config: NodeWorkerConfig) -> Result<()> {
    let configuration = Configuration::from_json_file(&config)?;
    let runtime = Arc::new(runtime_for(configuration, LicenseLevel::Enterprise));
    let client = Arc::new(HttpCoordinator::new(server.clone()));
    let worker = Arc::new(NodeWorker::new(client, runtime, worker_config));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down after in-flight files finish");
            signal.cancel();
        }
    });

    println!("🌐 Processing node polling {}", server);
    worker.run(shutdown).await?;
    Ok(())
}

fn create_example_configuration(output: PathBuf) -> Result<()> {
    let mut flow = Flow::new("Example File Flow").as_default();
    let log = flow.add_part(
        FlowPart::plugin("debug.log")
            .with_name("Log File")
            .with_model("Message", "Processing {file.Name}"),
    );
    let check = flow.add_part(FlowPart::plugin("file.exists").with_name("Check File"));
    let missing = flow.add_part(
        FlowPart::plugin("flow.fail")
            .with_name("Missing")
            .with_model("Reason", "{file.FullName} disappeared"),
    );
    flow.connect(log, 0, check)?;
    flow.connect(check, 2, missing)?;

    let mut failure = Flow::new("Failure Flow").with_type(FlowType::Failure).as_default();
    failure.add_part(
        FlowPart::plugin("debug.log")
            .with_name("Report Failure")
            .with_model("Message", "{FailedFlowName} failed at {FailedElement}: {FailureReason}"),
    );

    let configuration = Configuration::new().with_flow(flow).with_flow(failure);

    // Save to file
    let json = serde_json::to_string_pretty(&configuration)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example configuration: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flow run --config {} --flow \"Example File Flow\" --file ./some-file.txt",
        output.display()
    );

    Ok(())
}
