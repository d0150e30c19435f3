//! CLI binary for generating and running Forge execution plans.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use forge_pipeline::{
    stub_registry, EventEmitter, ExecutionStrategy, ForgeConfig, LegacyRunner, Orchestrator,
    PlanExecutor, PlanGenerator, RuleBasedPlanner, RunEvent, StaticPlanner, WiringTable,
};
use forge_types::{ExecutionPlan, Mode};

#[derive(Parser)]
#[command(name = "forge", version, about = "Dependency-ordered multi-unit project generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the unit configuration file
    #[arg(short, long, global = true, default_value = "forge.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request through the plan engine (or the legacy two-step flow)
    Run {
        /// Free-text project request
        request: String,

        /// Execution mode: simple, full, or production
        #[arg(short, long, default_value = "full")]
        mode: Mode,

        /// Use the legacy planner -> coder flow instead of the plan engine
        #[arg(long)]
        legacy: bool,

        /// Replace every unit with a stub that echoes its input
        #[arg(long)]
        dry_run: bool,

        /// Scheduling strategy: sequential or layered (overrides config)
        #[arg(long)]
        strategy: Option<ExecutionStrategy>,

        /// Explicit comma-separated unit order, bypassing plan generation
        #[arg(long, value_delimiter = ',')]
        order: Vec<String>,

        /// Write the result document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stream run events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },

    /// Print the execution plan generated for a request
    Plan {
        /// Free-text project request
        request: String,

        /// Execution mode: simple, full, or production
        #[arg(short, long, default_value = "full")]
        mode: Mode,
    },

    /// List the wiring table and configured unit commands
    Units,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries result JSON.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            request,
            mode,
            legacy,
            dry_run,
            strategy,
            order,
            output,
            events,
        } => {
            let opts = RunOptions {
                mode,
                legacy,
                dry_run,
                strategy,
                order,
                output,
                events,
            };
            cmd_run(&cli.config, &request, opts).await?;
        }
        Commands::Plan { request, mode } => {
            cmd_plan(&request, mode)?;
        }
        Commands::Units => {
            cmd_units(&cli.config)?;
        }
    }

    Ok(())
}

struct RunOptions {
    mode: Mode,
    legacy: bool,
    dry_run: bool,
    strategy: Option<ExecutionStrategy>,
    order: Vec<String>,
    output: Option<PathBuf>,
    events: bool,
}

fn spawn_event_printer(events: &EventEmitter) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &RunEvent) {
    match serde_json::to_string(event) {
        Ok(line) => eprintln!("{line}"),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize run event"),
    }
}

async fn cmd_run(config_path: &Path, request: &str, opts: RunOptions) -> anyhow::Result<()> {
    let config = ForgeConfig::load(config_path)?;
    let wiring = WiringTable::standard();

    let registry = if opts.dry_run {
        stub_registry(&wiring)
    } else {
        config.command_registry()
    };
    if registry.is_empty() {
        anyhow::bail!(
            "No units configured in {}; add [units.<name>] tables or pass --dry-run",
            config_path.display()
        );
    }

    let events = EventEmitter::new(config.engine.event_capacity);
    let printer = opts.events.then(|| spawn_event_printer(&events));

    let planner: Arc<dyn PlanGenerator> = if opts.order.is_empty() {
        Arc::new(RuleBasedPlanner)
    } else {
        Arc::new(StaticPlanner::new(ExecutionPlan::from_order(opts.order)))
    };
    let strategy = opts.strategy.unwrap_or(config.engine.strategy);
    let executor = PlanExecutor::new(registry.clone())
        .with_wiring(wiring)
        .with_events(events.clone())
        .with_strategy(strategy);

    let mut orchestrator = Orchestrator::new(planner, executor);
    if opts.legacy {
        let legacy = LegacyRunner::from_registry(&registry)?.with_events(events.clone());
        orchestrator = orchestrator.with_legacy(legacy);
    }

    let outcome = orchestrator.run(request, opts.mode, !opts.legacy).await;

    // Close every sender so the printer drains and exits.
    drop(orchestrator);
    drop(events);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let outcome = outcome?;

    match opts.output {
        Some(path) => {
            outcome.save(&path)?;
            eprintln!("Result written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&outcome)?),
    }

    if let Some(doc) = outcome.as_plan() {
        if doc.is_degraded() {
            tracing::warn!(failed = ?doc.failed_units(), "Run finished with failed units");
        }
    }
    Ok(())
}

fn cmd_plan(request: &str, mode: Mode) -> anyhow::Result<()> {
    let plan = RuleBasedPlanner.generate(request, mode)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn cmd_units(config_path: &Path) -> anyhow::Result<()> {
    let config = ForgeConfig::load(config_path)?;
    let wiring = WiringTable::standard();
    let registry = config.command_registry();

    println!("Wiring table:");
    for (unit, rule) in wiring.entries() {
        let command = match config.units.get(unit) {
            Some(cfg) if registry.has(unit) => std::iter::once(&cfg.command)
                .chain(&cfg.args)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            _ => "(not configured)".to_string(),
        };
        println!("  {:<10} <- {:<45} {}", unit, rule.describe(), command);
    }

    let extra: Vec<&str> = config
        .units
        .keys()
        .map(String::as_str)
        .filter(|name| !wiring.is_recognized(name))
        .collect();
    if !extra.is_empty() {
        println!("\nConfigured but not wired (will be recorded as pending):");
        for name in extra {
            println!("  {name}");
        }
    }
    Ok(())
}
