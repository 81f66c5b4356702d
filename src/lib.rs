//! Syndic: a governance engine for autonomous agent pools
//!
//! **Syndic is a daemonless, local-first control plane for a virtual
//! software organization staffed by LLM-driven agents.**
//!
//! Agents pull work from a shared backlog, produce artifacts, and advance
//! through a governed workflow. Syndic does not generate code or author
//! tasks; it decides who may claim what, enforces spend ceilings, screens
//! privileged actions, gates phase transitions behind human approval,
//! sizes the roster under a cost ceiling, and keeps a tamper-evident
//! record of every decision it makes.
//!
//! # Core Principles
//!
//! - **Local-first**: all state is local SQLite plus JSONL journals
//! - **Daemonless**: agents and operators call the CLI on demand
//! - **Serialized mutation**: every write routes through the broker
//! - **Tamper-evident**: governance events land on a hash chain
//!
//! # Architecture
//!
//! All state mutations route through [`core::broker::DbBroker`] for
//! per-store serialization and audit logging. State lives in three bins
//! under `.syndic/data/`:
//!
//! - `scheduler.db`: task backlog, status machine, agent registry
//! - `governance.db`: approval gates, budgets, safety lists, allocations
//! - `trace.db`: the hash-chained trace ledger
//!
//! ## Subsystems (plugins)
//!
//! - `task`: backlog and atomic claims
//! - `budget`: spend accounting and pause gating
//! - `safety`: package/command/path screening
//! - `gate`: human approval checkpoints
//! - `trace`: the tamper-evident ledger
//! - `alloc`: roster sizing under a cost ceiling
//! - `orchestrate`: the poll -> check -> act -> record corridor
//!
//! # Examples
//!
//! ```bash
//! # Initialize a Syndic project
//! syndic init
//!
//! # Queue work and let an agent claim it
//! syndic task add "Implement invoice export" --project billing --role mid_dev
//! syndic orchestrate tick --role mid_dev --agent agent-7
//!
//! # Audit the governance record
//! syndic trace verify
//! syndic timeline show
//! ```

pub mod core;
pub mod plugins;

use crate::core::{
    config::EngineConfig,
    error,
    flight_recorder,
    store::{Store, StoreKind},
};
use plugins::{allocator, budget, gates, ledger, orchestrator, safety, scheduler};

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(
    name = "syndic",
    version = env!("CARGO_PKG_VERSION"),
    about = "Syndic is the daemonless governance engine for pools of autonomous LLM agents: claim arbitration, spend ceilings, safety screening, human approval gates, roster allocation, and a tamper-evident trace ledger.",
    disable_version_flag = true
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct InitCli {
    /// Directory to initialize (defaults to current working directory).
    #[clap(short, long)]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a Syndic store in this project.
    Init(InitCli),
    /// Print the binary version.
    Version,
    /// Task backlog, claims, and the status machine.
    Task(scheduler::TaskCli),
    /// Spend accounting and pause/resume gating.
    Budget(budget::BudgetCli),
    /// Screen packages, commands, and file paths.
    Safety(safety::SafetyCli),
    /// Human approval checkpoints.
    Gate(gates::GateCli),
    /// The tamper-evident trace ledger.
    Trace(ledger::TraceCli),
    /// Roster allocation from project signals.
    Alloc(allocator::AllocCli),
    /// Drive the governance corridor.
    Orchestrate(orchestrator::OrchestrateCli),
    /// Render the governance timeline.
    Timeline(flight_recorder::TimelineCli),
    /// Print the machine-readable subsystem inventory.
    Capabilities,
}

/// Walk upward from `start_dir` looking for a `.syndic` directory.
fn find_project_root(start_dir: &Path) -> Result<PathBuf, error::SyndicError> {
    let mut current = Some(start_dir);
    while let Some(path) = current {
        if path.join(".syndic").exists() {
            return Ok(path.to_path_buf());
        }
        current = path.parent();
    }
    Err(error::SyndicError::NotFound(format!(
        "no .syndic store found from {} upward; run `syndic init` first",
        start_dir.display()
    )))
}

fn init_store(dir: Option<PathBuf>) -> Result<(), error::SyndicError> {
    let target_dir = match dir {
        Some(d) => d,
        None => std::env::current_dir()?,
    };
    let target_dir = std::fs::canonicalize(&target_dir).map_err(error::SyndicError::IoError)?;
    let store_root = target_dir.join(".syndic").join("data");
    std::fs::create_dir_all(&store_root).map_err(error::SyndicError::IoError)?;

    println!("{}", "SYNDIC CONTROL PLANE".bright_cyan().bold());
    println!();

    let dbs: [(&str, fn(&Path) -> Result<(), error::SyndicError>); 3] = [
        ("scheduler.db", scheduler::initialize_scheduler_db),
        ("governance.db", budget::initialize_governance_db),
        ("trace.db", ledger::initialize_trace_db),
    ];
    for (db_name, init) in dbs {
        let db_path = store_root.join(db_name);
        if db_path.exists() {
            println!(
                "  {} {} {}",
                "✓".bright_green(),
                db_name,
                "(preserved - existing data kept)".bright_black()
            );
        } else {
            init(&store_root)?;
            println!("  {} {}", "●".bright_green(), db_name);
        }
    }

    for journal in [
        crate::core::schemas::BROKER_EVENTS_NAME,
        crate::core::schemas::LIFECYCLE_EVENTS_NAME,
    ] {
        let path = store_root.join(journal);
        if !path.exists() {
            std::fs::write(&path, "").map_err(error::SyndicError::IoError)?;
        }
        println!("  {} {}", "●".bright_green(), journal);
    }

    // Seed the safety sets from config defaults.
    let config = EngineConfig::load(&store_root)?;
    let store = Store {
        kind: StoreKind::Repo,
        root: store_root.clone(),
    };
    safety::SafetyPolicy::seed_defaults(&store, &config)?;
    println!("  {} safety allow/deny sets seeded", "●".bright_green());

    println!();
    println!(
        "Store ready at {}",
        store_root.display().to_string().bright_white()
    );
    Ok(())
}

pub fn run() -> Result<(), error::SyndicError> {
    let cli = Cli::parse();
    let current_dir = std::env::current_dir()?;

    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Init(init_cli) => init_store(init_cli.dir),
        Command::Capabilities => {
            println!(
                "{}",
                serde_json::to_string_pretty(&capabilities()).unwrap_or_default()
            );
            Ok(())
        }
        command => {
            let project_root = find_project_root(&current_dir)?;
            let store_root = project_root.join(".syndic").join("data");
            std::fs::create_dir_all(&store_root).map_err(error::SyndicError::IoError)?;
            let store = Store {
                kind: StoreKind::Repo,
                root: store_root.clone(),
            };
            let config = EngineConfig::load(&store_root)?;

            match command {
                Command::Task(task_cli) => scheduler::run_task_cli(&store, &config, task_cli),
                Command::Budget(budget_cli) => budget::run_budget_cli(&store, &config, budget_cli),
                Command::Safety(safety_cli) => safety::run_safety_cli(&store, safety_cli),
                Command::Gate(gate_cli) => gates::run_gate_cli(&store, &config, gate_cli),
                Command::Trace(trace_cli) => ledger::run_trace_cli(&store, trace_cli),
                Command::Alloc(alloc_cli) => allocator::run_alloc_cli(&store, &config, alloc_cli),
                Command::Orchestrate(orchestrate_cli) => {
                    orchestrator::run_orchestrate_cli(&store, &config, orchestrate_cli)
                }
                Command::Timeline(timeline_cli) => {
                    flight_recorder::run_timeline_cli(&store, timeline_cli)
                }
                Command::Init(_) | Command::Version | Command::Capabilities => unreachable!(),
            }
        }
    }
}

/// Machine-readable subsystem inventory.
pub fn capabilities() -> serde_json::Value {
    serde_json::json!({
        "name": "syndic",
        "version": env!("CARGO_PKG_VERSION"),
        "subsystems": [
            scheduler::schema(),
            budget::schema(),
            safety::schema(),
            gates::schema(),
            ledger::schema(),
            allocator::schema(),
            orchestrator::schema(),
            flight_recorder::schema(),
        ]
    })
}
