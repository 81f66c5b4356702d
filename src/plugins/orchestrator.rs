//! The orchestration loop: poll, check, act, record.
//!
//! Thin by design. Each cycle asks the scheduler for a claim, consults the
//! budget ledger, screens the task's context packet against the safety
//! policy, hands the task to an `AgentExecutor`, and records the outcome
//! through the scheduler transition, the budget ledger, and the trace
//! ledger, in that order. The CLI exposes the same corridor stepwise for
//! external agent harnesses that cannot run in-process.

use crate::core::config::EngineConfig;
use crate::core::error::SyndicError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::budget;
use crate::plugins::ledger;
use crate::plugins::safety::SafetyPolicy;
use crate::plugins::scheduler::{self, Task};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// What executing a task body produced. The engine is indifferent to how
/// the work happened; it consumes the result document and the sunk cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub result: JsonValue,
    pub cost_usd: f64,
}

/// Executes a claimed task. Implementations wrap the LLM transport, a
/// human terminal, or a simulation; the engine only sees this trait.
pub trait AgentExecutor {
    fn execute(&self, task: &Task) -> Result<ExecutionOutcome, SyndicError>;
}

/// Fixed-cost executor for dry runs and tests.
pub struct SimulatedExecutor {
    pub cost_usd: f64,
}

impl AgentExecutor for SimulatedExecutor {
    fn execute(&self, task: &Task) -> Result<ExecutionOutcome, SyndicError> {
        Ok(ExecutionOutcome {
            result: serde_json::json!({"simulated": true, "task_id": task.id}),
            cost_usd: self.cost_usd,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "cycle")]
pub enum CycleOutcome {
    /// No eligible task for this role.
    Idle,
    /// Budget gate refused new spend; the claim was released unburned.
    BudgetDeferred { task_id: String },
    /// A privileged action in the context packet was blocked; violation
    /// ledgered, task failed.
    PolicyBlocked { task_id: String, reason: String },
    Completed { task_id: String, cost_usd: f64 },
    Failed { task_id: String, error: String },
}

/// Screen the privileged actions a task's context packet declares.
/// Recognized keys: `command` (string), `packages` and `paths` (string
/// arrays). Returns the first blocking verdict.
pub fn screen_context(policy: &SafetyPolicy, task: &Task) -> Option<String> {
    let packet = task.context_packet.as_object()?;

    if let Some(cmd) = packet.get("command").and_then(|v| v.as_str()) {
        let v = policy.check_command(cmd);
        if v.blocked {
            return Some(format!("command blocked: {}", v.reason));
        }
    }
    if let Some(packages) = packet.get("packages").and_then(|v| v.as_array()) {
        for pkg in packages.iter().filter_map(|v| v.as_str()) {
            let v = policy.check_package_install(pkg);
            if v.blocked {
                return Some(format!("package '{}' blocked: {}", pkg, v.reason));
            }
        }
    }
    if let Some(paths) = packet.get("paths").and_then(|v| v.as_array()) {
        for path in paths.iter().filter_map(|v| v.as_str()) {
            let v = policy.check_file_path(path);
            if v.blocked {
                return Some(format!("path '{}' blocked: {}", path, v.reason));
            }
        }
    }
    None
}

/// Run one poll→check→act→record cycle for an agent.
pub fn run_cycle(
    store: &Store,
    config: &EngineConfig,
    role: &str,
    agent_id: &str,
    executor: &dyn AgentExecutor,
) -> Result<CycleOutcome, SyndicError> {
    let Some(task) = scheduler::claim_next_task(store, role, agent_id)? else {
        return Ok(CycleOutcome::Idle);
    };

    if !budget::can_proceed(store, config, &task.project_id, 0.0)? {
        scheduler::release_task(store, &task.id)?;
        return Ok(CycleOutcome::BudgetDeferred { task_id: task.id });
    }

    let policy = SafetyPolicy::load(store)?;
    if let Some(reason) = screen_context(&policy, &task) {
        ledger::append_entry(
            store,
            &task.id,
            agent_id,
            "policy.violation",
            serde_json::json!({"project_id": task.project_id, "reason": reason}),
        )?;
        scheduler::fail_task(store, &task.id, &reason, config.scheduler.max_retries)?;
        return Ok(CycleOutcome::PolicyBlocked {
            task_id: task.id,
            reason,
        });
    }

    match executor.execute(&task) {
        Ok(outcome) => {
            scheduler::complete_task(store, &task.id, outcome.result)?;
            budget::record_cost(store, config, &task.project_id, &task.id, outcome.cost_usd)?;
            Ok(CycleOutcome::Completed {
                task_id: task.id,
                cost_usd: outcome.cost_usd,
            })
        }
        Err(e) => {
            let error = e.to_string();
            scheduler::fail_task(store, &task.id, &error, config.scheduler.max_retries)?;
            Ok(CycleOutcome::Failed {
                task_id: task.id,
                error,
            })
        }
    }
}

// ===== CLI =====

#[derive(Parser, Debug)]
#[clap(
    name = "orchestrate",
    about = "Drive the poll -> check -> act -> record corridor"
)]
pub struct OrchestrateCli {
    #[clap(subcommand)]
    command: OrchestrateCommand,
}

#[derive(Subcommand, Debug)]
enum OrchestrateCommand {
    /// Claim and screen the next task for an external agent harness.
    /// The task stays in_progress for the harness to execute.
    Tick {
        #[clap(long)]
        role: String,
        #[clap(long)]
        agent: String,
    },
    /// Record the outcome of an externally executed task.
    Record {
        #[clap(long)]
        task: String,
        #[clap(long)]
        cost: f64,
        /// Result JSON on success; omit when reporting failure.
        #[clap(long)]
        result: Option<String>,
        #[clap(long)]
        error: Option<String>,
    },
    /// Run N in-process cycles with the simulated executor.
    Simulate {
        #[clap(long)]
        role: String,
        #[clap(long)]
        agent: String,
        #[clap(long, default_value = "1")]
        cycles: u32,
        #[clap(long, default_value = "0.05")]
        cost: f64,
    },
}

pub fn run_orchestrate_cli(
    store: &Store,
    config: &EngineConfig,
    cli: OrchestrateCli,
) -> Result<(), SyndicError> {
    match cli.command {
        OrchestrateCommand::Tick { role, agent } => {
            let Some(task) = scheduler::claim_next_task(store, &role, &agent)? else {
                println!(
                    "{}",
                    time::command_envelope("orchestrate.tick", "empty", serde_json::json!({}))
                );
                return Ok(());
            };
            if !budget::can_proceed(store, config, &task.project_id, 0.0)? {
                scheduler::release_task(store, &task.id)?;
                println!(
                    "{}",
                    time::command_envelope(
                        "orchestrate.tick",
                        "budget_deferred",
                        serde_json::json!({"task_id": task.id})
                    )
                );
                return Ok(());
            }
            let policy = SafetyPolicy::load(store)?;
            if let Some(reason) = screen_context(&policy, &task) {
                ledger::append_entry(
                    store,
                    &task.id,
                    &agent,
                    "policy.violation",
                    serde_json::json!({"project_id": task.project_id, "reason": reason}),
                )?;
                scheduler::fail_task(store, &task.id, &reason, config.scheduler.max_retries)?;
                println!(
                    "{}",
                    time::command_envelope(
                        "orchestrate.tick",
                        "policy_blocked",
                        serde_json::json!({"task_id": task.id, "reason": reason})
                    )
                );
                return Ok(());
            }
            println!(
                "{}",
                time::command_envelope(
                    "orchestrate.tick",
                    "ok",
                    serde_json::to_value(&task).unwrap_or_default()
                )
            );
        }
        OrchestrateCommand::Record {
            task,
            cost,
            result,
            error,
        } => {
            let info = scheduler::get_task(store, &task)?;
            match (result, error) {
                (Some(result), None) => {
                    let result: JsonValue = serde_json::from_str(&result).map_err(|e| {
                        SyndicError::ValidationError(format!("bad result JSON: {}", e))
                    })?;
                    scheduler::complete_task(store, &task, result)?;
                    budget::record_cost(store, config, &info.project_id, &task, cost)?;
                    println!(
                        "{}",
                        time::command_envelope(
                            "orchestrate.record",
                            "ok",
                            serde_json::json!({"task_id": task})
                        )
                    );
                }
                (None, Some(error)) => {
                    let outcome =
                        scheduler::fail_task(store, &task, &error, config.scheduler.max_retries)?;
                    budget::record_cost(store, config, &info.project_id, &task, cost)?;
                    println!(
                        "{}",
                        time::command_envelope(
                            "orchestrate.record",
                            "failed",
                            serde_json::to_value(&outcome).unwrap_or_default()
                        )
                    );
                }
                _ => {
                    return Err(SyndicError::ValidationError(
                        "record takes exactly one of --result or --error".into(),
                    ));
                }
            }
        }
        OrchestrateCommand::Simulate {
            role,
            agent,
            cycles,
            cost,
        } => {
            let executor = SimulatedExecutor { cost_usd: cost };
            for _ in 0..cycles {
                let outcome = run_cycle(store, config, &role, &agent, &executor)?;
                println!(
                    "{}",
                    time::command_envelope(
                        "orchestrate.cycle",
                        "ok",
                        serde_json::to_value(&outcome).unwrap_or_default()
                    )
                );
                if matches!(outcome, CycleOutcome::Idle) {
                    break;
                }
            }
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "orchestrate",
        "version": "0.1.0",
        "description": "Claim, screen, execute, and record task cycles",
        "commands": [
            { "name": "tick", "parameters": ["role", "agent"] },
            { "name": "record", "parameters": ["task", "cost", "result", "error"] },
            { "name": "simulate", "parameters": ["role", "agent", "cycles", "cost"] }
        ],
        "storage": ["scheduler.db", "governance.db", "trace.db"]
    })
}
