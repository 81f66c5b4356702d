//! Per-project spend accounting and threshold gating.
//!
//! Costs accumulate at full precision; rounding to 4 decimal places
//! happens only at the display/comparison boundary so repeated small
//! charges never drift. A project that breaches a ceiling is auto-paused
//! and stays paused until an explicit resume or, for the daily window,
//! the UTC day rolls over.

use crate::core::broker::DbBroker;
use crate::core::config::EngineConfig;
use crate::core::error::SyndicError;
use crate::core::notify;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::ledger;
use clap::{Parser, Subcommand};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BudgetRecord {
    pub project_id: String,
    pub current_day: String,
    pub daily_spent: f64,
    pub project_spent: f64,
    pub paused: bool,
    pub pause_reason: Option<String>,
}

/// Result of `record_cost`. The charge is always booked (the cost is
/// already sunk); `allowed = false` flags that it landed on a paused
/// project.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CostOutcome {
    pub allowed: bool,
    pub daily_spent: f64,
    pub project_spent: f64,
    pub paused: bool,
}

/// Round to 4 decimal places. Boundary use only: ceiling comparison and
/// display. Internal accumulators stay full precision.
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

pub fn governance_db_path(root: &Path) -> PathBuf {
    root.join(schemas::GOVERNANCE_DB_NAME)
}

pub(crate) fn ensure_schema(conn: &Connection) -> Result<(), SyndicError> {
    conn.execute(schemas::GOVERNANCE_DB_SCHEMA_GATES, [])?;
    conn.execute(schemas::GOVERNANCE_DB_INDEX_GATES_PENDING, [])?;
    conn.execute(schemas::GOVERNANCE_DB_SCHEMA_GATE_CONFIG, [])?;
    conn.execute(schemas::GOVERNANCE_DB_SCHEMA_BUDGETS, [])?;
    conn.execute(schemas::GOVERNANCE_DB_SCHEMA_ALLOCATIONS, [])?;
    conn.execute(schemas::GOVERNANCE_DB_INDEX_ALLOCATIONS_PROJECT, [])?;
    conn.execute(schemas::GOVERNANCE_DB_SCHEMA_SAFETY_ALLOWLIST, [])?;
    conn.execute(schemas::GOVERNANCE_DB_SCHEMA_SAFETY_DENYLIST, [])?;
    Ok(())
}

pub fn initialize_governance_db(root: &Path) -> Result<(), SyndicError> {
    let broker = DbBroker::new(root);
    broker.with_conn(&governance_db_path(root), "syndic", "governance.init", |conn| {
        ensure_schema(conn)
    })
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<BudgetRecord> {
    Ok(BudgetRecord {
        project_id: row.get(0)?,
        current_day: row.get(1)?,
        daily_spent: row.get(2)?,
        project_spent: row.get(3)?,
        paused: row.get::<_, i64>(4)? != 0,
        pause_reason: row.get(5)?,
    })
}

fn load_record(conn: &Connection, project_id: &str) -> Result<Option<BudgetRecord>, SyndicError> {
    conn.query_row(
        "SELECT project_id, current_day, daily_spent, project_spent, paused, pause_reason
         FROM budgets WHERE project_id = ?1",
        [project_id],
        row_to_record,
    )
    .optional()
    .map_err(SyndicError::RusqliteError)
}

/// Load the record and roll the daily window if the UTC day changed.
/// Rollover clears the daily component and lifts a pause that was caused
/// by the daily ceiling (project-ceiling and manual pauses stay).
fn load_current(conn: &Connection, project_id: &str) -> Result<BudgetRecord, SyndicError> {
    let today = time::today_utc();
    let mut rec = match load_record(conn, project_id)? {
        Some(rec) => rec,
        None => {
            let fresh = BudgetRecord {
                project_id: project_id.to_string(),
                current_day: today.clone(),
                daily_spent: 0.0,
                project_spent: 0.0,
                paused: false,
                pause_reason: None,
            };
            conn.execute(
                "INSERT OR IGNORE INTO budgets(project_id, current_day, daily_spent,
                                               project_spent, paused, updated_at)
                 VALUES(?1, ?2, 0.0, 0.0, 0, ?3)",
                params![project_id, today, time::now_epoch_z()],
            )?;
            fresh
        }
    };
    if rec.current_day != today {
        let daily_pause = rec
            .pause_reason
            .as_deref()
            .is_some_and(|r| r.starts_with("daily ceiling"));
        rec.current_day = today.clone();
        rec.daily_spent = 0.0;
        if daily_pause {
            rec.paused = false;
            rec.pause_reason = None;
        }
        conn.execute(
            "UPDATE budgets SET current_day = ?1, daily_spent = 0.0, paused = ?2,
                                pause_reason = ?3, updated_at = ?4
             WHERE project_id = ?5",
            params![
                today,
                rec.paused as i64,
                rec.pause_reason,
                time::now_epoch_z(),
                project_id
            ],
        )?;
    }
    Ok(rec)
}

fn persist(conn: &Connection, rec: &BudgetRecord) -> Result<(), SyndicError> {
    conn.execute(
        "UPDATE budgets SET current_day = ?1, daily_spent = ?2, project_spent = ?3,
                            paused = ?4, pause_reason = ?5, updated_at = ?6
         WHERE project_id = ?7",
        params![
            rec.current_day,
            rec.daily_spent,
            rec.project_spent,
            rec.paused as i64,
            rec.pause_reason,
            time::now_epoch_z(),
            rec.project_id
        ],
    )?;
    Ok(())
}

/// Book a sunk cost against both spend windows, then enforce ceilings.
pub fn record_cost(
    store: &Store,
    config: &EngineConfig,
    project_id: &str,
    task_id: &str,
    amount_usd: f64,
) -> Result<CostOutcome, SyndicError> {
    if !amount_usd.is_finite() || amount_usd < 0.0 {
        return Err(SyndicError::ValidationError(format!(
            "cost must be a non-negative amount, got {}",
            amount_usd
        )));
    }
    let broker = DbBroker::new(&store.root);
    let (outcome, newly_paused) = broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "budget.record",
        |conn| {
            ensure_schema(conn)?;
            let mut rec = load_current(conn, project_id)?;
            let was_paused = rec.paused;

            rec.daily_spent += amount_usd;
            rec.project_spent += amount_usd;

            let mut newly_paused = false;
            if !rec.paused {
                if round4(rec.daily_spent) >= round4(config.budget.daily_ceiling_usd) {
                    rec.paused = true;
                    rec.pause_reason = Some(format!(
                        "daily ceiling ${} reached",
                        round4(config.budget.daily_ceiling_usd)
                    ));
                    newly_paused = true;
                } else if round4(rec.project_spent) >= round4(config.budget.project_ceiling_usd) {
                    rec.paused = true;
                    rec.pause_reason = Some(format!(
                        "project ceiling ${} reached",
                        round4(config.budget.project_ceiling_usd)
                    ));
                    newly_paused = true;
                }
            }
            persist(conn, &rec)?;
            Ok((
                CostOutcome {
                    allowed: !was_paused,
                    daily_spent: rec.daily_spent,
                    project_spent: rec.project_spent,
                    paused: rec.paused,
                },
                newly_paused,
            ))
        },
    )?;

    if newly_paused {
        notify::publish(
            &store.root,
            notify::CHANNEL_BUDGET,
            "budget.paused",
            "syndic",
            serde_json::json!({
                "project_id": project_id,
                "task_id": task_id,
                "daily_spent": round4(outcome.daily_spent),
                "project_spent": round4(outcome.project_spent),
            }),
        );
    }
    if !outcome.allowed {
        // A cost landed on a paused project; ledger the violation before
        // anyone sees the flagged response.
        ledger::append_entry(
            store,
            task_id,
            "syndic",
            "budget.violation",
            serde_json::json!({
                "project_id": project_id,
                "amount_usd": round4(amount_usd),
                "project_spent": round4(outcome.project_spent),
            }),
        )?;
    }
    Ok(outcome)
}

/// Whether a project may take on new spend. `estimated_cost_usd` is added
/// to both windows before the ceiling comparison.
pub fn can_proceed(
    store: &Store,
    config: &EngineConfig,
    project_id: &str,
    estimated_cost_usd: f64,
) -> Result<bool, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "budget.check",
        |conn| {
            ensure_schema(conn)?;
            let rec = load_current(conn, project_id)?;
            if rec.paused {
                return Ok(false);
            }
            let daily_ok = round4(rec.daily_spent + estimated_cost_usd)
                < round4(config.budget.daily_ceiling_usd);
            let project_ok = round4(rec.project_spent + estimated_cost_usd)
                < round4(config.budget.project_ceiling_usd);
            Ok(daily_ok && project_ok)
        },
    )
}

/// Manual operator pause, independent of threshold pausing.
pub fn pause_project(store: &Store, project_id: &str, reason: &str) -> Result<(), SyndicError> {
    if reason.trim().is_empty() {
        return Err(SyndicError::ValidationError(
            "pause requires a reason".into(),
        ));
    }
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "budget.pause",
        |conn| {
            ensure_schema(conn)?;
            let mut rec = load_current(conn, project_id)?;
            rec.paused = true;
            rec.pause_reason = Some(reason.to_string());
            persist(conn, &rec)
        },
    )?;
    notify::publish(
        &store.root,
        notify::CHANNEL_BUDGET,
        "budget.paused",
        "operator",
        serde_json::json!({"project_id": project_id, "reason": reason}),
    );
    Ok(())
}

pub fn resume_project(store: &Store, project_id: &str) -> Result<(), SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "budget.resume",
        |conn| {
            ensure_schema(conn)?;
            let mut rec = load_current(conn, project_id)?;
            rec.paused = false;
            rec.pause_reason = None;
            persist(conn, &rec)
        },
    )?;
    notify::publish(
        &store.root,
        notify::CHANNEL_BUDGET,
        "budget.resumed",
        "operator",
        serde_json::json!({"project_id": project_id}),
    );
    Ok(())
}

pub fn get_budget(store: &Store, project_id: &str) -> Result<BudgetRecord, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "budget.get",
        |conn| {
            ensure_schema(conn)?;
            load_current(conn, project_id)
        },
    )
}

/// Projects currently paused. The scheduler excludes these from claims.
pub fn paused_projects(store: &Store) -> Result<Vec<String>, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "budget.paused_set",
        |conn| {
            ensure_schema(conn)?;
            let mut stmt = conn.prepare("SELECT project_id FROM budgets WHERE paused = 1")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        },
    )
}

// ===== CLI =====

#[derive(Parser, Debug)]
#[clap(name = "budget", about = "Spend accounting and pause/resume gating")]
pub struct BudgetCli {
    #[clap(subcommand)]
    command: BudgetCommand,
}

#[derive(Subcommand, Debug)]
enum BudgetCommand {
    /// Record a sunk cost against a project.
    Record {
        #[clap(long)]
        project: String,
        #[clap(long)]
        task: String,
        #[clap(long)]
        amount: f64,
    },
    /// Check whether new spend may proceed.
    Check {
        #[clap(long)]
        project: String,
        #[clap(long, default_value_t = 0.0)]
        estimate: f64,
    },
    /// Pause a project manually.
    Pause {
        #[clap(long)]
        project: String,
        #[clap(long)]
        reason: String,
    },
    /// Resume a paused project.
    Resume {
        #[clap(long)]
        project: String,
    },
    /// Show a project's budget record.
    Show {
        #[clap(long)]
        project: String,
    },
}

pub fn run_budget_cli(
    store: &Store,
    config: &EngineConfig,
    cli: BudgetCli,
) -> Result<(), SyndicError> {
    match cli.command {
        BudgetCommand::Record {
            project,
            task,
            amount,
        } => {
            let outcome = record_cost(store, config, &project, &task, amount)?;
            println!(
                "{}",
                time::command_envelope(
                    "budget.record",
                    if outcome.allowed { "ok" } else { "flagged" },
                    serde_json::json!({
                        "allowed": outcome.allowed,
                        "daily_spent": round4(outcome.daily_spent),
                        "project_spent": round4(outcome.project_spent),
                        "paused": outcome.paused,
                    })
                )
            );
        }
        BudgetCommand::Check { project, estimate } => {
            let ok = can_proceed(store, config, &project, estimate)?;
            println!(
                "{}",
                time::command_envelope(
                    "budget.check",
                    if ok { "ok" } else { "blocked" },
                    serde_json::json!({"can_proceed": ok})
                )
            );
            // Nonzero exit so shell harnesses can gate on the check.
            if !ok {
                let rec = get_budget(store, &project)?;
                return Err(SyndicError::BudgetExceeded {
                    project,
                    reason: rec
                        .pause_reason
                        .unwrap_or_else(|| "spend ceiling reached".to_string()),
                });
            }
        }
        BudgetCommand::Pause { project, reason } => {
            pause_project(store, &project, &reason)?;
            println!(
                "{}",
                time::command_envelope("budget.pause", "ok", serde_json::json!({"project": project}))
            );
        }
        BudgetCommand::Resume { project } => {
            resume_project(store, &project)?;
            println!(
                "{}",
                time::command_envelope(
                    "budget.resume",
                    "ok",
                    serde_json::json!({"project": project})
                )
            );
        }
        BudgetCommand::Show { project } => {
            let rec = get_budget(store, &project)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "project_id": rec.project_id,
                    "current_day": rec.current_day,
                    "daily_spent": round4(rec.daily_spent),
                    "project_spent": round4(rec.project_spent),
                    "paused": rec.paused,
                    "pause_reason": rec.pause_reason,
                }))
                .unwrap_or_default()
            );
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "budget",
        "version": "0.1.0",
        "description": "Spend ledger with daily/project ceilings and pause gating",
        "commands": [
            { "name": "record", "parameters": ["project", "task", "amount"] },
            { "name": "check", "parameters": ["project", "estimate"] },
            { "name": "pause", "parameters": ["project", "reason"] },
            { "name": "resume", "parameters": ["project"] }
        ],
        "storage": ["governance.db"]
    })
}
