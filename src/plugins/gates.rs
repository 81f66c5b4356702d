//! Human-in-the-loop approval gates.
//!
//! A gate is a named checkpoint (pre-commit, security, architecture, ...)
//! that blocks one workflow transition until a reviewer decides it. Gates
//! are terminal once decided; deciding twice is an explicit error. A gate
//! whose type is not enabled for its project is born APPROVED, so callers
//! never wait on a checkpoint the project opted out of.

use crate::core::broker::DbBroker;
use crate::core::config::EngineConfig;
use crate::core::error::SyndicError;
use crate::core::notify;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::budget::{ensure_schema, governance_db_path};
use clap::{Parser, Subcommand};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Pending => "pending",
            GateStatus::Approved => "approved",
            GateStatus::Rejected => "rejected",
            GateStatus::Modified => "modified",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SyndicError> {
        match s {
            "pending" => Ok(GateStatus::Pending),
            "approved" => Ok(GateStatus::Approved),
            "rejected" => Ok(GateStatus::Rejected),
            "modified" => Ok(GateStatus::Modified),
            other => Err(SyndicError::ValidationError(format!(
                "unknown gate status '{}'",
                other
            ))),
        }
    }

    /// Modified counts as an approval for downstream consumers.
    pub fn is_approval(&self) -> bool {
        matches!(self, GateStatus::Approved | GateStatus::Modified)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApprovalGate {
    pub id: String,
    pub project_id: String,
    pub gate_type: String,
    pub status: GateStatus,
    pub title: String,
    pub description: String,
    pub payload: serde_json::Value,
    pub modified_payload: Option<serde_json::Value>,
    pub reviewer: Option<String>,
    pub reviewer_notes: Option<String>,
    pub task_id: Option<String>,
    pub created_at: String,
    pub decided_at: Option<String>,
}

fn row_to_gate(row: &rusqlite::Row) -> rusqlite::Result<ApprovalGate> {
    let status_raw: String = row.get(3)?;
    let payload_raw: String = row.get(6)?;
    let modified_raw: Option<String> = row.get(7)?;
    Ok(ApprovalGate {
        id: row.get(0)?,
        project_id: row.get(1)?,
        gate_type: row.get(2)?,
        status: GateStatus::parse(&status_raw).unwrap_or(GateStatus::Pending),
        title: row.get(4)?,
        description: row.get(5)?,
        payload: serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null),
        modified_payload: modified_raw.and_then(|s| serde_json::from_str(&s).ok()),
        reviewer: row.get(8)?,
        reviewer_notes: row.get(9)?,
        task_id: row.get(10)?,
        created_at: row.get(11)?,
        decided_at: row.get(12)?,
    })
}

const GATE_COLUMNS: &str = "id, project_id, gate_type, status, title, description, payload, \
     modified_payload, reviewer, reviewer_notes, task_id, created_at, decided_at";

fn fetch_gate(conn: &Connection, id: &str) -> Result<ApprovalGate, SyndicError> {
    let sql = format!("SELECT {} FROM gates WHERE id = ?1", GATE_COLUMNS);
    conn.query_row(&sql, [id], row_to_gate)
        .optional()?
        .ok_or_else(|| SyndicError::NotFound(format!("gate {}", id)))
}

/// Replace a project's enabled gate set.
pub fn configure_gates(
    store: &Store,
    project_id: &str,
    enabled_types: &[String],
) -> Result<(), SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &governance_db_path(&store.root),
        "operator",
        "gate.configure",
        |conn| {
            ensure_schema(conn)?;
            conn.execute("DELETE FROM gate_config WHERE project_id = ?1", [project_id])?;
            for t in enabled_types {
                conn.execute(
                    "INSERT OR IGNORE INTO gate_config(project_id, gate_type) VALUES(?1, ?2)",
                    params![project_id, t],
                )?;
            }
            // A sentinel row marks "configured" even when the set is empty,
            // so an empty configuration disables all gates instead of
            // falling back to defaults.
            conn.execute(
                "INSERT OR IGNORE INTO gate_config(project_id, gate_type) VALUES(?1, '')",
                [project_id],
            )?;
            Ok(())
        },
    )
}

fn enabled_types_for(
    conn: &Connection,
    config: &EngineConfig,
    project_id: &str,
) -> Result<Vec<String>, SyndicError> {
    let mut stmt = conn.prepare("SELECT gate_type FROM gate_config WHERE project_id = ?1")?;
    let rows: Vec<String> = stmt
        .query_map([project_id], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    if rows.is_empty() {
        // Unconfigured project: defaults apply.
        return Ok(config.gates.enabled.clone());
    }
    Ok(rows.into_iter().filter(|t| !t.is_empty()).collect())
}

pub fn is_gate_enabled(
    store: &Store,
    config: &EngineConfig,
    project_id: &str,
    gate_type: &str,
) -> Result<bool, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "gate.enabled",
        |conn| {
            ensure_schema(conn)?;
            let enabled = enabled_types_for(conn, config, project_id)?;
            Ok(enabled.iter().any(|t| t == gate_type))
        },
    )
}

/// Create a gate. Disabled types auto-resolve to APPROVED at creation and
/// never enter the pending queue.
#[allow(clippy::too_many_arguments)]
pub fn create_gate(
    store: &Store,
    config: &EngineConfig,
    project_id: &str,
    gate_type: &str,
    title: &str,
    description: &str,
    payload: serde_json::Value,
    task_id: Option<&str>,
) -> Result<ApprovalGate, SyndicError> {
    if gate_type.trim().is_empty() {
        return Err(SyndicError::ValidationError("gate type is empty".into()));
    }
    if title.trim().is_empty() {
        return Err(SyndicError::ValidationError("gate title is empty".into()));
    }
    let broker = DbBroker::new(&store.root);
    let gate = broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "gate.create",
        |conn| {
            ensure_schema(conn)?;
            let enabled = enabled_types_for(conn, config, project_id)?
                .iter()
                .any(|t| t == gate_type);
            let ts = time::now_epoch_z();
            let gate = ApprovalGate {
                id: Ulid::new().to_string(),
                project_id: project_id.to_string(),
                gate_type: gate_type.to_string(),
                status: if enabled {
                    GateStatus::Pending
                } else {
                    GateStatus::Approved
                },
                title: title.to_string(),
                description: description.to_string(),
                payload,
                modified_payload: None,
                reviewer: None,
                reviewer_notes: if enabled {
                    None
                } else {
                    Some("auto-approved: gate type not enabled for project".to_string())
                },
                task_id: task_id.map(String::from),
                created_at: ts.clone(),
                decided_at: if enabled { None } else { Some(ts) },
            };
            conn.execute(
                "INSERT INTO gates(id, project_id, gate_type, status, title, description,
                                   payload, reviewer_notes, task_id, created_at, decided_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    gate.id,
                    gate.project_id,
                    gate.gate_type,
                    gate.status.as_str(),
                    gate.title,
                    gate.description,
                    gate.payload.to_string(),
                    gate.reviewer_notes,
                    gate.task_id,
                    gate.created_at,
                    gate.decided_at
                ],
            )?;
            Ok(gate)
        },
    )?;

    notify::publish(
        &store.root,
        notify::CHANNEL_GOVERNANCE,
        "gate.created",
        "syndic",
        serde_json::json!({
            "gate_id": gate.id,
            "project_id": project_id,
            "type": gate_type,
            "status": gate.status.as_str(),
        }),
    );
    Ok(gate)
}

fn decide(
    store: &Store,
    gate_id: &str,
    reviewer: &str,
    to: GateStatus,
    notes: Option<&str>,
    modified_payload: Option<serde_json::Value>,
) -> Result<ApprovalGate, SyndicError> {
    if reviewer.trim().is_empty() {
        return Err(SyndicError::ValidationError("reviewer is empty".into()));
    }
    let broker = DbBroker::new(&store.root);
    let gate = broker.with_conn(
        &governance_db_path(&store.root),
        reviewer,
        "gate.decide",
        |conn| {
            let gate = fetch_gate(conn, gate_id)?;
            if gate.status != GateStatus::Pending {
                return Err(SyndicError::AlreadyDecided(format!(
                    "gate {} already decided: {}",
                    gate_id,
                    gate.status.as_str()
                )));
            }
            let ts = time::now_epoch_z();
            // The pending guard rides in the WHERE clause so two reviewers
            // racing on one gate cannot both win.
            let changed = conn.execute(
                "UPDATE gates SET status = ?1, reviewer = ?2, reviewer_notes = ?3,
                                  modified_payload = ?4, decided_at = ?5
                 WHERE id = ?6 AND status = 'pending'",
                params![
                    to.as_str(),
                    reviewer,
                    notes,
                    modified_payload.as_ref().map(|p| p.to_string()),
                    ts,
                    gate_id
                ],
            )?;
            if changed != 1 {
                return Err(SyndicError::AlreadyDecided(format!(
                    "gate {} decided concurrently",
                    gate_id
                )));
            }
            Ok(ApprovalGate {
                status: to,
                reviewer: Some(reviewer.to_string()),
                reviewer_notes: notes.map(String::from),
                modified_payload,
                decided_at: Some(ts),
                ..gate
            })
        },
    )?;

    notify::publish(
        &store.root,
        notify::CHANNEL_GOVERNANCE,
        "gate.decided",
        reviewer,
        serde_json::json!({
            "gate_id": gate_id,
            "status": gate.status.as_str(),
            "approval": gate.status.is_approval(),
        }),
    );
    Ok(gate)
}

pub fn approve_gate(
    store: &Store,
    gate_id: &str,
    reviewer: &str,
    notes: Option<&str>,
) -> Result<ApprovalGate, SyndicError> {
    decide(store, gate_id, reviewer, GateStatus::Approved, notes, None)
}

/// Rejection must say why.
pub fn reject_gate(
    store: &Store,
    gate_id: &str,
    reviewer: &str,
    notes: &str,
) -> Result<ApprovalGate, SyndicError> {
    if notes.trim().is_empty() {
        return Err(SyndicError::ValidationError(
            "rejection requires reviewer notes".into(),
        ));
    }
    decide(
        store,
        gate_id,
        reviewer,
        GateStatus::Rejected,
        Some(notes),
        None,
    )
}

/// Approve with an amended payload; downstream consumers read
/// `modified_payload` and treat the decision as an approval.
pub fn modify_and_approve(
    store: &Store,
    gate_id: &str,
    reviewer: &str,
    new_payload: serde_json::Value,
    notes: Option<&str>,
) -> Result<ApprovalGate, SyndicError> {
    decide(
        store,
        gate_id,
        reviewer,
        GateStatus::Modified,
        notes,
        Some(new_payload),
    )
}

/// Pending gates in reviewer processing order: oldest first.
pub fn get_pending_gates(store: &Store, project_id: &str) -> Result<Vec<ApprovalGate>, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "gate.pending",
        |conn| {
            ensure_schema(conn)?;
            let sql = format!(
                "SELECT {} FROM gates WHERE project_id = ?1 AND status = 'pending'
                 ORDER BY created_at ASC, id ASC",
                GATE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut out = Vec::new();
            for r in stmt.query_map([project_id], row_to_gate)? {
                out.push(r?);
            }
            Ok(out)
        },
    )
}

pub fn get_gate(store: &Store, gate_id: &str) -> Result<ApprovalGate, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "gate.get",
        |conn| {
            ensure_schema(conn)?;
            fetch_gate(conn, gate_id)
        },
    )
}

// ===== CLI =====

#[derive(Parser, Debug)]
#[clap(name = "gate", about = "Human approval checkpoints")]
pub struct GateCli {
    #[clap(subcommand)]
    command: GateCommand,
}

#[derive(Subcommand, Debug)]
enum GateCommand {
    /// Create a gate (auto-approves if the type is not enabled).
    Create {
        #[clap(long)]
        project: String,
        #[clap(long, value_name = "TYPE")]
        gate_type: String,
        #[clap(long)]
        title: String,
        #[clap(long, default_value = "")]
        description: String,
        #[clap(long, default_value = "{}")]
        payload: String,
        #[clap(long)]
        task: Option<String>,
    },
    /// Approve a pending gate.
    Approve {
        #[clap(long)]
        id: String,
        #[clap(long, default_value = "operator")]
        reviewer: String,
        #[clap(long)]
        notes: Option<String>,
    },
    /// Reject a pending gate (notes required).
    Reject {
        #[clap(long)]
        id: String,
        #[clap(long, default_value = "operator")]
        reviewer: String,
        #[clap(long)]
        notes: String,
    },
    /// Approve with an amended payload.
    Modify {
        #[clap(long)]
        id: String,
        #[clap(long, default_value = "operator")]
        reviewer: String,
        #[clap(long)]
        payload: String,
        #[clap(long)]
        notes: Option<String>,
    },
    /// List pending gates in review order.
    Pending {
        #[clap(long)]
        project: String,
    },
    /// Set the enabled gate types for a project.
    Configure {
        #[clap(long)]
        project: String,
        /// Repeatable; pass none to disable every gate type.
        #[clap(long = "type")]
        types: Vec<String>,
    },
    /// Check whether a gate type is enabled for a project.
    Enabled {
        #[clap(long)]
        project: String,
        #[clap(long, value_name = "TYPE")]
        gate_type: String,
    },
}

pub fn run_gate_cli(
    store: &Store,
    config: &EngineConfig,
    cli: GateCli,
) -> Result<(), SyndicError> {
    match cli.command {
        GateCommand::Create {
            project,
            gate_type,
            title,
            description,
            payload,
            task,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)
                .map_err(|e| SyndicError::ValidationError(format!("bad payload JSON: {}", e)))?;
            let gate = create_gate(
                store,
                config,
                &project,
                &gate_type,
                &title,
                &description,
                payload,
                task.as_deref(),
            )?;
            println!(
                "{}",
                time::command_envelope(
                    "gate.create",
                    "ok",
                    serde_json::json!({"id": gate.id, "status": gate.status.as_str()})
                )
            );
        }
        GateCommand::Approve { id, reviewer, notes } => {
            approve_gate(store, &id, &reviewer, notes.as_deref())?;
            println!(
                "{}",
                time::command_envelope("gate.approve", "ok", serde_json::json!({"id": id}))
            );
        }
        GateCommand::Reject { id, reviewer, notes } => {
            reject_gate(store, &id, &reviewer, &notes)?;
            println!(
                "{}",
                time::command_envelope("gate.reject", "ok", serde_json::json!({"id": id}))
            );
        }
        GateCommand::Modify {
            id,
            reviewer,
            payload,
            notes,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)
                .map_err(|e| SyndicError::ValidationError(format!("bad payload JSON: {}", e)))?;
            modify_and_approve(store, &id, &reviewer, payload, notes.as_deref())?;
            println!(
                "{}",
                time::command_envelope("gate.modify", "ok", serde_json::json!({"id": id}))
            );
        }
        GateCommand::Pending { project } => {
            let gates = get_pending_gates(store, &project)?;
            for g in &gates {
                println!(
                    "{}  {:<14} {}",
                    g.id,
                    g.gate_type,
                    crate::core::output::compact_line(&g.title, 60)
                );
            }
            if gates.is_empty() {
                println!("(no pending gates)");
            }
        }
        GateCommand::Configure { project, types } => {
            configure_gates(store, &project, &types)?;
            println!(
                "{}",
                time::command_envelope(
                    "gate.configure",
                    "ok",
                    serde_json::json!({"project": project, "enabled": types})
                )
            );
        }
        GateCommand::Enabled { project, gate_type } => {
            let enabled = is_gate_enabled(store, config, &project, &gate_type)?;
            println!(
                "{}",
                time::command_envelope(
                    "gate.enabled",
                    "ok",
                    serde_json::json!({"type": gate_type, "enabled": enabled})
                )
            );
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "gate",
        "version": "0.1.0",
        "description": "Named human-approval checkpoints with per-project policy",
        "commands": [
            { "name": "create", "parameters": ["project", "gate_type", "title", "payload", "task"] },
            { "name": "approve", "parameters": ["id", "reviewer", "notes"] },
            { "name": "reject", "parameters": ["id", "reviewer", "notes"] },
            { "name": "modify", "parameters": ["id", "reviewer", "payload", "notes"] },
            { "name": "pending", "parameters": ["project"] },
            { "name": "configure", "parameters": ["project", "types"] }
        ],
        "storage": ["governance.db"]
    })
}
