//! Task backlog, status machine, and claim manager.
//!
//! Tasks are created `queued` by an external planner and mutated only
//! through the transitions here. A claim is a compare-and-swap: the
//! conditional `UPDATE ... WHERE status = 'queued'` either takes the task
//! or loses the race, and losers silently move to the next candidate.
//! Terminal tasks are never deleted.

use crate::core::broker::DbBroker;
use crate::core::error::SyndicError;
use crate::core::notify;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::budget;
use crate::plugins::ledger;
use clap::{Parser, Subcommand};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use ulid::Ulid;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    InReview,
    NeedsRevision,
    InQa,
    Blocked,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::NeedsRevision => "needs_revision",
            TaskStatus::InQa => "in_qa",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SyndicError> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "in_progress" => Ok(TaskStatus::InProgress),
            "in_review" => Ok(TaskStatus::InReview),
            "needs_revision" => Ok(TaskStatus::NeedsRevision),
            "in_qa" => Ok(TaskStatus::InQa),
            "blocked" => Ok(TaskStatus::Blocked),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(SyndicError::ValidationError(format!(
                "unknown task status '{}'",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// The fixed workflow DAG. Everything outside this table is rejected.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Queued, InProgress)
            | (InProgress, InReview)
            | (InProgress, InQa)
            | (InProgress, Blocked)
            | (InProgress, Completed)
            | (InProgress, Queued)
            | (InProgress, Failed)
            | (InReview, Completed)
            | (InReview, NeedsRevision)
            | (NeedsRevision, InProgress)
            | (InQa, Completed)
            | (InQa, Failed)
            | (Blocked, Queued)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Offline => "offline",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub required_role: String,
    pub status: TaskStatus,
    pub assigned_agent_id: Option<String>,
    pub retry_count: u32,
    pub context_packet: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub claimed_at: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Agent {
    pub id: String,
    pub role: String,
    pub status: String,
    pub score: f64,
    pub risk_level: String,
}

/// Outcome of `fail_task`: either the task went back to the queue for
/// another attempt, or it exhausted its retries and is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FailOutcome {
    Requeued { retry_count: u32 },
    Terminal { retry_count: u32 },
}

pub fn scheduler_db_path(root: &Path) -> PathBuf {
    root.join(schemas::SCHEDULER_DB_NAME)
}

fn ensure_schema(conn: &Connection) -> Result<(), SyndicError> {
    conn.execute(schemas::SCHEDULER_DB_SCHEMA_META, [])?;
    conn.execute(schemas::SCHEDULER_DB_SCHEMA_TASKS, [])?;
    conn.execute(schemas::SCHEDULER_DB_SCHEMA_AGENTS, [])?;
    conn.execute(schemas::SCHEDULER_DB_INDEX_TASKS_STATUS, [])?;
    conn.execute(schemas::SCHEDULER_DB_INDEX_TASKS_ROLE, [])?;
    conn.execute(schemas::SCHEDULER_DB_INDEX_TASKS_PROJECT, [])?;
    conn.execute(schemas::SCHEDULER_DB_INDEX_AGENTS_STATUS, [])?;
    conn.execute(
        "INSERT INTO meta(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [schemas::SCHEDULER_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

pub fn initialize_scheduler_db(root: &Path) -> Result<(), SyndicError> {
    let broker = DbBroker::new(root);
    broker.with_conn(&scheduler_db_path(root), "syndic", "scheduler.init", |conn| {
        ensure_schema(conn)
    })
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let status_raw: String = row.get(4)?;
    let packet_raw: String = row.get(7)?;
    let result_raw: Option<String> = row.get(8)?;
    Ok(Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        required_role: row.get(3)?,
        status: TaskStatus::parse(&status_raw).unwrap_or(TaskStatus::Queued),
        assigned_agent_id: row.get(5)?,
        retry_count: row.get::<_, i64>(6)? as u32,
        context_packet: serde_json::from_str(&packet_raw).unwrap_or(serde_json::Value::Null),
        result: result_raw.and_then(|s| serde_json::from_str(&s).ok()),
        error_message: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        claimed_at: row.get(12)?,
    })
}

const TASK_COLUMNS: &str = "id, project_id, title, required_role, status, assigned_agent_id, \
     retry_count, context_packet, result, error_message, created_at, updated_at, claimed_at";

fn fetch_task(conn: &Connection, id: &str) -> Result<Task, SyndicError> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
    conn.query_row(&sql, [id], row_to_task)
        .optional()?
        .ok_or_else(|| SyndicError::NotFound(format!("task {}", id)))
}

fn set_agent_status(conn: &Connection, agent_id: &str, status: AgentStatus) -> Result<(), SyndicError> {
    conn.execute(
        "UPDATE agents SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), time::now_epoch_z(), agent_id],
    )?;
    Ok(())
}

/// Create a task in the backlog. The external planner's entry point.
pub fn add_task(
    store: &Store,
    project_id: &str,
    title: &str,
    required_role: &str,
    context_packet: serde_json::Value,
) -> Result<Task, SyndicError> {
    if title.trim().is_empty() {
        return Err(SyndicError::ValidationError("task title is empty".into()));
    }
    if required_role.trim().is_empty() {
        return Err(SyndicError::ValidationError(
            "task required_role is empty".into(),
        ));
    }
    let broker = DbBroker::new(&store.root);
    let ts = time::now_epoch_z();
    let task = Task {
        id: Ulid::new().to_string(),
        project_id: project_id.to_string(),
        title: title.to_string(),
        required_role: required_role.to_string(),
        status: TaskStatus::Queued,
        assigned_agent_id: None,
        retry_count: 0,
        context_packet,
        result: None,
        error_message: None,
        created_at: ts.clone(),
        updated_at: ts,
        claimed_at: None,
    };
    broker.with_conn(&scheduler_db_path(&store.root), "syndic", "task.add", |conn| {
        ensure_schema(conn)?;
        conn.execute(
            "INSERT INTO tasks(id, project_id, title, required_role, status, retry_count,
                               context_packet, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)",
            params![
                task.id,
                task.project_id,
                task.title,
                task.required_role,
                task.status.as_str(),
                task.context_packet.to_string(),
                task.created_at,
                task.updated_at
            ],
        )?;
        Ok(())
    })?;
    notify::publish(
        &store.root,
        notify::CHANNEL_TASK,
        "task.queued",
        "planner",
        serde_json::json!({"task_id": task.id, "project_id": project_id, "role": required_role}),
    );
    Ok(task)
}

pub fn register_agent(store: &Store, agent_id: &str, role: &str) -> Result<(), SyndicError> {
    let broker = DbBroker::new(&store.root);
    let ts = time::now_epoch_z();
    broker.with_conn(
        &scheduler_db_path(&store.root),
        agent_id,
        "agent.register",
        |conn| {
            ensure_schema(conn)?;
            conn.execute(
                "INSERT INTO agents(id, role, status, registered_at, updated_at)
                 VALUES(?1, ?2, 'idle', ?3, ?3)
                 ON CONFLICT(id) DO UPDATE SET role = excluded.role,
                                               status = 'idle',
                                               updated_at = excluded.updated_at",
                params![agent_id, role, ts],
            )?;
            Ok(())
        },
    )
}

pub fn list_agents(store: &Store) -> Result<Vec<Agent>, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&scheduler_db_path(&store.root), "syndic", "agent.list", |conn| {
        ensure_schema(conn)?;
        let mut stmt =
            conn.prepare("SELECT id, role, status, score, risk_level FROM agents ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Agent {
                id: row.get(0)?,
                role: row.get(1)?,
                status: row.get(2)?,
                score: row.get(3)?,
                risk_level: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

/// Claim the oldest queued task matching `role`, excluding budget-paused
/// projects. The transition to `in_progress` is a conditional update; a
/// lost race advances to the next candidate. Returns `Ok(None)` when
/// nothing is eligible.
pub fn claim_next_task(
    store: &Store,
    role: &str,
    agent_id: &str,
) -> Result<Option<Task>, SyndicError> {
    // Read the paused set outside the scheduler lock; claims only need it
    // as an exclusion filter and pauses are themselves serialized writes.
    let paused = budget::paused_projects(store)?;
    let broker = DbBroker::new(&store.root);
    let ts = time::now_epoch_z();

    let claimed = broker.with_conn(
        &scheduler_db_path(&store.root),
        agent_id,
        "task.claim",
        |conn| {
            ensure_schema(conn)?;

            let holding: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE assigned_agent_id = ?1 AND status = 'in_progress'",
                [agent_id],
                |row| row.get(0),
            )?;
            if holding > 0 {
                return Err(SyndicError::ValidationError(format!(
                    "agent {} already holds an in-progress task",
                    agent_id
                )));
            }

            let sql = format!(
                "SELECT {} FROM tasks WHERE status = 'queued' AND required_role = ?1
                 ORDER BY created_at ASC, id ASC",
                TASK_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let candidates: Vec<Task> = stmt
                .query_map([role], row_to_task)?
                .filter_map(|r| r.ok())
                .filter(|t| !paused.contains(&t.project_id))
                .collect();

            for candidate in candidates {
                let changed = conn.execute(
                    "UPDATE tasks SET status = 'in_progress', assigned_agent_id = ?1,
                                      claimed_at = ?2, updated_at = ?2
                     WHERE id = ?3 AND status = 'queued'",
                    params![agent_id, ts, candidate.id],
                )?;
                if changed == 1 {
                    set_agent_status(conn, agent_id, AgentStatus::Busy)?;
                    return Ok(Some(Task {
                        status: TaskStatus::InProgress,
                        assigned_agent_id: Some(agent_id.to_string()),
                        claimed_at: Some(ts.clone()),
                        updated_at: ts.clone(),
                        ..candidate
                    }));
                }
                // Lost the race; try the next candidate.
            }
            Ok(None)
        },
    )?;

    if let Some(task) = &claimed {
        notify::publish(
            &store.root,
            notify::CHANNEL_TASK,
            "task.claimed",
            agent_id,
            serde_json::json!({"task_id": task.id, "project_id": task.project_id}),
        );
    }
    Ok(claimed)
}

fn guarded_transition(
    conn: &Connection,
    task: &Task,
    to: TaskStatus,
) -> Result<(), SyndicError> {
    if !can_transition(task.status, to) {
        return Err(SyndicError::ValidationError(format!(
            "illegal transition {} -> {} for task {}",
            task.status.as_str(),
            to.as_str(),
            task.id
        )));
    }
    let changed = conn.execute(
        "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![
            to.as_str(),
            time::now_epoch_z(),
            task.id,
            task.status.as_str()
        ],
    )?;
    if changed != 1 {
        return Err(SyndicError::ValidationError(format!(
            "task {} changed state concurrently",
            task.id
        )));
    }
    Ok(())
}

/// Mark a task completed from `in_progress`, `in_review`, or `in_qa`.
/// Emits a completion trace entry and frees the holding agent.
pub fn complete_task(
    store: &Store,
    task_id: &str,
    result: serde_json::Value,
) -> Result<Task, SyndicError> {
    let broker = DbBroker::new(&store.root);
    let task = broker.with_conn(
        &scheduler_db_path(&store.root),
        "syndic",
        "task.complete",
        |conn| {
            let task = fetch_task(conn, task_id)?;
            if !matches!(
                task.status,
                TaskStatus::InProgress | TaskStatus::InReview | TaskStatus::InQa
            ) {
                return Err(SyndicError::ValidationError(format!(
                    "task {} is {} and cannot complete",
                    task_id,
                    task.status.as_str()
                )));
            }
            guarded_transition(conn, &task, TaskStatus::Completed)?;
            conn.execute(
                "UPDATE tasks SET result = ?1 WHERE id = ?2",
                params![result.to_string(), task_id],
            )?;
            if let Some(agent) = &task.assigned_agent_id {
                set_agent_status(conn, agent, AgentStatus::Idle)?;
            }
            Ok(task)
        },
    )?;

    let agent = task.assigned_agent_id.clone().unwrap_or_default();
    ledger::append_entry(
        store,
        task_id,
        &agent,
        "task.completed",
        serde_json::json!({"project_id": task.project_id, "title": task.title}),
    )?;
    notify::publish(
        &store.root,
        notify::CHANNEL_TASK,
        "task.completed",
        &agent,
        serde_json::json!({"task_id": task_id, "project_id": task.project_id}),
    );
    Ok(Task {
        status: TaskStatus::Completed,
        result: Some(result),
        ..task
    })
}

/// Record a failure. Under the retry cap the task goes back to the queue;
/// beyond it (or failing out of QA) the task is terminal.
pub fn fail_task(
    store: &Store,
    task_id: &str,
    error_message: &str,
    max_retries: u32,
) -> Result<FailOutcome, SyndicError> {
    if error_message.trim().is_empty() {
        return Err(SyndicError::ValidationError(
            "failure requires an error message".into(),
        ));
    }
    let broker = DbBroker::new(&store.root);
    let (outcome, task) = broker.with_conn(
        &scheduler_db_path(&store.root),
        "syndic",
        "task.fail",
        |conn| {
            let task = fetch_task(conn, task_id)?;
            let retry_count = task.retry_count + 1;
            let ts = time::now_epoch_z();
            let outcome = match task.status {
                TaskStatus::InProgress if retry_count <= max_retries => {
                    conn.execute(
                        "UPDATE tasks SET status = 'queued', retry_count = ?1,
                                          assigned_agent_id = NULL, claimed_at = NULL,
                                          error_message = ?2, updated_at = ?3
                         WHERE id = ?4 AND status = 'in_progress'",
                        params![retry_count, error_message, ts, task_id],
                    )?;
                    FailOutcome::Requeued { retry_count }
                }
                TaskStatus::Failed => {
                    return Err(SyndicError::RetryExhausted(format!(
                        "task {} is terminal after {} attempts",
                        task_id, task.retry_count
                    )));
                }
                TaskStatus::InProgress | TaskStatus::InQa => {
                    guarded_transition(conn, &task, TaskStatus::Failed)?;
                    conn.execute(
                        "UPDATE tasks SET retry_count = ?1, error_message = ?2 WHERE id = ?3",
                        params![retry_count, error_message, task_id],
                    )?;
                    FailOutcome::Terminal { retry_count }
                }
                other => {
                    return Err(SyndicError::ValidationError(format!(
                        "task {} is {} and cannot fail",
                        task_id,
                        other.as_str()
                    )));
                }
            };
            if let Some(agent) = &task.assigned_agent_id {
                set_agent_status(conn, agent, AgentStatus::Idle)?;
            }
            Ok((outcome, task))
        },
    )?;

    let agent = task.assigned_agent_id.clone().unwrap_or_default();
    let event = match &outcome {
        FailOutcome::Requeued { .. } => "task.retry",
        FailOutcome::Terminal { .. } => "task.failed",
    };
    ledger::append_entry(
        store,
        task_id,
        &agent,
        event,
        serde_json::json!({"project_id": task.project_id, "error": error_message}),
    )?;
    notify::publish(
        &store.root,
        notify::CHANNEL_TASK,
        event,
        &agent,
        serde_json::json!({"task_id": task_id, "outcome": outcome}),
    );
    Ok(outcome)
}

/// Return an in-progress task to the queue without burning a retry.
/// Used when a governance check aborts the cycle before the agent acts.
pub fn release_task(store: &Store, task_id: &str) -> Result<(), SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &scheduler_db_path(&store.root),
        "syndic",
        "task.release",
        |conn| {
            let task = fetch_task(conn, task_id)?;
            if task.status != TaskStatus::InProgress {
                return Err(SyndicError::ValidationError(format!(
                    "task {} is {} and cannot be released",
                    task_id,
                    task.status.as_str()
                )));
            }
            conn.execute(
                "UPDATE tasks SET status = 'queued', assigned_agent_id = NULL,
                                  claimed_at = NULL, updated_at = ?1
                 WHERE id = ?2 AND status = 'in_progress'",
                params![time::now_epoch_z(), task_id],
            )?;
            if let Some(agent) = &task.assigned_agent_id {
                set_agent_status(conn, agent, AgentStatus::Idle)?;
            }
            Ok(())
        },
    )
}

/// Move an in-progress task into review or QA, or park it blocked.
pub fn advance_task(store: &Store, task_id: &str, to: TaskStatus) -> Result<(), SyndicError> {
    if !matches!(
        to,
        TaskStatus::InReview | TaskStatus::InQa | TaskStatus::Blocked
    ) {
        return Err(SyndicError::ValidationError(format!(
            "advance only targets in_review/in_qa/blocked, got {}",
            to.as_str()
        )));
    }
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &scheduler_db_path(&store.root),
        "syndic",
        "task.advance",
        |conn| {
            let task = fetch_task(conn, task_id)?;
            guarded_transition(conn, &task, to)
        },
    )
}

/// Send a reviewed task back for revision. Notes are mandatory: a reviewer
/// bouncing work without saying why is a validation error, not a decision.
pub fn request_revision(store: &Store, task_id: &str, notes: &str) -> Result<(), SyndicError> {
    if notes.trim().is_empty() {
        return Err(SyndicError::ValidationError(
            "revision requires reviewer notes".into(),
        ));
    }
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &scheduler_db_path(&store.root),
        "syndic",
        "task.revise",
        |conn| {
            let task = fetch_task(conn, task_id)?;
            guarded_transition(conn, &task, TaskStatus::NeedsRevision)?;
            conn.execute(
                "UPDATE tasks SET error_message = ?1 WHERE id = ?2",
                params![notes, task_id],
            )?;
            Ok(())
        },
    )
}

/// Resume a task awaiting revision (needs_revision -> in_progress) or
/// requeue a blocked one (blocked -> queued).
pub fn resume_task(store: &Store, task_id: &str) -> Result<(), SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &scheduler_db_path(&store.root),
        "syndic",
        "task.resume",
        |conn| {
            let task = fetch_task(conn, task_id)?;
            let to = match task.status {
                TaskStatus::NeedsRevision => TaskStatus::InProgress,
                TaskStatus::Blocked => TaskStatus::Queued,
                other => {
                    return Err(SyndicError::ValidationError(format!(
                        "task {} is {} and cannot resume",
                        task_id,
                        other.as_str()
                    )));
                }
            };
            guarded_transition(conn, &task, to)
        },
    )
}

/// Sweep in-progress tasks whose claim is older than `max_age_secs` back
/// to the queue, charging a retry and marking the holder offline.
pub fn reclaim_stale(store: &Store, max_age_secs: u64) -> Result<Vec<String>, SyndicError> {
    let broker = DbBroker::new(&store.root);
    let now = time::now_unix_secs();
    let reclaimed = broker.with_conn(
        &scheduler_db_path(&store.root),
        "syndic",
        "task.reclaim",
        |conn| {
            ensure_schema(conn)?;
            let sql = format!(
                "SELECT {} FROM tasks WHERE status = 'in_progress'",
                TASK_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let stale: Vec<Task> = stmt
                .query_map([], row_to_task)?
                .filter_map(|r| r.ok())
                .filter(|t| {
                    t.claimed_at
                        .as_deref()
                        .and_then(time::parse_epoch_z)
                        .is_some_and(|claimed| now.saturating_sub(claimed) > max_age_secs)
                })
                .collect();

            let ts = time::now_epoch_z();
            let mut ids = Vec::new();
            for task in stale {
                let changed = conn.execute(
                    "UPDATE tasks SET status = 'queued', retry_count = retry_count + 1,
                                      assigned_agent_id = NULL, claimed_at = NULL, updated_at = ?1
                     WHERE id = ?2 AND status = 'in_progress'",
                    params![ts, task.id],
                )?;
                if changed == 1 {
                    if let Some(agent) = &task.assigned_agent_id {
                        set_agent_status(conn, agent, AgentStatus::Offline)?;
                    }
                    ids.push(task.id);
                }
            }
            Ok(ids)
        },
    )?;

    for id in &reclaimed {
        notify::publish(
            &store.root,
            notify::CHANNEL_TASK,
            "task.reclaimed",
            "syndic",
            serde_json::json!({"task_id": id}),
        );
    }
    Ok(reclaimed)
}

pub fn get_task(store: &Store, task_id: &str) -> Result<Task, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&scheduler_db_path(&store.root), "syndic", "task.get", |conn| {
        ensure_schema(conn)?;
        fetch_task(conn, task_id)
    })
}

pub fn list_tasks(store: &Store, status: Option<TaskStatus>) -> Result<Vec<Task>, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&scheduler_db_path(&store.root), "syndic", "task.list", |conn| {
        ensure_schema(conn)?;
        let mut out = Vec::new();
        match status {
            Some(s) => {
                let sql = format!(
                    "SELECT {} FROM tasks WHERE status = ?1 ORDER BY created_at ASC, id ASC",
                    TASK_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                for r in stmt.query_map([s.as_str()], row_to_task)? {
                    out.push(r?);
                }
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM tasks ORDER BY created_at ASC, id ASC",
                    TASK_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                for r in stmt.query_map([], row_to_task)? {
                    out.push(r?);
                }
            }
        }
        Ok(out)
    })
}

// ===== CLI =====

#[derive(Parser, Debug)]
#[clap(name = "task", about = "Backlog, claims, and the task status machine")]
pub struct TaskCli {
    #[clap(subcommand)]
    command: TaskCommand,
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    /// Add a task to the backlog.
    Add {
        #[clap(value_name = "TITLE")]
        title: String,
        #[clap(long)]
        project: String,
        #[clap(long)]
        role: String,
        /// JSON context packet handed to the executing agent.
        #[clap(long, default_value = "{}")]
        context: String,
    },
    /// Claim the oldest eligible queued task for a role.
    Claim {
        #[clap(long)]
        role: String,
        #[clap(long)]
        agent: String,
    },
    /// Complete a task with a result document.
    Complete {
        #[clap(long)]
        id: String,
        #[clap(long, default_value = "{}")]
        result: String,
    },
    /// Record a task failure (requeues or goes terminal).
    Fail {
        #[clap(long)]
        id: String,
        #[clap(long)]
        error: String,
    },
    /// Release a claim without charging a retry.
    Release {
        #[clap(long)]
        id: String,
    },
    /// Move an in-progress task to review, QA, or blocked.
    Advance {
        #[clap(long)]
        id: String,
        #[clap(long, value_name = "in_review|in_qa|blocked")]
        to: String,
    },
    /// Bounce a reviewed task back for revision.
    Revise {
        #[clap(long)]
        id: String,
        #[clap(long)]
        notes: String,
    },
    /// Resume a needs_revision or blocked task.
    Resume {
        #[clap(long)]
        id: String,
    },
    /// Requeue in-progress tasks with stale claims.
    Reclaim {
        /// Claims older than this many seconds are presumed dead.
        #[clap(long)]
        max_age_secs: Option<u64>,
    },
    /// List tasks, optionally by status.
    List {
        #[clap(long)]
        status: Option<String>,
    },
    /// Show a single task.
    Get {
        #[clap(long)]
        id: String,
    },
    /// Register an agent identity for claim binding.
    RegisterAgent {
        #[clap(long)]
        agent: String,
        #[clap(long)]
        role: String,
    },
    /// List registered agents.
    Agents,
}

pub fn run_task_cli(
    store: &Store,
    config: &crate::core::config::EngineConfig,
    cli: TaskCli,
) -> Result<(), SyndicError> {
    match cli.command {
        TaskCommand::Add {
            title,
            project,
            role,
            context,
        } => {
            let packet: serde_json::Value = serde_json::from_str(&context)
                .map_err(|e| SyndicError::ValidationError(format!("bad context JSON: {}", e)))?;
            let task = add_task(store, &project, &title, &role, packet)?;
            println!(
                "{}",
                time::command_envelope("task.add", "ok", serde_json::json!({"id": task.id}))
            );
        }
        TaskCommand::Claim { role, agent } => match claim_next_task(store, &role, &agent)? {
            Some(task) => println!(
                "{}",
                time::command_envelope(
                    "task.claim",
                    "ok",
                    serde_json::to_value(&task).unwrap_or_default()
                )
            ),
            None => println!(
                "{}",
                time::command_envelope("task.claim", "empty", serde_json::json!({"role": role}))
            ),
        },
        TaskCommand::Complete { id, result } => {
            let result: serde_json::Value = serde_json::from_str(&result)
                .map_err(|e| SyndicError::ValidationError(format!("bad result JSON: {}", e)))?;
            complete_task(store, &id, result)?;
            println!(
                "{}",
                time::command_envelope("task.complete", "ok", serde_json::json!({"id": id}))
            );
        }
        TaskCommand::Fail { id, error } => {
            let outcome = fail_task(store, &id, &error, config.scheduler.max_retries)?;
            println!(
                "{}",
                time::command_envelope(
                    "task.fail",
                    "ok",
                    serde_json::to_value(&outcome).unwrap_or_default()
                )
            );
        }
        TaskCommand::Release { id } => {
            release_task(store, &id)?;
            println!(
                "{}",
                time::command_envelope("task.release", "ok", serde_json::json!({"id": id}))
            );
        }
        TaskCommand::Advance { id, to } => {
            advance_task(store, &id, TaskStatus::parse(&to)?)?;
            println!(
                "{}",
                time::command_envelope("task.advance", "ok", serde_json::json!({"id": id, "to": to}))
            );
        }
        TaskCommand::Revise { id, notes } => {
            request_revision(store, &id, &notes)?;
            println!(
                "{}",
                time::command_envelope("task.revise", "ok", serde_json::json!({"id": id}))
            );
        }
        TaskCommand::Resume { id } => {
            resume_task(store, &id)?;
            println!(
                "{}",
                time::command_envelope("task.resume", "ok", serde_json::json!({"id": id}))
            );
        }
        TaskCommand::Reclaim { max_age_secs } => {
            let cutoff = max_age_secs.unwrap_or(config.scheduler.stale_after_secs);
            let ids = reclaim_stale(store, cutoff)?;
            println!(
                "{}",
                time::command_envelope(
                    "task.reclaim",
                    "ok",
                    serde_json::json!({"reclaimed": ids})
                )
            );
        }
        TaskCommand::List { status } => {
            let filter = status.as_deref().map(TaskStatus::parse).transpose()?;
            let tasks = list_tasks(store, filter)?;
            for t in &tasks {
                println!(
                    "{}  {:<14} {:<10} {}",
                    t.id,
                    t.status.as_str(),
                    t.required_role,
                    crate::core::output::compact_line(&t.title, 60)
                );
            }
            if tasks.is_empty() {
                println!("(no tasks)");
            }
        }
        TaskCommand::Get { id } => {
            let task = get_task(store, &id)?;
            println!("{}", serde_json::to_string_pretty(&task).unwrap_or_default());
        }
        TaskCommand::RegisterAgent { agent, role } => {
            register_agent(store, &agent, &role)?;
            println!(
                "{}",
                time::command_envelope(
                    "agent.register",
                    "ok",
                    serde_json::json!({"agent": agent, "role": role})
                )
            );
        }
        TaskCommand::Agents => {
            for a in list_agents(store)? {
                println!("{}  {:<12} {:<8} score={:.1}", a.id, a.role, a.status, a.score);
            }
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "task",
        "version": "0.1.0",
        "description": "Task backlog, atomic claims, and the workflow status machine",
        "commands": [
            { "name": "add", "parameters": ["title", "project", "role", "context"] },
            { "name": "claim", "parameters": ["role", "agent"] },
            { "name": "complete", "parameters": ["id", "result"] },
            { "name": "fail", "parameters": ["id", "error"] },
            { "name": "reclaim", "parameters": ["max_age_secs"] }
        ],
        "storage": ["scheduler.db"]
    })
}
