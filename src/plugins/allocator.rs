//! Agent roster allocation.
//!
//! Sizes a project's agent roster from complexity signals: a base tier is
//! picked by feature count, scaling rules top it up, and the estimate is
//! trimmed back under the daily cost ceiling. A cooldown keeps callers
//! from thrashing re-allocations; check and record run in one serialized
//! transaction so two calls inside the window cannot both win.

use crate::core::broker::DbBroker;
use crate::core::config::EngineConfig;
use crate::core::error::SyndicError;
use crate::core::notify;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::budget::{ensure_schema, governance_db_path, round4};
use clap::{Parser, Subcommand};
use regex::Regex;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use ulid::Ulid;

/// Closed set of roles an allocation can staff. Dispatch over roles is a
/// match on this enum plus the rate table, never string plumbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    TeamLead,
    Architect,
    SeniorDev,
    MidDev,
    JuniorDev,
    Qa,
    Reviewer,
}

impl AgentRole {
    pub const ALL: [AgentRole; 7] = [
        AgentRole::TeamLead,
        AgentRole::Architect,
        AgentRole::SeniorDev,
        AgentRole::MidDev,
        AgentRole::JuniorDev,
        AgentRole::Qa,
        AgentRole::Reviewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::TeamLead => "team_lead",
            AgentRole::Architect => "architect",
            AgentRole::SeniorDev => "senior_dev",
            AgentRole::MidDev => "mid_dev",
            AgentRole::JuniorDev => "junior_dev",
            AgentRole::Qa => "qa",
            AgentRole::Reviewer => "reviewer",
        }
    }

    /// Daily cost rate per head, USD.
    pub fn cost_rate_usd(&self) -> f64 {
        match self {
            AgentRole::TeamLead => 4.0,
            AgentRole::Architect => 5.0,
            AgentRole::SeniorDev => 3.0,
            AgentRole::MidDev => 2.0,
            AgentRole::JuniorDev => 1.0,
            AgentRole::Qa => 1.5,
            AgentRole::Reviewer => 2.5,
        }
    }
}

/// Complexity signals for a PRD, produced by a `ProjectAnalyzer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSignals {
    pub features: u32,
    pub modules: u32,
    pub total_words: u32,
    pub complexity_score: u32,
    pub workflows_per_hour: u32,
}

/// Estimation seam. The bundled heuristic reads the PRD text directly; an
/// LLM-backed analyzer plugs in behind the same trait.
pub trait ProjectAnalyzer {
    fn analyze(&self, prd: &str) -> Result<ProjectSignals, SyndicError>;
}

static FEATURE_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*[-*+]\s+\S").unwrap());
static MODULE_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,3}\s+\S").unwrap());

/// Derives signals from PRD structure: bullets approximate features,
/// headings approximate modules, and token mass feeds the complexity
/// score.
pub struct HeuristicAnalyzer;

impl ProjectAnalyzer for HeuristicAnalyzer {
    fn analyze(&self, prd: &str) -> Result<ProjectSignals, SyndicError> {
        if prd.trim().is_empty() {
            return Err(SyndicError::ValidationError("PRD text is empty".into()));
        }
        let features = FEATURE_LINE.find_iter(prd).count() as u32;
        let modules = MODULE_HEADING.find_iter(prd).count() as u32;
        let total_words = prd.split_whitespace().count() as u32;

        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| SyndicError::ConfigError(format!("tokenizer: {}", e)))?;
        let tokens = bpe.encode_with_special_tokens(prd).len() as u32;

        let complexity_score = (tokens / 400 + modules * 3 + features * 2).min(100);
        let workflows_per_hour = features.div_ceil(3).max(1);

        Ok(ProjectSignals {
            features,
            modules,
            total_words,
            complexity_score,
            workflows_per_hour,
        })
    }
}

pub type Roster = BTreeMap<AgentRole, u32>;

fn base_tier(features: u32) -> Roster {
    use AgentRole::*;
    let counts: &[(AgentRole, u32)] = if features < 10 {
        &[
            (TeamLead, 1),
            (SeniorDev, 1),
            (MidDev, 1),
            (JuniorDev, 2),
            (Qa, 1),
            (Reviewer, 1),
        ]
    } else if features < 30 {
        &[
            (TeamLead, 1),
            (Architect, 1),
            (SeniorDev, 2),
            (MidDev, 3),
            (JuniorDev, 3),
            (Qa, 2),
            (Reviewer, 1),
        ]
    } else {
        &[
            (TeamLead, 2),
            (Architect, 2),
            (SeniorDev, 4),
            (MidDev, 6),
            (JuniorDev, 6),
            (Qa, 3),
            (Reviewer, 2),
        ]
    };
    counts.iter().copied().collect()
}

pub fn estimate_cost(roster: &Roster) -> f64 {
    roster
        .iter()
        .map(|(role, count)| role.cost_rate_usd() * f64::from(*count))
        .sum()
}

pub fn headcount(roster: &Roster) -> u32 {
    roster.values().sum()
}

/// Base trim priority once scaling additions are gone: cheapest seats go
/// first, the team lead floor is one.
const TRIM_PRIORITY: [AgentRole; 7] = [
    AgentRole::JuniorDev,
    AgentRole::MidDev,
    AgentRole::Qa,
    AgentRole::Reviewer,
    AgentRole::SeniorDev,
    AgentRole::Architect,
    AgentRole::TeamLead,
];

/// Pure allocation: tier + scaling + ceiling trim. Returns the roster and
/// its (unrounded) cost estimate.
pub fn allocate_from_signals(signals: &ProjectSignals, cost_ceiling_usd: f64) -> (Roster, f64) {
    let mut roster = base_tier(signals.features);

    // Scaling rules; remembered so the trim can undo them first, in
    // reverse order of application.
    let mut scaling: Vec<AgentRole> = Vec::new();
    if signals.workflows_per_hour >= 10 {
        *roster.entry(AgentRole::MidDev).or_insert(0) += 2;
        scaling.push(AgentRole::MidDev);
        scaling.push(AgentRole::MidDev);
    }
    if signals.complexity_score > 70 {
        *roster.entry(AgentRole::Architect).or_insert(0) += 1;
        scaling.push(AgentRole::Architect);
    }

    while round4(estimate_cost(&roster)) > round4(cost_ceiling_usd) {
        if let Some(role) = scaling.pop() {
            if let Some(count) = roster.get_mut(&role) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    roster.remove(&role);
                }
            }
            continue;
        }
        let mut removed = false;
        for role in TRIM_PRIORITY {
            let floor = u32::from(role == AgentRole::TeamLead);
            if let Some(count) = roster.get_mut(&role) {
                if *count > floor {
                    *count -= 1;
                    if *count == 0 {
                        roster.remove(&role);
                    }
                    removed = true;
                    break;
                }
            }
        }
        if !removed {
            // Nothing left to cut above the floor.
            break;
        }
    }

    let cost = estimate_cost(&roster);
    (roster, cost)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AllocationLog {
    pub id: String,
    pub project_id: String,
    pub allocation: BTreeMap<String, u32>,
    pub estimated_cost_usd: f64,
    pub created_at: String,
}

fn roster_to_named(roster: &Roster) -> BTreeMap<String, u32> {
    roster
        .iter()
        .map(|(role, count)| (role.as_str().to_string(), *count))
        .collect()
}

/// Allocate a roster for a project from its PRD. The cooldown check and
/// the allocation insert share one serialized connection, so the window
/// admits exactly one allocation.
pub fn allocate_agents_for_project(
    store: &Store,
    config: &EngineConfig,
    project_id: &str,
    prd: &str,
    analyzer: &dyn ProjectAnalyzer,
) -> Result<AllocationLog, SyndicError> {
    let signals = analyzer.analyze(prd)?;
    let broker = DbBroker::new(&store.root);
    let cooldown = config.allocator.cooldown_secs;

    let log = broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "alloc.run",
        |conn| {
            ensure_schema(conn)?;
            let last_ts: Option<String> = conn
                .query_row(
                    "SELECT created_at FROM allocations WHERE project_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    [project_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(ts) = last_ts.as_deref().and_then(time::parse_epoch_z) {
                let elapsed = time::now_unix_secs().saturating_sub(ts);
                if elapsed < cooldown {
                    return Err(SyndicError::CooldownActive {
                        project: project_id.to_string(),
                        retry_after_secs: cooldown - elapsed,
                    });
                }
            }

            let (roster, cost) = allocate_from_signals(&signals, config.allocator.cost_ceiling_usd);
            let log = AllocationLog {
                id: Ulid::new().to_string(),
                project_id: project_id.to_string(),
                allocation: roster_to_named(&roster),
                estimated_cost_usd: cost,
                created_at: time::now_epoch_z(),
            };
            conn.execute(
                "INSERT INTO allocations(id, project_id, allocation, estimated_cost_usd, created_at)
                 VALUES(?1, ?2, ?3, ?4, ?5)",
                params![
                    log.id,
                    log.project_id,
                    serde_json::to_string(&log.allocation).unwrap(),
                    log.estimated_cost_usd,
                    log.created_at
                ],
            )?;
            Ok(log)
        },
    )?;

    notify::publish(
        &store.root,
        notify::CHANNEL_GOVERNANCE,
        "allocation.created",
        "syndic",
        serde_json::json!({
            "project_id": project_id,
            "headcount": log.allocation.values().sum::<u32>(),
            "estimated_cost_usd": round4(log.estimated_cost_usd),
            "signals": signals,
        }),
    );
    Ok(log)
}

fn row_to_log(row: &rusqlite::Row) -> rusqlite::Result<AllocationLog> {
    let allocation_raw: String = row.get(2)?;
    Ok(AllocationLog {
        id: row.get(0)?,
        project_id: row.get(1)?,
        allocation: serde_json::from_str(&allocation_raw).unwrap_or_default(),
        estimated_cost_usd: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Latest allocation for a project, if any.
pub fn latest_allocation(
    store: &Store,
    project_id: &str,
) -> Result<Option<AllocationLog>, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "alloc.latest",
        |conn| {
            ensure_schema(conn)?;
            conn.query_row(
                "SELECT id, project_id, allocation, estimated_cost_usd, created_at
                 FROM allocations WHERE project_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                [project_id],
                row_to_log,
            )
            .optional()
            .map_err(SyndicError::RusqliteError)
        },
    )
}

/// Full allocation history, oldest first. Retained for audit.
pub fn allocation_history(
    store: &Store,
    project_id: &str,
) -> Result<Vec<AllocationLog>, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &governance_db_path(&store.root),
        "syndic",
        "alloc.history",
        |conn| {
            ensure_schema(conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, project_id, allocation, estimated_cost_usd, created_at
                 FROM allocations WHERE project_id = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let mut out = Vec::new();
            for r in stmt.query_map([project_id], row_to_log)? {
                out.push(r?);
            }
            Ok(out)
        },
    )
}

// ===== CLI =====

#[derive(Parser, Debug)]
#[clap(name = "alloc", about = "Size a project's agent roster from its PRD")]
pub struct AllocCli {
    #[clap(subcommand)]
    command: AllocCommand,
}

#[derive(Subcommand, Debug)]
enum AllocCommand {
    /// Run an allocation from a PRD file.
    Run {
        #[clap(long)]
        project: String,
        #[clap(long, value_name = "FILE")]
        prd: String,
    },
    /// Show the latest allocation.
    Show {
        #[clap(long)]
        project: String,
    },
    /// Show full allocation history.
    History {
        #[clap(long)]
        project: String,
    },
}

pub fn run_alloc_cli(
    store: &Store,
    config: &EngineConfig,
    cli: AllocCli,
) -> Result<(), SyndicError> {
    match cli.command {
        AllocCommand::Run { project, prd } => {
            let text = std::fs::read_to_string(&prd).map_err(SyndicError::IoError)?;
            let log =
                allocate_agents_for_project(store, config, &project, &text, &HeuristicAnalyzer)?;
            println!(
                "{}",
                time::command_envelope(
                    "alloc.run",
                    "ok",
                    serde_json::json!({
                        "allocation": log.allocation,
                        "estimated_cost_usd": round4(log.estimated_cost_usd),
                    })
                )
            );
        }
        AllocCommand::Show { project } => match latest_allocation(store, &project)? {
            Some(log) => println!(
                "{}",
                serde_json::to_string_pretty(&log).unwrap_or_default()
            ),
            None => println!("(no allocation for {})", project),
        },
        AllocCommand::History { project } => {
            for log in allocation_history(store, &project)? {
                println!(
                    "{}  {}  ${:.4}  {:?}",
                    log.created_at,
                    log.id,
                    round4(log.estimated_cost_usd),
                    log.allocation
                );
            }
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "alloc",
        "version": "0.1.0",
        "description": "Tiered roster allocation under a cost ceiling with cooldown",
        "commands": [
            { "name": "run", "parameters": ["project", "prd"] },
            { "name": "show", "parameters": ["project"] },
            { "name": "history", "parameters": ["project"] }
        ],
        "storage": ["governance.db"]
    })
}
