//! The trace ledger: hash-chained, append-only record of governance
//! decisions.
//!
//! Every entry binds its predecessor through
//! `chain_hash = sha256(index ‖ prev_hash ‖ task ‖ agent ‖ event ‖
//! canonical(metadata) ‖ ts)`, so editing any historical row invalidates
//! every hash after it. No update or delete is exposed. Verification is a
//! full replay; each row's recomputation depends only on its stored
//! fields, so the replay fans out across cores.

use crate::core::broker::DbBroker;
use crate::core::error::SyndicError;
use crate::core::redact;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use clap::{Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// prev_hash of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TraceEntry {
    pub index: u64,
    pub prev_hash: String,
    pub task_id: String,
    pub agent_id: String,
    pub event_type: String,
    pub metadata: JsonValue,
    pub chain_hash: String,
    pub ts: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChainVerification {
    pub valid: bool,
    /// Indices whose stored hash or linkage does not replay. The first
    /// element pinpoints the earliest tampered or corrupted entry.
    pub errors: Vec<u64>,
    pub chain_length: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChainSnapshot {
    pub chain_length: u64,
    pub snapshot_hash: String,
    pub ts: String,
}

pub fn trace_db_path(root: &Path) -> PathBuf {
    root.join(schemas::TRACE_DB_NAME)
}

fn ensure_schema(conn: &Connection) -> Result<(), SyndicError> {
    conn.execute(schemas::TRACE_DB_SCHEMA_ENTRIES, [])?;
    Ok(())
}

pub fn initialize_trace_db(root: &Path) -> Result<(), SyndicError> {
    let broker = DbBroker::new(root);
    broker.with_conn(&trace_db_path(root), "syndic", "trace.init", ensure_schema)
}

/// Canonical JSON: objects with recursively sorted keys, compact
/// separators. The chain hash must not depend on map iteration order.
pub fn canonicalize(value: &JsonValue) -> String {
    fn sort(value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = serde_json::Map::new();
                for k in keys {
                    out.insert(k.clone(), sort(&map[k]));
                }
                JsonValue::Object(out)
            }
            JsonValue::Array(items) => JsonValue::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

fn compute_chain_hash(
    index: u64,
    prev_hash: &str,
    task_id: &str,
    agent_id: &str,
    event_type: &str,
    canonical_metadata: &str,
    ts: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string());
    hasher.update(b"\x1f");
    hasher.update(prev_hash);
    hasher.update(b"\x1f");
    hasher.update(task_id);
    hasher.update(b"\x1f");
    hasher.update(agent_id);
    hasher.update(b"\x1f");
    hasher.update(event_type);
    hasher.update(b"\x1f");
    hasher.update(canonical_metadata);
    hasher.update(b"\x1f");
    hasher.update(ts);
    format!("{:x}", hasher.finalize())
}

/// Append a governance event. Metadata is redacted before it is
/// canonicalized and hashed, so the chain binds the stored form.
pub fn append_entry(
    store: &Store,
    task_id: &str,
    agent_id: &str,
    event_type: &str,
    metadata: JsonValue,
) -> Result<TraceEntry, SyndicError> {
    if event_type.trim().is_empty() {
        return Err(SyndicError::ValidationError("event type is empty".into()));
    }
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&trace_db_path(&store.root), agent_id, "trace.append", |conn| {
        ensure_schema(conn)?;
        let last: Option<(i64, String)> = conn
            .query_row(
                "SELECT idx, chain_hash FROM trace_entries ORDER BY idx DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (index, prev_hash) = match last {
            Some((idx, hash)) => ((idx + 1) as u64, hash),
            None => (0, GENESIS_HASH.to_string()),
        };

        let metadata = redact::redact(metadata);
        let canonical = canonicalize(&metadata);
        let ts = time::now_epoch_z();
        let chain_hash = compute_chain_hash(
            index, &prev_hash, task_id, agent_id, event_type, &canonical, &ts,
        );

        conn.execute(
            "INSERT INTO trace_entries(idx, prev_hash, task_id, agent_id, event_type,
                                       metadata, chain_hash, ts)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                index as i64,
                prev_hash,
                task_id,
                agent_id,
                event_type,
                canonical,
                chain_hash,
                ts
            ],
        )?;

        Ok(TraceEntry {
            index,
            prev_hash,
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            event_type: event_type.to_string(),
            metadata,
            chain_hash,
            ts,
        })
    })
}

#[derive(Debug, Clone)]
struct StoredEntry {
    index: u64,
    prev_hash: String,
    task_id: String,
    agent_id: String,
    event_type: String,
    metadata: String,
    chain_hash: String,
    ts: String,
}

fn load_all(conn: &Connection) -> Result<Vec<StoredEntry>, SyndicError> {
    let mut stmt = conn.prepare(
        "SELECT idx, prev_hash, task_id, agent_id, event_type, metadata, chain_hash, ts
         FROM trace_entries ORDER BY idx ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(StoredEntry {
            index: row.get::<_, i64>(0)? as u64,
            prev_hash: row.get(1)?,
            task_id: row.get(2)?,
            agent_id: row.get(3)?,
            event_type: row.get(4)?,
            metadata: row.get(5)?,
            chain_hash: row.get(6)?,
            ts: row.get(7)?,
        })
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Replay the whole chain and compare against stored hashes.
///
/// Two checks per entry: the stored `chain_hash` must recompute from the
/// stored fields, and `prev_hash` must equal the predecessor's
/// `chain_hash` (genesis constant at index 0). Indices must be dense.
pub fn verify_chain_integrity(store: &Store) -> Result<ChainVerification, SyndicError> {
    let broker = DbBroker::new(&store.root);
    let entries = broker.with_conn(
        &trace_db_path(&store.root),
        "syndic",
        "trace.verify",
        |conn| {
            ensure_schema(conn)?;
            load_all(conn)
        },
    )?;

    let mut errors: Vec<u64> = entries
        .par_iter()
        .filter_map(|e| {
            let recomputed = compute_chain_hash(
                e.index,
                &e.prev_hash,
                &e.task_id,
                &e.agent_id,
                &e.event_type,
                &e.metadata,
                &e.ts,
            );
            (recomputed != e.chain_hash).then_some(e.index)
        })
        .collect();

    for (pos, e) in entries.iter().enumerate() {
        if e.index != pos as u64 {
            errors.push(e.index);
            continue;
        }
        let expected_prev = if pos == 0 {
            GENESIS_HASH
        } else {
            entries[pos - 1].chain_hash.as_str()
        };
        if e.prev_hash != expected_prev {
            errors.push(e.index);
        }
    }

    errors.sort_unstable();
    errors.dedup();
    Ok(ChainVerification {
        valid: errors.is_empty(),
        errors,
        chain_length: entries.len() as u64,
    })
}

/// Compact point-in-time attestation: the hash of all chain hashes in
/// order. Suitable for external notarization.
pub fn create_snapshot(store: &Store) -> Result<ChainSnapshot, SyndicError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(
        &trace_db_path(&store.root),
        "syndic",
        "trace.snapshot",
        |conn| {
            ensure_schema(conn)?;
            let mut stmt =
                conn.prepare("SELECT chain_hash FROM trace_entries ORDER BY idx ASC")?;
            let mut hasher = Sha256::new();
            let mut count: u64 = 0;
            for r in stmt.query_map([], |row| row.get::<_, String>(0))? {
                hasher.update(r?);
                count += 1;
            }
            Ok(ChainSnapshot {
                chain_length: count,
                snapshot_hash: format!("{:x}", hasher.finalize()),
                ts: time::now_epoch_z(),
            })
        },
    )
}

pub fn list_entries(store: &Store, limit: usize) -> Result<Vec<TraceEntry>, SyndicError> {
    let broker = DbBroker::new(&store.root);
    let stored = broker.with_conn(
        &trace_db_path(&store.root),
        "syndic",
        "trace.list",
        |conn| {
            ensure_schema(conn)?;
            load_all(conn)
        },
    )?;
    let start = stored.len().saturating_sub(limit);
    Ok(stored[start..]
        .iter()
        .map(|e| TraceEntry {
            index: e.index,
            prev_hash: e.prev_hash.clone(),
            task_id: e.task_id.clone(),
            agent_id: e.agent_id.clone(),
            event_type: e.event_type.clone(),
            metadata: serde_json::from_str(&e.metadata).unwrap_or(JsonValue::Null),
            chain_hash: e.chain_hash.clone(),
            ts: e.ts.clone(),
        })
        .collect())
}

// ===== CLI =====

#[derive(Parser, Debug)]
#[clap(name = "trace", about = "Tamper-evident governance trace ledger")]
pub struct TraceCli {
    #[clap(subcommand)]
    command: TraceCommand,
}

#[derive(Subcommand, Debug)]
enum TraceCommand {
    /// Append a governance event.
    Append {
        #[clap(long)]
        task: String,
        #[clap(long)]
        agent: String,
        #[clap(long, value_name = "TYPE")]
        event: String,
        #[clap(long, default_value = "{}")]
        metadata: String,
    },
    /// Replay the chain and report tampered indices.
    Verify,
    /// Emit a compact chain attestation.
    Snapshot,
    /// Show the most recent entries.
    List {
        #[clap(long, default_value = "20")]
        limit: usize,
    },
}

pub fn run_trace_cli(store: &Store, cli: TraceCli) -> Result<(), SyndicError> {
    match cli.command {
        TraceCommand::Append {
            task,
            agent,
            event,
            metadata,
        } => {
            let metadata: JsonValue = serde_json::from_str(&metadata)
                .map_err(|e| SyndicError::ValidationError(format!("bad metadata JSON: {}", e)))?;
            let entry = append_entry(store, &task, &agent, &event, metadata)?;
            println!(
                "{}",
                time::command_envelope(
                    "trace.append",
                    "ok",
                    serde_json::json!({"index": entry.index, "chain_hash": entry.chain_hash})
                )
            );
        }
        TraceCommand::Verify => {
            let result = verify_chain_integrity(store)?;
            if result.valid {
                println!(
                    "{} chain of {} entries replays clean",
                    "VALID".bright_green().bold(),
                    result.chain_length
                );
            } else {
                println!(
                    "{} first violation at index {}",
                    "TAMPERED".bright_red().bold(),
                    result.errors[0]
                );
            }
            println!(
                "{}",
                time::command_envelope(
                    "trace.verify",
                    if result.valid { "ok" } else { "tampered" },
                    serde_json::to_value(&result).unwrap_or_default()
                )
            );
            if !result.valid {
                return Err(SyndicError::ChainIntegrity {
                    index: result.errors[0],
                    detail: "stored hash does not replay".into(),
                });
            }
        }
        TraceCommand::Snapshot => {
            let snap = create_snapshot(store)?;
            println!(
                "{}",
                time::command_envelope(
                    "trace.snapshot",
                    "ok",
                    serde_json::to_value(&snap).unwrap_or_default()
                )
            );
        }
        TraceCommand::List { limit } => {
            for e in list_entries(store, limit)? {
                println!(
                    "{:>6}  {:<20} {:<12} {}",
                    e.index,
                    e.event_type,
                    e.agent_id,
                    crate::core::output::compact_line(&e.metadata.to_string(), 60)
                );
            }
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "trace",
        "version": "0.1.0",
        "description": "Hash-chained append-only governance ledger",
        "commands": [
            { "name": "append", "parameters": ["task", "agent", "event", "metadata"] },
            { "name": "verify", "parameters": [] },
            { "name": "snapshot", "parameters": [] }
        ],
        "storage": ["trace.db"]
    })
}
