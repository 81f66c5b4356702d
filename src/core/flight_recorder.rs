//! Governance flight recorder.
//!
//! A read-only timeline renderer over the store's event journals. It
//! merges the broker audit log and the lifecycle journal, orders by
//! timestamp, and highlights gaps rather than fabricating missing
//! structure.

use crate::core::error::SyndicError;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "timeline", about = "Render the governance timeline from event journals")]
pub struct TimelineCli {
    #[clap(subcommand)]
    command: TimelineCommand,
}

#[derive(Subcommand, Debug)]
enum TimelineCommand {
    /// Render the merged timeline.
    Show {
        /// Output format: 'text' or 'json'
        #[clap(long, default_value = "text")]
        format: String,
        /// Limit to N most recent events per source
        #[clap(long, default_value = "100")]
        limit: usize,
    },
    /// Export the timeline as a markdown transcript.
    Transcript {
        /// Output file path (stdout if not specified)
        #[clap(long)]
        output: Option<String>,
        /// Include only events from this actor
        #[clap(long)]
        actor: Option<String>,
    },
}

pub fn run_timeline_cli(store: &Store, cli: TimelineCli) -> Result<(), SyndicError> {
    match cli.command {
        TimelineCommand::Show { format, limit } => render_timeline(store, &format, limit),
        TimelineCommand::Transcript { output, actor } => {
            render_transcript(store, output.as_deref(), actor.as_deref())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub source: String,
    pub ts: String,
    pub event_id: String,
    pub op: String,
    pub actor: Option<String>,
    pub channel: Option<String>,
    pub status: Option<String>,
    pub details: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct Timeline {
    pub rendered_at: String,
    pub event_count: usize,
    pub sources: Vec<String>,
    pub events: Vec<TimelineEvent>,
    pub gaps: Vec<String>,
}

fn journal_sources(store: &Store) -> Vec<(&'static str, PathBuf)> {
    vec![
        ("broker", store.root.join(schemas::BROKER_EVENTS_NAME)),
        ("lifecycle", store.root.join(schemas::LIFECYCLE_EVENTS_NAME)),
    ]
}

fn collect_events(
    store: &Store,
    limit: usize,
    actor_filter: Option<&str>,
    gaps: Option<&mut Vec<String>>,
) -> (Vec<TimelineEvent>, Vec<String>) {
    let mut all_events = Vec::new();
    let mut sources = Vec::new();
    let mut local_gaps = Vec::new();

    for (name, path) in journal_sources(store) {
        if path.exists() {
            sources.push(name.to_string());
            match read_events(&path, limit) {
                Ok(events) => {
                    for mut ev in events {
                        if let Some(filter) = actor_filter {
                            if ev.actor.as_deref() != Some(filter) {
                                continue;
                            }
                        }
                        ev.source = name.to_string();
                        all_events.push(ev);
                    }
                }
                Err(e) => local_gaps.push(format!("{}: read error - {}", name, e)),
            }
        } else {
            local_gaps.push(format!("{}: journal not found", name));
        }
    }

    all_events.sort_by(|a, b| a.ts.cmp(&b.ts));
    if let Some(gaps) = gaps {
        gaps.extend(local_gaps);
    }
    (all_events, sources)
}

fn render_timeline(store: &Store, format: &str, limit: usize) -> Result<(), SyndicError> {
    let mut gaps = Vec::new();
    let (all_events, sources) = collect_events(store, limit, None, Some(&mut gaps));

    if format == "json" {
        let timeline = Timeline {
            rendered_at: time::now_epoch_z(),
            event_count: all_events.len(),
            sources,
            events: all_events,
            gaps,
        };
        println!("{}", serde_json::to_string_pretty(&timeline).unwrap());
        return Ok(());
    }

    println!("{}", "GOVERNANCE TIMELINE".bold());
    println!("Rendered: {}", time::now_epoch_z());
    println!("Total events: {}", all_events.len());
    println!("Sources: {}", sources.join(", "));
    if !gaps.is_empty() {
        println!("{}", "gaps:".bright_yellow());
        for gap in &gaps {
            println!("  - {}", gap);
        }
    }
    println!();
    println!("{:<14} {:<26} {:<16} {:<10}", "TIME", "OP", "ACTOR", "SOURCE");
    for ev in &all_events {
        println!(
            "{:<14} {:<26} {:<16} {:<10}",
            truncate(&ev.ts, 14),
            truncate(&ev.op, 26),
            truncate(ev.actor.as_deref().unwrap_or("-"), 16),
            ev.source
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

fn read_events(path: &PathBuf, limit: usize) -> Result<Vec<TimelineEvent>, SyndicError> {
    let file = File::open(path).map_err(SyndicError::IoError)?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(SyndicError::IoError)?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        events.push(TimelineEvent {
            source: "unknown".to_string(),
            ts: json
                .get("ts")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            event_id: json
                .get("event_id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            op: json
                .get("op")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            actor: json.get("actor").and_then(|v| v.as_str()).map(String::from),
            channel: json
                .get("channel")
                .and_then(|v| v.as_str())
                .map(String::from),
            status: json
                .get("status")
                .and_then(|v| v.as_str())
                .map(String::from),
            details: json,
        });
    }

    // Journals append oldest-first; the limit keeps the newest entries.
    let keep_from = events.len().saturating_sub(limit);
    Ok(events.split_off(keep_from))
}

fn render_transcript(
    store: &Store,
    output_path: Option<&str>,
    actor_filter: Option<&str>,
) -> Result<(), SyndicError> {
    let (all_events, _) = collect_events(store, 10_000, actor_filter, None);

    let mut md = String::new();
    md.push_str("# Governance Transcript\n\n");
    md.push_str(&format!("Generated: {}\n", time::now_epoch_z()));
    md.push_str(&format!("Total events: {}\n", all_events.len()));
    if let Some(f) = actor_filter {
        md.push_str(&format!("Actor filter: {}\n", f));
    }
    md.push_str("\n---\n\n");

    for ev in &all_events {
        md.push_str(&format!("### {} - {}\n\n", ev.ts, ev.op));
        md.push_str(&format!("- **Source:** {}\n", ev.source));
        md.push_str(&format!("- **Event ID:** {}\n", ev.event_id));
        if let Some(actor) = &ev.actor {
            md.push_str(&format!("- **Actor:** {}\n", actor));
        }
        if let Some(channel) = &ev.channel {
            md.push_str(&format!("- **Channel:** {}\n", channel));
        }
        if let Some(status) = &ev.status {
            md.push_str(&format!("- **Status:** {}\n", status));
        }
        md.push('\n');
    }

    if let Some(path) = output_path {
        std::fs::write(path, &md).map_err(SyndicError::IoError)?;
        println!("Transcript written to: {}", path);
    } else {
        println!("{}", md);
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "timeline",
        "version": "0.1.0",
        "description": "Read-only governance timeline over the event journals",
        "commands": [
            { "name": "show", "parameters": ["format", "limit"] },
            { "name": "transcript", "parameters": ["output", "actor"] }
        ],
        "storage": ["read-only over existing event journals"]
    })
}
