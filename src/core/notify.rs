//! Fire-and-forget lifecycle event sink.
//!
//! Dashboards and external observers tail `events.jsonl`; delivery is
//! best-effort with no acknowledgment, so failures here never fail the
//! operation that emitted the event.

use crate::core::redact;
use crate::core::schemas;
use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

pub const CHANNEL_TASK: &str = "task:update";
pub const CHANNEL_BUDGET: &str = "budget:alert";
pub const CHANNEL_GOVERNANCE: &str = "governance:event";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LifecycleEvent {
    pub ts: String,
    pub event_id: String,
    pub channel: String,
    pub op: String,
    pub actor: String,
    pub payload: JsonValue,
}

/// Append a lifecycle event to the journal. Errors are swallowed.
pub fn publish(root: &Path, channel: &str, op: &str, actor: &str, payload: JsonValue) {
    let ev = LifecycleEvent {
        ts: time::now_epoch_z(),
        event_id: time::new_event_id(),
        channel: channel.to_string(),
        op: op.to_string(),
        actor: actor.to_string(),
        payload: redact::redact(payload),
    };
    let path = root.join(schemas::LIFECYCLE_EVENTS_NAME);
    let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    if let Ok(json) = serde_json::to_string(&ev) {
        let _ = writeln!(file, "{}", json);
    }
}

pub fn read_last(root: &Path, n: usize) -> Vec<String> {
    let path = root.join(schemas::LIFECYCLE_EVENTS_NAME);
    let Ok(content) = std::fs::read_to_string(path) else {
        return vec![];
    };
    let lines: Vec<String> = content.lines().map(|s| s.to_string()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_publish_appends_and_redacts() {
        let tmp = tempdir().unwrap();
        publish(
            tmp.path(),
            CHANNEL_TASK,
            "task.completed",
            "agent-1",
            serde_json::json!({"task_id": "T1", "api_key": "abcdefghijklmnopqrstuvwxyz123456"}),
        );
        let lines = read_last(tmp.path(), 10);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("task:update"));
        assert!(lines[0].contains("[REDACTED]"));
        assert!(!lines[0].contains("abcdefghijklmnopqrstuvwxyz123456"));
    }

    #[test]
    fn test_read_last_missing_journal_is_empty() {
        let tmp = tempdir().unwrap();
        assert!(read_last(tmp.path(), 5).is_empty());
    }
}
