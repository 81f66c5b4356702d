use crate::core::db;
use crate::core::error;
use crate::core::time;
use rusqlite::Connection;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

/// The DB Broker is the "thin waist" for state mutation.
///
/// Writes are serialized per database file: two operations against the same
/// store contend for one lock, while independent stores proceed without
/// synchronization. Reads go through the same path; SQLite WAL keeps them
/// cheap.
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

static DB_LOCKS: LazyLock<Mutex<FxHashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

fn lock_for(db_path: &Path) -> Arc<Mutex<()>> {
    let mut map = DB_LOCKS.lock().unwrap();
    map.entry(db_path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join("broker.events.jsonl"),
        }
    }

    /// Execute a closure with a serialized connection to the specified DB.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, error::SyndicError>
    where
        F: FnOnce(&Connection) -> Result<R, error::SyndicError>,
    {
        let lock = lock_for(db_path);
        let _guard = lock.lock().unwrap();

        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let conn = db::db_connect(&db_path.to_string_lossy())?;

        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, op_name, &db_id, status)?;

        result
    }

    fn log_event(
        &self,
        actor: &str,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), error::SyndicError> {
        use std::fs::OpenOptions;
        use std::io::Write;

        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(error::SyndicError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev).unwrap())
            .map_err(error::SyndicError::IoError)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_shared_per_path() {
        let a = lock_for(Path::new("/tmp/a.db"));
        let b = lock_for(Path::new("/tmp/a.db"));
        let c = lock_for(Path::new("/tmp/c.db"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
