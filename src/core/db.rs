use crate::core::error::SyndicError;
use rusqlite::Connection;
use std::time::Duration;

/// Open a connection with the settings every bin relies on: WAL for
/// concurrent readers, a busy timeout instead of immediate SQLITE_BUSY,
/// and enforced foreign keys.
pub fn db_connect(db_path: &str) -> Result<Connection, SyndicError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

// Subsystems own their schemas and initialization; this module only hands
// out hardened connections.
