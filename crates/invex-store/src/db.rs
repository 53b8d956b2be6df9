//! Database connection management
//!
//! Provides utilities for opening and managing SQLite connections

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, io_error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// How long a statement waits on another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a SQLite database at the given path, creating parent directories
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_error("open_database", e))?;
    }
    let conn = Connection::open(path).map_err(from_rusqlite)?;
    configure(&conn)?;
    Ok(conn)
}

/// Open an in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(from_rusqlite)?;
    configure(&conn)?;
    Ok(conn)
}

/// Configure a connection with optimal settings
pub fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(from_rusqlite)?;

    // WAL lets readers proceed while a cache rebuild holds the write lock
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(from_rusqlite)?;

    conn.busy_timeout(BUSY_TIMEOUT).map_err(from_rusqlite)?;
    Ok(())
}

/// Run `f` inside a transaction unless the caller already has one open
///
/// The transaction rolls back if `f` fails.
pub fn with_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    if !conn.is_autocommit() {
        return f(conn);
    }
    let tx = conn.unchecked_transaction().map_err(from_rusqlite)?;
    let value = f(&tx)?;
    tx.commit().map_err(from_rusqlite)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_table(conn: &Connection) {
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_with_transaction_commits() {
        let conn = open_in_memory().unwrap();
        scratch_table(&conn);
        with_transaction(&conn, |tx| {
            tx.execute("INSERT INTO t VALUES (1)", []).map_err(from_rusqlite)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(count(&conn), 1);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_with_transaction_rolls_back_on_error() {
        let conn = open_in_memory().unwrap();
        scratch_table(&conn);
        let result: Result<()> = with_transaction(&conn, |tx| {
            tx.execute("INSERT INTO t VALUES (1)", []).map_err(from_rusqlite)?;
            tx.execute("INSERT INTO missing VALUES (1)", [])
                .map_err(from_rusqlite)?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_with_transaction_does_not_nest() {
        let conn = open_in_memory().unwrap();
        scratch_table(&conn);
        conn.execute_batch("BEGIN").unwrap();
        with_transaction(&conn, |tx| {
            tx.execute("INSERT INTO t VALUES (1)", []).map_err(from_rusqlite)?;
            Ok(())
        })
        .unwrap();
        // Still inside the caller's transaction
        assert!(!conn.is_autocommit());
        conn.execute_batch("ROLLBACK").unwrap();
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("inventory.db");
        let conn = open(&path).unwrap();
        assert!(conn.is_autocommit());
        assert!(path.exists());
    }
}
