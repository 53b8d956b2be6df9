//! Row-based mutual exclusion across processes
//!
//! A lock is a row in `locks` keyed by entity id. Staleness is judged with
//! the database clock so processes with skewed clocks agree on it. Each
//! [`LockTable`] also remembers, with the local monotonic clock, when its
//! own locks stop being valid; a holder that overran the validity window
//! must not delete a row another process may have taken over.

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, is_constraint_violation, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Database clock as unix milliseconds
const DB_NOW_MS: &str = "CAST((julianday('now') - 2440587.5) * 86400000.0 AS INTEGER)";

#[derive(Debug)]
pub struct LockTable {
    validity: Duration,
    held: Mutex<HashMap<i64, Instant>>,
}

impl LockTable {
    pub fn new(validity: Duration) -> Self {
        Self {
            validity,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    fn held(&self) -> MutexGuard<'_, HashMap<i64, Instant>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether this table currently tracks a lock on `entity_id`
    pub fn is_held(&self, entity_id: i64) -> bool {
        self.held().contains_key(&entity_id)
    }

    /// Try to take the lock on `entity_id` without waiting
    ///
    /// Returns `false` if another holder owns a lock that is still inside
    /// its validity window, or if this table already holds it.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` for database failures other than losing the
    /// insert race.
    pub fn acquire(&self, conn: &Connection, entity_id: i64) -> Result<bool> {
        let start = Instant::now();
        if self.is_held(entity_id) {
            tracing::debug!(entity_id, "Lock already held by this process");
            return Ok(false);
        }

        let inserted = conn.execute(
            &format!("INSERT INTO locks (entity_id, acquired_at_ms) VALUES (?1, {})", DB_NOW_MS),
            [entity_id],
        );
        let acquired = match inserted {
            Ok(_) => true,
            Err(e) if is_constraint_violation(&e) => self.reclaim_stale(conn, entity_id)?,
            Err(e) => return Err(from_rusqlite(e).with_op("acquire_lock").with_entity_id(entity_id)),
        };

        if acquired {
            self.held().insert(entity_id, start + self.validity);
            tracing::debug!(entity_id, "Lock acquired");
        } else {
            tracing::debug!(entity_id, "Lock busy");
        }
        Ok(acquired)
    }

    /// Take over a row whose age reached the validity window
    fn reclaim_stale(&self, conn: &Connection, entity_id: i64) -> Result<bool> {
        let validity_ms = i64::try_from(self.validity.as_millis()).unwrap_or(i64::MAX);
        let updated = conn
            .execute(
                &format!(
                    "UPDATE locks SET acquired_at_ms = {now}
                     WHERE entity_id = ?1 AND {now} - acquired_at_ms >= ?2",
                    now = DB_NOW_MS
                ),
                rusqlite::params![entity_id, validity_ms],
            )
            .map_err(from_rusqlite)?;
        if updated == 1 {
            tracing::info!(entity_id, "Reclaimed stale lock");
        }
        Ok(updated == 1)
    }

    /// Release a lock taken by [`LockTable::acquire`]
    ///
    /// If the local validity window already passed the row is left alone:
    /// another process may legitimately own it by now.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the row cannot be deleted.
    pub fn release(&self, conn: &Connection, entity_id: i64) -> Result<()> {
        let expiry = self.held().remove(&entity_id);
        match expiry {
            Some(expiry) if Instant::now() < expiry => {
                conn.execute("DELETE FROM locks WHERE entity_id = ?1", [entity_id])
                    .map_err(|e| {
                        from_rusqlite(e)
                            .with_op("release_lock")
                            .with_entity_id(entity_id)
                    })?;
                tracing::debug!(entity_id, "Lock released");
            }
            Some(_) => {
                tracing::warn!(
                    entity_id,
                    validity_ms = self.validity.as_millis() as u64,
                    "Lock held past its validity window; leaving row in place. \
                     Increase locks.validity_secs"
                );
            }
            None => {
                tracing::debug!(entity_id, "Release of a lock not held by this process");
            }
        }
        Ok(())
    }

    /// Acquire and wrap the lock in a guard that releases on drop
    ///
    /// # Errors
    ///
    /// Same as [`LockTable::acquire`].
    pub fn try_lock<'a>(
        &'a self,
        conn: &'a Connection,
        entity_id: i64,
    ) -> Result<Option<LockGuard<'a>>> {
        Ok(self.acquire(conn, entity_id)?.then_some(LockGuard {
            table: self,
            conn,
            entity_id,
        }))
    }
}

/// Held lock; released when dropped
#[derive(Debug)]
pub struct LockGuard<'a> {
    table: &'a LockTable,
    conn: &'a Connection,
    entity_id: i64,
}

impl LockGuard<'_> {
    pub fn entity_id(&self) -> i64 {
        self.entity_id
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.table.release(self.conn, self.entity_id) {
            tracing::error!(entity_id = self.entity_id, error = %err, "Failed to release lock");
        }
    }
}
