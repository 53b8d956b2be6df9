//! Group and membership persistence

#![allow(clippy::result_large_err)]

use crate::db::with_transaction;
use crate::errors::{from_rusqlite, not_found, Result};
use crate::lock::LockTable;
use invex_core::errors::{ExError, ExErrorKind};
use invex_core::model::{Group, GroupPredicate, Membership, MembershipKind, GROUP_PLACEHOLDER_DEVICE_ID};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};

const GROUP_SELECT: &str = "SELECT g.id, c.name, g.description, g.predicate_sql, g.predicate_filters,
        g.cache_created_at, g.cache_expires_at
     FROM groups g JOIN computers c ON c.id = g.id";

/// Split a predicate into its two storage columns
fn predicate_columns(
    predicate: Option<&GroupPredicate>,
) -> Result<(Option<String>, Option<String>)> {
    match predicate {
        None => Ok((None, None)),
        Some(GroupPredicate::Sql(sql)) => Ok((Some(sql.clone()), None)),
        Some(GroupPredicate::Filters(filters)) => {
            Ok((None, Some(serde_json::to_string(filters)?)))
        }
    }
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    let predicate_sql: Option<String> = row.get(3)?;
    let predicate_filters: Option<String> = row.get(4)?;

    // Structured filters take precedence over SQL text
    let predicate = match (predicate_filters, predicate_sql) {
        (Some(json), _) => {
            let filters = serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
            })?;
            Some(GroupPredicate::Filters(filters))
        }
        (None, Some(sql)) if !sql.trim().is_empty() => Some(GroupPredicate::Sql(sql)),
        (None, _) => None,
    };

    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        predicate,
        cache_created_at: row.get(5)?,
        cache_expires_at: row.get(6)?,
    })
}

/// A stored predicate that no longer decodes is a configuration problem
fn map_group_error(group_id: Option<i64>, err: rusqlite::Error) -> ExError {
    if !matches!(err, rusqlite::Error::FromSqlConversionFailure(..)) {
        return from_rusqlite(err);
    }
    let ex = ExError::new(ExErrorKind::Configuration)
        .with_op("load_group")
        .with_message(format!("Stored group predicate is malformed: {}", err));
    match group_id {
        Some(id) => ex.with_entity_id(id),
        None => ex,
    }
}

/// SQLite repository for groups and memberships
pub struct GroupRepo;

impl GroupRepo {
    /// Create a group with its placeholder row and return its id
    pub fn create(
        conn: &Connection,
        name: &str,
        description: Option<&str>,
        predicate: Option<&GroupPredicate>,
    ) -> Result<i64> {
        let (predicate_sql, predicate_filters) = predicate_columns(predicate)?;
        with_transaction(conn, |tx| {
            tx.execute(
                "INSERT INTO computers (name, device_id) VALUES (?1, ?2)",
                rusqlite::params![name, GROUP_PLACEHOLDER_DEVICE_ID],
            )
            .map_err(from_rusqlite)?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO groups (id, description, predicate_sql, predicate_filters)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, description, predicate_sql, predicate_filters],
            )
            .map_err(from_rusqlite)?;
            Ok(id)
        })
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Option<Group>> {
        conn.query_row(&format!("{} WHERE g.id = ?1", GROUP_SELECT), [id], group_from_row)
            .optional()
            .map_err(|e| map_group_error(Some(id), e))
    }

    /// First group with exactly this name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Group>> {
        conn.query_row(
            &format!("{} WHERE c.name = ?1 ORDER BY g.id LIMIT 1", GROUP_SELECT),
            [name],
            group_from_row,
        )
        .optional()
        .map_err(|e| map_group_error(None, e))
    }

    pub fn list(conn: &Connection) -> Result<Vec<Group>> {
        let mut stmt = conn
            .prepare(&format!("{} ORDER BY g.id", GROUP_SELECT))
            .map_err(from_rusqlite)?;
        let groups = stmt
            .query_map([], group_from_row)
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| map_group_error(None, e))?;
        Ok(groups)
    }

    /// Replace the predicate and mark the cache as expired
    pub fn set_predicate(
        conn: &Connection,
        id: i64,
        predicate: Option<&GroupPredicate>,
    ) -> Result<()> {
        let (predicate_sql, predicate_filters) = predicate_columns(predicate)?;
        let updated = conn
            .execute(
                "UPDATE groups
                 SET predicate_sql = ?2, predicate_filters = ?3, cache_expires_at = NULL
                 WHERE id = ?1",
                rusqlite::params![id, predicate_sql, predicate_filters],
            )
            .map_err(from_rusqlite)?;
        if updated == 0 {
            return Err(not_found("set_predicate", id));
        }
        Ok(())
    }

    /// Ids of groups with a predicate whose cache was never built or has
    /// expired at `now`
    pub fn expired_dynamic(conn: &Connection, now: i64) -> Result<Vec<i64>> {
        let mut stmt = conn
            .prepare(
                "SELECT id FROM groups
                 WHERE (predicate_filters IS NOT NULL
                        OR (predicate_sql IS NOT NULL AND trim(predicate_sql) != ''))
                   AND (cache_expires_at IS NULL OR cache_expires_at <= ?1)
                 ORDER BY id",
            )
            .map_err(from_rusqlite)?;
        let ids = stmt
            .query_map([now], |row| row.get(0))
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .map_err(from_rusqlite)?;
        Ok(ids)
    }

    pub fn set_cache_timestamps(
        conn: &Connection,
        id: i64,
        created_at: i64,
        expires_at: i64,
    ) -> Result<()> {
        conn.execute(
            "UPDATE groups SET cache_created_at = ?2, cache_expires_at = ?3 WHERE id = ?1",
            rusqlite::params![id, created_at, expires_at],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }

    /// Membership rows of a group, optionally restricted to some kinds
    pub fn memberships(
        conn: &Connection,
        group_id: i64,
        kinds: &[MembershipKind],
    ) -> Result<Vec<Membership>> {
        let mut stmt = conn
            .prepare(
                "SELECT computer_id, kind FROM group_memberships
                 WHERE group_id = ?1 ORDER BY computer_id",
            )
            .map_err(from_rusqlite)?;
        let rows = stmt
            .query_map([group_id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;

        Ok(rows
            .into_iter()
            .filter_map(|(computer_id, kind)| {
                MembershipKind::from_i64(kind).map(|kind| Membership {
                    group_id,
                    computer_id,
                    kind,
                })
            })
            .filter(|m| kinds.is_empty() || kinds.contains(&m.kind))
            .collect())
    }

    /// Kind of the membership row for one pair, if any
    pub fn membership_kind(
        conn: &Connection,
        group_id: i64,
        computer_id: i64,
    ) -> Result<Option<MembershipKind>> {
        let kind: Option<i64> = conn
            .query_row(
                "SELECT kind FROM group_memberships WHERE group_id = ?1 AND computer_id = ?2",
                [group_id, computer_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(from_rusqlite)?;
        Ok(kind.and_then(MembershipKind::from_i64))
    }

    /// Groups in which the computer is a Dynamic or Static member
    pub fn groups_of_computer(conn: &Connection, computer_id: i64) -> Result<Vec<i64>> {
        let mut stmt = conn
            .prepare(
                "SELECT group_id FROM group_memberships
                 WHERE computer_id = ?1 AND kind IN (?2, ?3) ORDER BY group_id",
            )
            .map_err(from_rusqlite)?;
        let ids = stmt
            .query_map(
                [
                    computer_id,
                    MembershipKind::Dynamic.as_i64(),
                    MembershipKind::Static.as_i64(),
                ],
                |row| row.get(0),
            )
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .map_err(from_rusqlite)?;
        Ok(ids)
    }

    /// Delete a group, its memberships, overrides and placeholder row
    ///
    /// Returns `false` without touching anything if the group's lock is held
    /// elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown group id.
    pub fn delete(conn: &Connection, locks: &LockTable, id: i64) -> Result<bool> {
        if Self::get(conn, id)?.is_none() {
            return Err(not_found("delete_group", id));
        }

        let Some(_guard) = locks.try_lock(conn, id)? else {
            tracing::info!(group_id = id, "Group is locked; skipping delete");
            return Ok(false);
        };

        with_transaction(conn, |tx| {
            for sql in [
                "DELETE FROM group_memberships WHERE group_id = ?1",
                "DELETE FROM config_overrides WHERE entity_id = ?1",
                "DELETE FROM groups WHERE id = ?1",
                "DELETE FROM computers WHERE id = ?1",
            ] {
                tx.execute(sql, [id]).map_err(from_rusqlite)?;
            }
            Ok(())
        })?;
        Ok(true)
    }
}
