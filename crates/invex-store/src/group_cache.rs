//! Materialized group membership
//!
//! Dynamic rows are recomputed from the group's predicate when the cache
//! expires; Static and Excluded rows are manual overrides the rebuild never
//! touches. Rebuilds and manual assignment both run under the group's lock.

#![allow(clippy::result_large_err)]

use crate::db::with_transaction;
use crate::errors::{from_rusqlite, not_found, predicate_error, Result};
use crate::lock::{LockGuard, LockTable};
use crate::query::fetch_ids;
use crate::repo::GroupRepo;
use invex_core::cache::EntityCache;
use invex_core::errors::ExErrorKind;
use invex_core::model::{Group, GroupPredicate, Membership, MembershipKind, GROUP_PLACEHOLDER_DEVICE_ID};
use invex_core::query::{Filter, QueryComposer};
use invex_core::schema::Schema;
use invex_core::settings::GroupSettings;
use rand::Rng;
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outcome of [`GroupCache::update_cache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Rebuilt { added: usize, removed: usize },
    NoPredicate,
    Fresh,
    /// Another holder owns the group's lock
    Locked,
}

pub struct GroupCache {
    schema: Schema,
    locks: Arc<LockTable>,
    settings: GroupSettings,
    /// computer id -> groups it belongs to
    computer_groups: EntityCache<(), Vec<i64>>,
}

impl GroupCache {
    pub fn new(schema: Schema, locks: Arc<LockTable>, settings: GroupSettings) -> Self {
        Self {
            schema,
            locks,
            settings,
            computer_groups: EntityCache::new(),
        }
    }

    pub fn settings(&self) -> &GroupSettings {
        &self.settings
    }

    fn load(conn: &Connection, group_id: i64) -> Result<Group> {
        GroupRepo::get(conn, group_id)?.ok_or_else(|| not_found("update_cache", group_id))
    }

    /// Recompute the Dynamic members of a group if its cache expired
    ///
    /// With `force` the expiry is ignored. Lock contention is not an error:
    /// someone else is rebuilding.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the predicate cannot be evaluated; nothing
    /// is committed in that case.
    pub fn update_cache(&self, conn: &Connection, group_id: i64, force: bool) -> Result<RefreshOutcome> {
        let group = Self::load(conn, group_id)?;
        let Some(predicate) = group.predicate.as_ref() else {
            return Ok(RefreshOutcome::NoPredicate);
        };

        let now = chrono::Utc::now().timestamp();
        if !force && group.is_cache_fresh(now) {
            return Ok(RefreshOutcome::Fresh);
        }

        let Some(_guard) = self.locks.try_lock(conn, group_id)? else {
            tracing::debug!(group_id, "Group cache rebuild already in progress elsewhere");
            return Ok(RefreshOutcome::Locked);
        };

        let (added, removed) = with_transaction(conn, |tx| {
            let matching = self.evaluate(tx, group_id, predicate)?;
            let removed = remove_stale_dynamic(tx, group_id, &matching)?;
            let added = insert_new_dynamic(tx, group_id, &matching)?;

            let expires_at = now + self.expiry_offset();
            GroupRepo::set_cache_timestamps(tx, group_id, now, expires_at)?;
            Ok((added, removed))
        })?;

        if added > 0 || removed > 0 {
            self.computer_groups.clear();
        }
        tracing::info!(group_id, added, removed, "Group cache rebuilt");
        Ok(RefreshOutcome::Rebuilt { added, removed })
    }

    /// Interval plus a uniform random offset so groups sharing an interval
    /// do not all expire together
    fn expiry_offset(&self) -> i64 {
        let interval = i64::try_from(self.settings.cache_expiration_interval_secs).unwrap_or(i64::MAX / 2);
        let fuzz = i64::try_from(self.settings.cache_expiration_fuzz_secs).unwrap_or(0);
        let jitter = if fuzz > 0 {
            rand::rng().random_range(0..=fuzz)
        } else {
            0
        };
        interval.saturating_add(jitter)
    }

    fn evaluate(
        &self,
        conn: &Connection,
        group_id: i64,
        predicate: &GroupPredicate,
    ) -> Result<BTreeSet<i64>> {
        let ids = match predicate {
            GroupPredicate::Sql(sql) => {
                let mut stmt = conn
                    .prepare(sql)
                    .map_err(|e| predicate_error(group_id, e.to_string()))?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, i64>(0))
                    .map_err(|e| predicate_error(group_id, e.to_string()))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| predicate_error(group_id, e.to_string()))?
            }
            GroupPredicate::Filters(filters) => {
                let query = QueryComposer::new(&self.schema)
                    .compose_ids(filters)
                    .map_err(|e| predicate_error(group_id, e.message().to_string()).with_source(e))?;
                fetch_ids(conn, &query).map_err(|e| {
                    predicate_error(group_id, e.message().to_string()).with_source(e)
                })?
            }
        };
        Ok(ids.into_iter().collect())
    }

    /// Block until the group's lock is ours
    ///
    /// Retries forever on the configured fixed interval; there is no
    /// timeout or cancellation.
    fn lock_blocking<'a>(&'a self, conn: &'a Connection, group_id: i64) -> Result<LockGuard<'a>> {
        loop {
            if let Some(guard) = self.locks.try_lock(conn, group_id)? {
                return Ok(guard);
            }
            tracing::debug!(group_id, "Group locked; retrying manual assignment");
            std::thread::sleep(self.settings.manual_assignment_retry());
        }
    }

    /// Force the membership kind of some computers in a group
    ///
    /// Returns how many membership rows changed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown group.
    pub fn set_manual_membership(
        &self,
        conn: &Connection,
        group_id: i64,
        kind: MembershipKind,
        computer_ids: &[i64],
    ) -> Result<usize> {
        if GroupRepo::get(conn, group_id)?.is_none() {
            return Err(not_found("set_manual_membership", group_id));
        }

        let _guard = self.lock_blocking(conn, group_id)?;
        let changed = with_transaction(conn, |tx| {
            let mut changed = 0;
            for &computer_id in computer_ids {
                let existing = GroupRepo::membership_kind(tx, group_id, computer_id)?;
                changed += apply_manual(tx, group_id, computer_id, kind, existing)?;
            }
            Ok(changed)
        })?;

        for &computer_id in computer_ids {
            self.computer_groups.invalidate(computer_id);
        }
        tracing::info!(group_id, %kind, changed, "Manual membership applied");
        Ok(changed)
    }

    /// Assign computers selected by filters
    ///
    /// Dynamic stores the filters as the group's predicate and rebuilds;
    /// Static and Excluded apply the current result set as manual rows.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad filters, `NotFound` for an unknown
    /// group.
    pub fn set_members_from_query(
        &self,
        conn: &Connection,
        group_id: i64,
        kind: MembershipKind,
        filters: &[Filter],
    ) -> Result<usize> {
        let query = QueryComposer::new(&self.schema).compose_ids(filters)?;
        match kind {
            MembershipKind::Dynamic => {
                GroupRepo::set_predicate(conn, group_id, Some(&GroupPredicate::Filters(filters.to_vec())))?;
                match self.update_cache(conn, group_id, true)? {
                    RefreshOutcome::Rebuilt { added, removed } => Ok(added + removed),
                    _ => Ok(0),
                }
            }
            MembershipKind::Static | MembershipKind::Excluded => {
                let ids = fetch_ids(conn, &query)?;
                self.set_manual_membership(conn, group_id, kind, &ids)
            }
        }
    }

    /// Membership rows of a group after refreshing an expired cache
    ///
    /// An empty `kinds` slice returns every kind.
    pub fn members(
        &self,
        conn: &Connection,
        group_id: i64,
        kinds: &[MembershipKind],
    ) -> Result<Vec<Membership>> {
        self.update_cache(conn, group_id, false)?;
        GroupRepo::memberships(conn, group_id, kinds)
    }

    /// Rebuild every group whose cache expired or was never built
    ///
    /// Returns whether any membership row changed. A group whose predicate
    /// cannot be evaluated is logged and skipped so one broken group does
    /// not block reads for every computer.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` for database failures.
    pub fn refresh_expired(&self, conn: &Connection) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let mut changed = false;
        for group_id in GroupRepo::expired_dynamic(conn, now)? {
            match self.update_cache(conn, group_id, false) {
                Ok(RefreshOutcome::Rebuilt { added, removed }) => {
                    changed |= added > 0 || removed > 0;
                }
                Ok(_) => {}
                Err(err) if err.kind() == ExErrorKind::Configuration => {
                    tracing::warn!(group_id, error = %err, "Skipping group with a broken predicate");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(changed)
    }

    /// Groups the computer is a Dynamic or Static member of
    ///
    /// Expired group caches are rebuilt first.
    pub fn groups_of_computer(&self, conn: &Connection, computer_id: i64) -> Result<Vec<i64>> {
        self.refresh_expired(conn)?;
        self.computer_groups
            .get_or_try_insert_with(computer_id, (), || GroupRepo::groups_of_computer(conn, computer_id))
    }

    /// Forget cached group lists of one computer
    pub fn invalidate(&self, computer_id: i64) {
        self.computer_groups.invalidate(computer_id);
    }

    pub fn clear(&self) {
        self.computer_groups.clear();
    }
}

fn remove_stale_dynamic(conn: &Connection, group_id: i64, matching: &BTreeSet<i64>) -> Result<usize> {
    let current = GroupRepo::memberships(conn, group_id, &[MembershipKind::Dynamic])?;
    let mut removed = 0;
    for membership in current.iter().filter(|m| !matching.contains(&m.computer_id)) {
        removed += conn
            .execute(
                "DELETE FROM group_memberships
                 WHERE group_id = ?1 AND computer_id = ?2 AND kind = ?3",
                [group_id, membership.computer_id, MembershipKind::Dynamic.as_i64()],
            )
            .map_err(from_rusqlite)?;
    }
    Ok(removed)
}

/// Insert Dynamic rows for matches without any membership row
///
/// Ids that are not real computers (placeholders, unknown ids from a SQL
/// predicate) are skipped.
fn insert_new_dynamic(conn: &Connection, group_id: i64, matching: &BTreeSet<i64>) -> Result<usize> {
    let existing: BTreeSet<i64> = GroupRepo::memberships(conn, group_id, &[])?
        .into_iter()
        .map(|m| m.computer_id)
        .collect();
    let mut added = 0;
    for &computer_id in matching.difference(&existing) {
        added += insert_membership(conn, group_id, computer_id, MembershipKind::Dynamic)?;
    }
    Ok(added)
}

fn insert_membership(
    conn: &Connection,
    group_id: i64,
    computer_id: i64,
    kind: MembershipKind,
) -> Result<usize> {
    conn.execute(
        "INSERT INTO group_memberships (group_id, computer_id, kind)
         SELECT ?1, id, ?3 FROM computers WHERE id = ?2 AND device_id != ?4",
        rusqlite::params![group_id, computer_id, kind.as_i64(), GROUP_PLACEHOLDER_DEVICE_ID],
    )
    .map_err(from_rusqlite)
}

fn apply_manual(
    conn: &Connection,
    group_id: i64,
    computer_id: i64,
    target: MembershipKind,
    existing: Option<MembershipKind>,
) -> Result<usize> {
    match (target, existing) {
        (MembershipKind::Dynamic, Some(current)) if current.is_manual() => conn
            .execute(
                "DELETE FROM group_memberships WHERE group_id = ?1 AND computer_id = ?2",
                [group_id, computer_id],
            )
            .map_err(from_rusqlite),
        (target, Some(current)) if target.is_manual() && current != target => conn
            .execute(
                "UPDATE group_memberships SET kind = ?3 WHERE group_id = ?1 AND computer_id = ?2",
                [group_id, computer_id, target.as_i64()],
            )
            .map_err(from_rusqlite),
        (target, None) if target.is_manual() => {
            insert_membership(conn, group_id, computer_id, target)
        }
        _ => Ok(0),
    }
}
