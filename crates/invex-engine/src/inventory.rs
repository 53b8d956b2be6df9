//! The `Inventory` facade
//!
//! Owns one connection plus the process-local state (lock bookkeeping,
//! membership read cache, effective-config cache) and exposes every
//! inventory operation. Each public operation logs exactly one start event
//! and one end or end_error event; errors leave with the request's
//! correlation ids attached.
//!
//! Cache invalidation is done here: any write that can change group
//! membership also drops the effective-config values derived from it.

#![allow(clippy::result_large_err)]

use invex_core::config::{ConfigOption, ConfigValue};
use invex_core::errors::{ExError, Result};
use invex_core::model::{
    Computer, EntityRef, Group, GroupPredicate, Membership, MembershipKind, NetworkInterface,
    Software,
};
use invex_core::query::{Filter, QueryComposer, SqlValue};
use invex_core::schema::{FieldType, Schema};
use invex_core::settings::Settings;
use invex_core::{log_op_end, log_op_error, log_op_start};
use invex_core_types::RequestContext;
use invex_store::repo::{ComputerRepo, GroupRepo};
use invex_store::{
    db, fetch_ids, fetch_rows, migrations, ConfigResolver, GroupCache, LockTable, RefreshOutcome,
    ResultRow,
};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Instant;

pub struct Inventory {
    conn: Connection,
    settings: Settings,
    schema: Schema,
    locks: Arc<LockTable>,
    groups: GroupCache,
    config: ConfigResolver,
    context: RequestContext,
}

impl Inventory {
    /// Open the database named in `settings` and bring its schema up to date
    ///
    /// # Errors
    ///
    /// Returns `Io` if the database directory cannot be created and
    /// `Persistence` if a migration fails.
    pub fn open(settings: Settings) -> Result<Self> {
        let conn = db::open(&settings.database.path)?;
        Self::from_connection(conn, settings)
    }

    /// Private in-memory database, mostly for tests and dry runs
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if a migration fails.
    pub fn open_in_memory(settings: Settings) -> Result<Self> {
        let conn = db::open_in_memory()?;
        Self::from_connection(conn, settings)
    }

    /// Wrap an already configured connection
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if a migration fails.
    pub fn from_connection(mut conn: Connection, settings: Settings) -> Result<Self> {
        let applied = migrations::apply_migrations(&mut conn)?;
        if !applied.is_empty() {
            tracing::info!(migrations = ?applied, "Applied migrations");
        }

        let schema = Schema::new();
        let locks = Arc::new(LockTable::new(settings.locks.validity()));
        let groups = GroupCache::new(schema.clone(), Arc::clone(&locks), settings.groups.clone());
        Ok(Self {
            conn,
            settings,
            schema,
            locks,
            groups,
            config: ConfigResolver::new(),
            context: RequestContext::new(),
        })
    }

    /// Correlate subsequent log lines and errors with a caller's request
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn set_context(&mut self, context: RequestContext) {
        self.context = context;
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    fn correlate(&self, err: ExError) -> ExError {
        let err = err.with_request_id(self.context.request_id.clone());
        match &self.context.trace_id {
            Some(trace_id) => err.with_trace_id(trace_id.clone()),
            None => err,
        }
    }

    fn observe<T>(&self, op: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let request_id = self.context.request_id.as_str();
        log_op_start!(op, request_id = request_id);
        let start = Instant::now();

        let result = f().map_err(|e| self.correlate(e));

        let elapsed = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => log_op_end!(op, duration_ms = elapsed, request_id = request_id),
            Err(e) => log_op_error!(op, e.clone(), duration_ms = elapsed, request_id = request_id),
        }
        result
    }

    fn rebuild_group_cache(&mut self) {
        self.groups = GroupCache::new(
            self.schema.clone(),
            Arc::clone(&self.locks),
            self.settings.groups.clone(),
        );
    }

    // ── Schema ─────────────────────────────────────────────────────────────

    /// Make an existing `custom_fields` column queryable as `CustomFields.<name>`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `column` is not a plain identifier.
    pub fn register_custom_field(
        &mut self,
        name: &str,
        column: &str,
        field_type: FieldType,
    ) -> Result<()> {
        self.schema = self
            .schema
            .clone()
            .with_custom_field(name, column, field_type)?;
        self.rebuild_group_cache();
        Ok(())
    }

    /// Register a custom field and add its column
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a bad column name, `Persistence` if the
    /// column already exists.
    pub fn add_custom_field(&mut self, name: &str, column: &str, field_type: FieldType) -> Result<()> {
        let schema = self
            .schema
            .clone()
            .with_custom_field(name, column, field_type)?;
        self.observe("add_custom_field", || {
            ComputerRepo::add_custom_field_column(&self.conn, &schema, name)
        })?;
        self.schema = schema;
        self.rebuild_group_cache();
        Ok(())
    }

    // ── Computers ──────────────────────────────────────────────────────────

    /// List computers matching every filter
    ///
    /// Group placeholder rows are never returned. `order` and `direction`
    /// default to the primary key ascending.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown fields, bad operators or
    /// arguments.
    pub fn list_computers<S: AsRef<str>>(
        &self,
        filters: &[Filter],
        output_fields: &[S],
        order: Option<&str>,
        direction: Option<&str>,
    ) -> Result<Vec<ResultRow>> {
        self.observe("list_computers", || {
            let query =
                QueryComposer::new(&self.schema).compose(filters, output_fields, order, direction)?;
            let rows = fetch_rows(&self.conn, &query)?;
            tracing::debug!(row_count = rows.len(), join_eliminated = query.join_eliminated, "Listed computers");
            Ok(rows)
        })
    }

    /// Ids of computers matching every filter, ascending
    pub fn computer_ids(&self, filters: &[Filter]) -> Result<Vec<i64>> {
        self.observe("computer_ids", || {
            let query = QueryComposer::new(&self.schema).compose_ids(filters)?;
            fetch_ids(&self.conn, &query)
        })
    }

    pub fn insert_computer(&self, computer: &Computer) -> Result<i64> {
        self.observe("insert_computer", || ComputerRepo::insert(&self.conn, computer))
    }

    pub fn get_computer(&self, id: i64) -> Result<Option<Computer>> {
        self.observe("get_computer", || {
            Ok(ComputerRepo::get(&self.conn, id)?.filter(|c| !c.is_group_placeholder()))
        })
    }

    pub fn insert_software(&self, computer_id: i64, software: &Software) -> Result<i64> {
        self.observe("insert_software", || {
            ComputerRepo::insert_software(&self.conn, computer_id, software)
        })
    }

    pub fn insert_network_interface(
        &self,
        computer_id: i64,
        interface: &NetworkInterface,
    ) -> Result<i64> {
        self.observe("insert_network_interface", || {
            ComputerRepo::insert_network_interface(&self.conn, computer_id, interface)
        })
    }

    pub fn set_custom_field(&self, computer_id: i64, field: &str, value: &SqlValue) -> Result<()> {
        self.observe("set_custom_field", || {
            ComputerRepo::set_custom_field(&self.conn, &self.schema, computer_id, field, value)
        })
    }

    /// Delete a computer with everything hanging off it
    ///
    /// Returns `false` if another holder has the computer locked.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id and `InvalidInput` for a group.
    pub fn delete_computer(&self, id: i64) -> Result<bool> {
        self.observe("delete_computer", || {
            let deleted = ComputerRepo::delete(&self.conn, &self.locks, id)?;
            if deleted {
                self.groups.invalidate(id);
                self.config.invalidate(id);
            }
            Ok(deleted)
        })
    }

    // ── Groups ─────────────────────────────────────────────────────────────

    pub fn create_group(
        &self,
        name: &str,
        description: Option<&str>,
        predicate: Option<&GroupPredicate>,
    ) -> Result<i64> {
        self.observe("create_group", || {
            GroupRepo::create(&self.conn, name, description, predicate)
        })
    }

    pub fn get_group(&self, id: i64) -> Result<Option<Group>> {
        self.observe("get_group", || GroupRepo::get(&self.conn, id))
    }

    pub fn find_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        self.observe("find_group_by_name", || GroupRepo::find_by_name(&self.conn, name))
    }

    pub fn list_groups(&self) -> Result<Vec<Group>> {
        self.observe("list_groups", || GroupRepo::list(&self.conn))
    }

    /// Replace a group's predicate; the next refresh rebuilds it
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown group.
    pub fn set_predicate(&self, group_id: i64, predicate: Option<&GroupPredicate>) -> Result<()> {
        self.observe("set_predicate", || {
            GroupRepo::set_predicate(&self.conn, group_id, predicate)
        })
    }

    fn after_refresh(&self, outcome: RefreshOutcome) {
        if let RefreshOutcome::Rebuilt { added, removed } = outcome {
            if added > 0 || removed > 0 {
                self.config.clear();
            }
        }
    }

    /// Bring expired group caches up to date before a membership-derived read
    fn refresh_expired_groups(&self) -> Result<()> {
        if self.groups.refresh_expired(&self.conn)? {
            self.config.clear();
        }
        Ok(())
    }

    /// Rebuild a group's Dynamic members if its cache expired (always with
    /// `force`)
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the stored predicate cannot be evaluated.
    pub fn update_cache(&self, group_id: i64, force: bool) -> Result<RefreshOutcome> {
        self.observe("update_cache", || {
            let outcome = self.groups.update_cache(&self.conn, group_id, force)?;
            self.after_refresh(outcome);
            Ok(outcome)
        })
    }

    /// Force the membership kind of computers in a group
    ///
    /// Blocks while another holder rebuilds the group.
    pub fn set_manual_membership(
        &self,
        group_id: i64,
        kind: MembershipKind,
        computer_ids: &[i64],
    ) -> Result<usize> {
        self.observe("set_manual_membership", || {
            let changed =
                self.groups
                    .set_manual_membership(&self.conn, group_id, kind, computer_ids)?;
            for &computer_id in computer_ids {
                self.config.invalidate(computer_id);
            }
            Ok(changed)
        })
    }

    /// Assign the computers selected by `filters` to a group
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad filters, `NotFound` for an unknown
    /// group.
    pub fn set_members_from_query(
        &self,
        group_id: i64,
        kind: MembershipKind,
        filters: &[Filter],
    ) -> Result<usize> {
        self.observe("set_members_from_query", || {
            let changed = self
                .groups
                .set_members_from_query(&self.conn, group_id, kind, filters)?;
            if changed > 0 {
                self.config.clear();
            }
            Ok(changed)
        })
    }

    /// Membership rows of a group, refreshing an expired cache first
    ///
    /// An empty `kinds` slice returns every kind.
    pub fn members(&self, group_id: i64, kinds: &[MembershipKind]) -> Result<Vec<Membership>> {
        self.observe("members", || {
            let outcome = self.groups.update_cache(&self.conn, group_id, false)?;
            self.after_refresh(outcome);
            GroupRepo::memberships(&self.conn, group_id, kinds)
        })
    }

    /// Groups the computer belongs to, after rebuilding expired group caches
    pub fn groups_of_computer(&self, computer_id: i64) -> Result<Vec<i64>> {
        self.observe("groups_of_computer", || {
            self.refresh_expired_groups()?;
            self.groups.groups_of_computer(&self.conn, computer_id)
        })
    }

    /// Delete a group, its memberships and overrides
    ///
    /// Returns `false` if another holder has the group locked.
    pub fn delete_group(&self, group_id: i64) -> Result<bool> {
        self.observe("delete_group", || {
            let deleted = GroupRepo::delete(&self.conn, &self.locks, group_id)?;
            if deleted {
                self.groups.clear();
                self.config.clear();
            }
            Ok(deleted)
        })
    }

    // ── Configuration ──────────────────────────────────────────────────────

    /// The entity's own override
    pub fn get_config(&self, entity: EntityRef, option: ConfigOption) -> Result<Option<ConfigValue>> {
        self.observe("get_config", || self.config.get_stored(&self.conn, entity, option))
    }

    /// What the entity would inherit without an override
    ///
    /// Group caches that expired are rebuilt first so a computer inherits
    /// from every group its data currently matches.
    pub fn get_default(&self, entity: EntityRef, option: ConfigOption) -> Result<Option<ConfigValue>> {
        self.observe("get_default", || {
            if let EntityRef::Computer(_) = entity {
                self.refresh_expired_groups()?;
            }
            self.config.get_default(&self.conn, entity, option)
        })
    }

    /// Value the agent uses, after rebuilding expired group caches
    pub fn get_effective(&self, entity: EntityRef, option: ConfigOption) -> Result<Option<ConfigValue>> {
        self.observe("get_effective", || {
            if let EntityRef::Computer(_) = entity {
                self.refresh_expired_groups()?;
            }
            self.config.get_effective(&self.conn, entity, option)
        })
    }

    pub fn get_global(&self, option: ConfigOption) -> Result<Option<ConfigValue>> {
        self.observe("get_global", || self.config.get_global(&self.conn, option))
    }

    /// Write or clear an entity override
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the value type does not match the option.
    pub fn set_config(
        &self,
        entity: EntityRef,
        option: ConfigOption,
        value: Option<ConfigValue>,
    ) -> Result<()> {
        self.observe("set_config", || {
            self.config.set_config(&self.conn, entity, option, value)
        })
    }

    /// Write or clear the global default
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the value type does not match the option.
    pub fn set_global(&self, option: ConfigOption, value: Option<ConfigValue>) -> Result<()> {
        self.observe("set_global", || self.config.set_global(&self.conn, option, value))
    }
}
