//! Stored configuration overrides and their resolution

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use invex_core::cache::EntityCache;
use invex_core::config::{self, normalize_for_write, ConfigOption, ConfigValue, ValueType};
use invex_core::model::{EntityRef, MembershipKind};
use rusqlite::{Connection, OptionalExtension, Row};

fn value_from_columns(option: ConfigOption, row: &Row<'_>) -> rusqlite::Result<Option<ConfigValue>> {
    let ivalue: Option<i64> = row.get(0)?;
    let tvalue: Option<String> = row.get(1)?;
    Ok(match option.value_type() {
        ValueType::Text => tvalue.map(ConfigValue::Text),
        ValueType::Integer | ValueType::Bool => ivalue.map(ConfigValue::Integer),
    })
}

fn value_columns(value: &ConfigValue) -> (Option<i64>, Option<&str>) {
    match value {
        ConfigValue::Integer(v) => (Some(*v), None),
        ConfigValue::Text(v) => (None, Some(v.as_str())),
    }
}

/// Resolves options across global, group and entity layers
///
/// Effective values are cached per (entity, option) until a write through
/// this resolver invalidates them. Writes made by other processes are not
/// seen until restart.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    effective: EntityCache<ConfigOption, Option<ConfigValue>>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entity's own override, if any
    pub fn get_stored(
        &self,
        conn: &Connection,
        entity: EntityRef,
        option: ConfigOption,
    ) -> Result<Option<ConfigValue>> {
        conn.query_row(
            "SELECT ivalue, tvalue FROM config_overrides WHERE entity_id = ?1 AND option_name = ?2",
            rusqlite::params![entity.id(), option.storage_name()],
            |row| value_from_columns(option, row),
        )
        .optional()
        .map(Option::flatten)
        .map_err(from_rusqlite)
    }

    /// System-wide default
    pub fn get_global(&self, conn: &Connection, option: ConfigOption) -> Result<Option<ConfigValue>> {
        conn.query_row(
            "SELECT ivalue, tvalue FROM global_config WHERE option_name = ?1",
            [option.storage_name()],
            |row| value_from_columns(option, row),
        )
        .optional()
        .map(Option::flatten)
        .map_err(from_rusqlite)
    }

    /// Overrides stored on every group the computer belongs to
    ///
    /// Reads membership rows as they are; callers refresh expired group
    /// caches with [`crate::GroupCache::refresh_expired`] first.
    fn group_values(
        &self,
        conn: &Connection,
        entity: EntityRef,
        option: ConfigOption,
    ) -> Result<Vec<ConfigValue>> {
        let EntityRef::Computer(computer_id) = entity else {
            return Ok(Vec::new());
        };
        let mut stmt = conn
            .prepare(
                "SELECT o.ivalue, o.tvalue
                 FROM config_overrides o
                 JOIN group_memberships m ON m.group_id = o.entity_id
                 WHERE m.computer_id = ?1 AND m.kind IN (?2, ?3) AND o.option_name = ?4
                 ORDER BY o.entity_id",
            )
            .map_err(from_rusqlite)?;
        let values = stmt
            .query_map(
                rusqlite::params![
                    computer_id,
                    MembershipKind::Dynamic.as_i64(),
                    MembershipKind::Static.as_i64(),
                    option.storage_name(),
                ],
                |row| value_from_columns(option, row),
            )
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        Ok(values.into_iter().flatten().collect())
    }

    /// Value the entity inherits: groups plus global for a computer, the
    /// global default for a group
    pub fn get_default(
        &self,
        conn: &Connection,
        entity: EntityRef,
        option: ConfigOption,
    ) -> Result<Option<ConfigValue>> {
        let global = self.get_global(conn, option)?;
        let groups = self.group_values(conn, entity, option)?;
        Ok(config::default_value(option, &groups, global.as_ref()))
    }

    /// Value the agent actually uses
    pub fn get_effective(
        &self,
        conn: &Connection,
        entity: EntityRef,
        option: ConfigOption,
    ) -> Result<Option<ConfigValue>> {
        self.effective
            .get_or_try_insert_with(entity.id(), option, || {
                let stored = self.get_stored(conn, entity, option)?;
                let global = self.get_global(conn, option)?;
                let groups = self.group_values(conn, entity, option)?;
                Ok(config::effective_value(
                    option,
                    stored.as_ref(),
                    &groups,
                    global.as_ref(),
                ))
            })
    }

    /// Write or clear an entity override
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the value does not match the option type.
    pub fn set_config(
        &self,
        conn: &Connection,
        entity: EntityRef,
        option: ConfigOption,
        value: Option<ConfigValue>,
    ) -> Result<()> {
        match normalize_for_write(option, value)? {
            None => {
                conn.execute(
                    "DELETE FROM config_overrides WHERE entity_id = ?1 AND option_name = ?2",
                    rusqlite::params![entity.id(), option.storage_name()],
                )
                .map_err(from_rusqlite)?;
            }
            Some(value) => {
                let (ivalue, tvalue) = value_columns(&value);
                conn.execute(
                    "INSERT INTO config_overrides (entity_id, option_name, ivalue, tvalue)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(entity_id, option_name)
                     DO UPDATE SET ivalue = excluded.ivalue, tvalue = excluded.tvalue",
                    rusqlite::params![entity.id(), option.storage_name(), ivalue, tvalue],
                )
                .map_err(from_rusqlite)?;
            }
        }

        match entity {
            EntityRef::Computer(id) => self.invalidate(id),
            // Every member's effective value may change
            EntityRef::Group(_) => self.clear(),
        }
        Ok(())
    }

    /// Write or clear the global default
    ///
    /// Gating options store the value as given here; only entity overrides
    /// are normalized.
    pub fn set_global(
        &self,
        conn: &Connection,
        option: ConfigOption,
        value: Option<ConfigValue>,
    ) -> Result<()> {
        // Type check only; global gating values keep 0 and 1
        if let Some(v) = &value {
            normalize_for_write(option, Some(v.clone()))?;
        }
        match value {
            None => {
                conn.execute(
                    "DELETE FROM global_config WHERE option_name = ?1",
                    [option.storage_name()],
                )
                .map_err(from_rusqlite)?;
            }
            Some(value) => {
                let (ivalue, tvalue) = value_columns(&value);
                conn.execute(
                    "INSERT INTO global_config (option_name, ivalue, tvalue) VALUES (?1, ?2, ?3)
                     ON CONFLICT(option_name)
                     DO UPDATE SET ivalue = excluded.ivalue, tvalue = excluded.tvalue",
                    rusqlite::params![option.storage_name(), ivalue, tvalue],
                )
                .map_err(from_rusqlite)?;
            }
        }
        self.clear();
        Ok(())
    }

    pub fn invalidate(&self, entity_id: i64) {
        self.effective.invalidate(entity_id);
    }

    pub fn clear(&self) {
        self.effective.clear();
    }
}
