//! Computer persistence

#![allow(clippy::result_large_err)]

use crate::db::with_transaction;
use crate::errors::{from_rusqlite, not_found, Result};
use crate::lock::LockTable;
use chrono::NaiveDateTime;
use invex_core::errors::{ExError, ExErrorKind};
use invex_core::model::{Computer, NetworkInterface, Software, GROUP_PLACEHOLDER_DEVICE_ID};
use invex_core::query::{SqlValue, SQL_DATETIME_FORMAT};
use invex_core::schema::{EntityKind, FieldType, Schema};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};

fn format_timestamp(value: Option<NaiveDateTime>) -> Option<String> {
    value.map(|dt| dt.format(SQL_DATETIME_FORMAT).to_string())
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|s| {
        NaiveDateTime::parse_from_str(&s, SQL_DATETIME_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

const COMPUTER_COLUMNS: &str = "id, name, device_id, user_name, os_name, os_version, cpu_type, \
     cpu_cores, cpu_clock, physical_memory, inventory_date, last_contact_date";

fn computer_from_row(row: &Row<'_>) -> rusqlite::Result<Computer> {
    Ok(Computer {
        id: row.get(0)?,
        name: row.get(1)?,
        device_id: row.get(2)?,
        user_name: row.get(3)?,
        os_name: row.get(4)?,
        os_version: row.get(5)?,
        cpu_type: row.get(6)?,
        cpu_cores: row.get(7)?,
        cpu_clock: row.get(8)?,
        physical_memory: row.get(9)?,
        inventory_date: parse_timestamp(row, 10)?,
        last_contact_date: parse_timestamp(row, 11)?,
    })
}

fn sql_param(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Null => rusqlite::types::Value::Null,
        SqlValue::Integer(v) => rusqlite::types::Value::Integer(*v),
        SqlValue::Real(v) => rusqlite::types::Value::Real(*v),
        SqlValue::Text(v) => rusqlite::types::Value::Text(v.clone()),
    }
}

/// Child rows may only hang off real computers
fn ensure_real_computer(conn: &Connection, op: &'static str, id: i64) -> Result<()> {
    let device_id: Option<String> = conn
        .query_row("SELECT device_id FROM computers WHERE id = ?1", [id], |row| row.get(0))
        .optional()
        .map_err(from_rusqlite)?;
    match device_id {
        None => Err(not_found(op, id)),
        Some(device_id) if device_id == GROUP_PLACEHOLDER_DEVICE_ID => {
            Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op(op)
                .with_entity_id(id)
                .with_message("Entity is a group, not a computer"))
        }
        Some(_) => Ok(()),
    }
}

/// SQLite repository for computers and their child rows
pub struct ComputerRepo;

impl ComputerRepo {
    /// Insert a computer and return its id (`computer.id` is ignored)
    pub fn insert(conn: &Connection, computer: &Computer) -> Result<i64> {
        conn.execute(
            "INSERT INTO computers (name, device_id, user_name, os_name, os_version, cpu_type,
                cpu_cores, cpu_clock, physical_memory, inventory_date, last_contact_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                computer.name,
                computer.device_id,
                computer.user_name,
                computer.os_name,
                computer.os_version,
                computer.cpu_type,
                computer.cpu_cores,
                computer.cpu_clock,
                computer.physical_memory,
                format_timestamp(computer.inventory_date),
                format_timestamp(computer.last_contact_date),
            ],
        )
        .map_err(from_rusqlite)?;
        Ok(conn.last_insert_rowid())
    }

    /// Load a computer; group placeholder rows are returned as well
    pub fn get(conn: &Connection, id: i64) -> Result<Option<Computer>> {
        conn.query_row(
            &format!("SELECT {} FROM computers WHERE id = ?1", COMPUTER_COLUMNS),
            [id],
            computer_from_row,
        )
        .optional()
        .map_err(from_rusqlite)
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` for a group placeholder id, `NotFound` for an
    /// unknown id.
    pub fn insert_software(conn: &Connection, computer_id: i64, software: &Software) -> Result<i64> {
        ensure_real_computer(conn, "insert_software", computer_id)?;
        conn.execute(
            "INSERT INTO software (computer_id, name, version, publisher, install_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                computer_id,
                software.name,
                software.version,
                software.publisher,
                format_timestamp(software.install_date),
            ],
        )
        .map_err(from_rusqlite)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_software(conn: &Connection, computer_id: i64) -> Result<Vec<Software>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, computer_id, name, version, publisher, install_date
                 FROM software WHERE computer_id = ?1 ORDER BY id",
            )
            .map_err(from_rusqlite)?;
        let rows = stmt
            .query_map([computer_id], |row| {
                Ok(Software {
                    id: row.get(0)?,
                    computer_id: row.get(1)?,
                    name: row.get(2)?,
                    version: row.get(3)?,
                    publisher: row.get(4)?,
                    install_date: parse_timestamp(row, 5)?,
                })
            })
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        Ok(rows)
    }

    pub fn insert_network_interface(
        conn: &Connection,
        computer_id: i64,
        interface: &NetworkInterface,
    ) -> Result<i64> {
        ensure_real_computer(conn, "insert_network_interface", computer_id)?;
        conn.execute(
            "INSERT INTO network_interfaces
                (computer_id, description, mac_address, ip_address, ip_subnet, speed_mbps)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                computer_id,
                interface.description,
                interface.mac_address,
                interface.ip_address,
                interface.ip_subnet,
                interface.speed_mbps,
            ],
        )
        .map_err(from_rusqlite)?;
        Ok(conn.last_insert_rowid())
    }

    /// Add a column to `custom_fields` for a runtime-registered field
    ///
    /// The column name must already have been accepted by
    /// [`Schema::with_custom_field`].
    pub fn add_custom_field_column(
        conn: &Connection,
        schema: &Schema,
        field: &str,
    ) -> Result<()> {
        let resolved = schema.resolve(&format!("{}.{}", EntityKind::CustomFields.prefix(), field))?;
        let sql_type = match resolved.field_type() {
            FieldType::Integer => "INTEGER",
            FieldType::Float => "REAL",
            FieldType::Text | FieldType::Date => "TEXT",
        };
        conn.execute_batch(&format!(
            "ALTER TABLE custom_fields ADD COLUMN {} {}",
            resolved.field.column, sql_type
        ))
        .map_err(from_rusqlite)
    }

    /// Set one custom field of a computer, creating its row if needed
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a group placeholder id, `NotFound` for an
    /// unknown id, `UnknownField` for an unregistered field.
    pub fn set_custom_field(
        conn: &Connection,
        schema: &Schema,
        computer_id: i64,
        field: &str,
        value: &SqlValue,
    ) -> Result<()> {
        let resolved = schema.resolve(&format!("{}.{}", EntityKind::CustomFields.prefix(), field))?;
        ensure_real_computer(conn, "set_custom_field", computer_id)?;
        // The column name comes from the registry, never from the caller
        let column = &resolved.field.column;
        conn.execute(
            &format!(
                "INSERT INTO custom_fields (computer_id, {col}) VALUES (?1, ?2)
                 ON CONFLICT(computer_id) DO UPDATE SET {col} = excluded.{col}",
                col = column
            ),
            rusqlite::params![computer_id, sql_param(value)],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }

    /// Delete a computer with its child rows, memberships and overrides
    ///
    /// Returns `false` without touching anything if the computer's lock is
    /// held elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id and `InvalidInput` for a group
    /// placeholder row.
    pub fn delete(conn: &Connection, locks: &LockTable, id: i64) -> Result<bool> {
        let computer = Self::get(conn, id)?.ok_or_else(|| not_found("delete_computer", id))?;
        if computer.device_id == GROUP_PLACEHOLDER_DEVICE_ID {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("delete_computer")
                .with_entity_id(id)
                .with_message("Entity is a group; delete it as a group"));
        }

        let Some(_guard) = locks.try_lock(conn, id)? else {
            tracing::info!(computer_id = id, "Computer is locked; skipping delete");
            return Ok(false);
        };

        with_transaction(conn, |tx| {
            for sql in [
                "DELETE FROM software WHERE computer_id = ?1",
                "DELETE FROM network_interfaces WHERE computer_id = ?1",
                "DELETE FROM custom_fields WHERE computer_id = ?1",
                "DELETE FROM group_memberships WHERE computer_id = ?1",
                "DELETE FROM config_overrides WHERE entity_id = ?1",
                "DELETE FROM computers WHERE id = ?1",
            ] {
                tx.execute(sql, [id]).map_err(from_rusqlite)?;
            }
            Ok(())
        })?;
        Ok(true)
    }
}
