//! Execution of composed queries

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use invex_core::query::{Query, SqlValue};
use rusqlite::types::{Value, ValueRef};
use rusqlite::Connection;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// One result row, columns in select order
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    values: Vec<(String, SqlValue)>,
}

impl ResultRow {
    pub fn get(&self, alias: &str) -> Option<&SqlValue> {
        self.values
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, value)| value)
    }

    /// Primary key of the row (always the first column)
    pub fn id(&self) -> Option<i64> {
        self.values.first().and_then(|(_, value)| value.as_i64())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

fn bind(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
    }
}

fn read(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Text(hex::encode(bytes)),
    }
}

/// Run a composed query and return every row
pub fn fetch_rows(conn: &Connection, query: &Query) -> Result<Vec<ResultRow>> {
    let mut stmt = conn.prepare(&query.sql).map_err(from_rusqlite)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let params = rusqlite::params_from_iter(query.params.iter().map(bind));

    let rows = stmt
        .query_map(params, |row| {
            let mut values = Vec::with_capacity(names.len());
            for (idx, name) in names.iter().enumerate() {
                values.push((name.clone(), read(row.get_ref(idx)?)));
            }
            Ok(ResultRow { values })
        })
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;
    Ok(rows)
}

/// Run a composed query and return the first column as ids
pub fn fetch_ids(conn: &Connection, query: &Query) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(&query.sql).map_err(from_rusqlite)?;
    let params = rusqlite::params_from_iter(query.params.iter().map(bind));
    let ids = stmt
        .query_map(params, |row| row.get(0))
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<i64>, _>>()
        .map_err(from_rusqlite)?;
    Ok(ids)
}
