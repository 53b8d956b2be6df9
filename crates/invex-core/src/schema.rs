//! Schema registry
//!
//! Maps logical field names used by callers (`Name`, `Software.Version`,
//! `CustomFields.Tag`) to physical table/column/datatype triples. The
//! registry is built once from static descriptors; field references are
//! resolved into a [`FieldRef`] when a query is composed.

use crate::errors::QueryError;
use serde::{Deserialize, Serialize};

/// Name of the primary entity table
pub const PRIMARY_TABLE: &str = "computers";

/// Primary key column of the primary entity table
pub const PRIMARY_KEY: &str = "id";

/// Entity kinds known to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Computer,
    Software,
    NetworkInterface,
    CustomFields,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Computer,
        EntityKind::Software,
        EntityKind::NetworkInterface,
        EntityKind::CustomFields,
    ];

    /// Prefix used in dotted field references
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Computer => "Computer",
            EntityKind::Software => "Software",
            EntityKind::NetworkInterface => "NetworkInterface",
            EntityKind::CustomFields => "CustomFields",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.prefix().eq_ignore_ascii_case(prefix))
    }
}

/// Datatype of a column as far as filtering is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    /// Timestamp stored as `YYYY-MM-DD HH:MM:SS` text
    Date,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Date => "date",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub column: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub entity: EntityKind,
    pub table: &'static str,
    /// Column referencing `computers.id` (the key itself for the primary table)
    pub foreign_key: &'static str,
    /// At most one row per computer
    pub single_row: bool,
    pub fields: Vec<FieldDescriptor>,
}

impl TableDescriptor {
    fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

type StaticField = (&'static str, &'static str, FieldType);

const COMPUTER_FIELDS: &[StaticField] = &[
    ("Id", "id", FieldType::Integer),
    ("Name", "name", FieldType::Text),
    ("UserName", "user_name", FieldType::Text),
    ("OsName", "os_name", FieldType::Text),
    ("OsVersion", "os_version", FieldType::Text),
    ("CpuType", "cpu_type", FieldType::Text),
    ("CpuCores", "cpu_cores", FieldType::Integer),
    ("CpuClock", "cpu_clock", FieldType::Float),
    ("PhysicalMemory", "physical_memory", FieldType::Integer),
    ("InventoryDate", "inventory_date", FieldType::Date),
    ("LastContactDate", "last_contact_date", FieldType::Date),
];

const SOFTWARE_FIELDS: &[StaticField] = &[
    ("Name", "name", FieldType::Text),
    ("Version", "version", FieldType::Text),
    ("Publisher", "publisher", FieldType::Text),
    ("InstallDate", "install_date", FieldType::Date),
];

const NETWORK_INTERFACE_FIELDS: &[StaticField] = &[
    ("Description", "description", FieldType::Text),
    ("MacAddress", "mac_address", FieldType::Text),
    ("IpAddress", "ip_address", FieldType::Text),
    ("Subnet", "ip_subnet", FieldType::Text),
    ("Speed", "speed_mbps", FieldType::Integer),
];

const CUSTOM_FIELDS: &[StaticField] = &[("Tag", "tag", FieldType::Text)];

fn descriptor(
    entity: EntityKind,
    table: &'static str,
    foreign_key: &'static str,
    single_row: bool,
    fields: &[StaticField],
) -> TableDescriptor {
    TableDescriptor {
        entity,
        table,
        foreign_key,
        single_row,
        fields: fields
            .iter()
            .map(|(name, column, field_type)| FieldDescriptor {
                name: (*name).to_string(),
                column: (*column).to_string(),
                field_type: *field_type,
            })
            .collect(),
    }
}

/// A field reference resolved against the registry
#[derive(Debug, Clone, Copy)]
pub struct FieldRef<'s> {
    pub table: &'s TableDescriptor,
    pub field: &'s FieldDescriptor,
}

impl FieldRef<'_> {
    pub fn entity(&self) -> EntityKind {
        self.table.entity
    }

    pub fn is_primary(&self) -> bool {
        self.table.entity == EntityKind::Computer
    }

    pub fn field_type(&self) -> FieldType {
        self.field.field_type
    }

    /// Canonical dotted name, e.g. `Software.Version` or `Name`
    pub fn qualified_name(&self) -> String {
        if self.is_primary() {
            self.field.name.clone()
        } else {
            format!("{}.{}", self.table.entity.prefix(), self.field.name)
        }
    }
}

/// Registry of all queryable tables and fields
#[derive(Debug, Clone)]
pub struct Schema {
    tables: Vec<TableDescriptor>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    /// Registry with the built-in inventory tables
    pub fn new() -> Self {
        Self {
            tables: vec![
                descriptor(EntityKind::Computer, PRIMARY_TABLE, PRIMARY_KEY, true, COMPUTER_FIELDS),
                descriptor(EntityKind::Software, "software", "computer_id", false, SOFTWARE_FIELDS),
                descriptor(
                    EntityKind::NetworkInterface,
                    "network_interfaces",
                    "computer_id",
                    false,
                    NETWORK_INTERFACE_FIELDS,
                ),
                descriptor(EntityKind::CustomFields, "custom_fields", "computer_id", true, CUSTOM_FIELDS),
            ],
        }
    }

    /// Register an administrator-defined custom field
    ///
    /// The column must already exist in `custom_fields`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidColumn` if `column` is not a lowercase SQL identifier.
    pub fn with_custom_field(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        field_type: FieldType,
    ) -> Result<Self, QueryError> {
        let column = column.into();
        if !is_identifier(&column) {
            return Err(QueryError::InvalidColumn { column });
        }
        let table = self.table_mut(EntityKind::CustomFields);
        let name = name.into();
        table.fields.retain(|f| !f.name.eq_ignore_ascii_case(&name));
        table.fields.push(FieldDescriptor {
            name,
            column,
            field_type,
        });
        Ok(self)
    }

    pub fn table(&self, entity: EntityKind) -> &TableDescriptor {
        // Every EntityKind is registered in new()
        self.tables
            .iter()
            .find(|t| t.entity == entity)
            .unwrap_or(&self.tables[0])
    }

    fn table_mut(&mut self, entity: EntityKind) -> &mut TableDescriptor {
        let idx = self
            .tables
            .iter()
            .position(|t| t.entity == entity)
            .unwrap_or(0);
        &mut self.tables[idx]
    }

    pub fn primary(&self) -> &TableDescriptor {
        self.table(EntityKind::Computer)
    }

    /// Resolve a logical field reference
    ///
    /// Bare names belong to the primary entity; dotted names are
    /// `Entity.Field`. Matching is case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` or `UnknownField` if the reference does not
    /// name a registered field.
    pub fn resolve(&self, reference: &str) -> Result<FieldRef<'_>, QueryError> {
        let (entity, field_name) = match reference.split_once('.') {
            Some((prefix, name)) => {
                let entity =
                    EntityKind::from_prefix(prefix).ok_or_else(|| QueryError::UnknownEntity {
                        entity: prefix.to_string(),
                        reference: reference.to_string(),
                    })?;
                (entity, name)
            }
            None => (EntityKind::Computer, reference),
        };

        let table = self.table(entity);
        let field = table
            .field(field_name)
            .ok_or_else(|| QueryError::UnknownField {
                reference: reference.to_string(),
            })?;
        Ok(FieldRef { table, field })
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_name_resolves_to_primary() {
        let schema = Schema::new();
        let field = schema.resolve("Name").unwrap();
        assert!(field.is_primary());
        assert_eq!(field.table.table, "computers");
        assert_eq!(field.field.column, "name");
        assert_eq!(field.field_type(), FieldType::Text);
    }

    #[test]
    fn test_dotted_name_resolves_child_table() {
        let schema = Schema::new();
        let field = schema.resolve("software.version").unwrap();
        assert_eq!(field.entity(), EntityKind::Software);
        assert_eq!(field.table.foreign_key, "computer_id");
        assert_eq!(field.qualified_name(), "Software.Version");
    }

    #[test]
    fn test_unknown_field_and_entity() {
        let schema = Schema::new();
        assert!(matches!(
            schema.resolve("Bogus"),
            Err(QueryError::UnknownField { .. })
        ));
        assert!(matches!(
            schema.resolve("Printer.Name"),
            Err(QueryError::UnknownEntity { .. })
        ));
        assert!(matches!(
            schema.resolve("Software.Bogus"),
            Err(QueryError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_custom_field_registration() {
        let schema = Schema::new()
            .with_custom_field("AssetNumber", "asset_number", FieldType::Integer)
            .unwrap();
        let field = schema.resolve("CustomFields.AssetNumber").unwrap();
        assert_eq!(field.field.column, "asset_number");
        assert_eq!(field.field_type(), FieldType::Integer);
    }

    #[test]
    fn test_custom_field_rejects_bad_column() {
        let err = Schema::new()
            .with_custom_field("Evil", "x; DROP TABLE computers", FieldType::Text)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidColumn { .. }));
    }
}
