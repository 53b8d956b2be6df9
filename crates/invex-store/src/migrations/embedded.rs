//! Embedded SQL migrations
//!
//! Migrations are embedded at compile time using include_str!

use sha2::{Digest, Sha256};

pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

impl Migration {
    /// Hex SHA-256 of the SQL text, recorded when the migration is applied
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(self.sql.as_bytes()))
    }
}

/// All embedded migrations, in application order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            id: "001_inventory_schema",
            sql: include_str!("../../migrations/001_inventory_schema.sql"),
        },
        Migration {
            id: "002_groups_and_locks",
            sql: include_str!("../../migrations/002_groups_and_locks.sql"),
        },
        Migration {
            id: "003_config_overrides",
            sql: include_str!("../../migrations/003_config_overrides.sql"),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_ordered_and_unique() {
        let ids: Vec<&str> = get_migrations().iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_checksums_differ_per_migration() {
        let migrations = get_migrations();
        assert_eq!(migrations[0].checksum().len(), 64);
        assert_ne!(migrations[0].checksum(), migrations[1].checksum());
    }
}
