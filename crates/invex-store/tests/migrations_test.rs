// Integration tests for the migration framework

use rusqlite::Connection;

fn setup_test_db() -> Connection {
    Connection::open_in_memory().expect("Failed to create in-memory database")
}

fn get_table_names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<String>, _>>()
        .unwrap()
}

#[test]
fn test_apply_migrations_on_empty_db() {
    let mut conn = setup_test_db();

    let applied = invex_store::migrations::apply_migrations(&mut conn).unwrap();
    assert_eq!(
        applied,
        vec![
            "001_inventory_schema",
            "002_groups_and_locks",
            "003_config_overrides"
        ]
    );

    let tables = get_table_names(&conn);
    for expected in [
        "schema_version",
        "computers",
        "software",
        "network_interfaces",
        "custom_fields",
        "groups",
        "group_memberships",
        "locks",
        "config_overrides",
        "global_config",
    ] {
        assert!(
            tables.contains(&expected.to_string()),
            "Missing table: {}",
            expected
        );
    }
}

#[test]
fn test_reapply_is_noop() {
    let mut conn = setup_test_db();
    invex_store::migrations::apply_migrations(&mut conn).unwrap();
    let applied = invex_store::migrations::apply_migrations(&mut conn).unwrap();
    assert!(applied.is_empty());

    let recorded = invex_store::migrations::applied_migrations(&conn).unwrap();
    assert_eq!(recorded.len(), 3);
}

#[test]
fn test_checksum_mismatch_detected() {
    let mut conn = setup_test_db();
    invex_store::migrations::apply_migrations(&mut conn).unwrap();
    conn.execute(
        "UPDATE schema_version SET checksum = 'tampered' WHERE migration_id = '002_groups_and_locks'",
        [],
    )
    .unwrap();

    let err = invex_store::migrations::apply_migrations(&mut conn).unwrap_err();
    assert_eq!(err.kind(), invex_core::ExErrorKind::Persistence);
    assert!(err.message().contains("Checksum mismatch"));
}

#[test]
fn test_global_defaults_seeded() {
    let mut conn = setup_test_db();
    invex_store::migrations::apply_migrations(&mut conn).unwrap();
    let timeout: i64 = conn
        .query_row(
            "SELECT ivalue FROM global_config WHERE option_name = 'DOWNLOAD_TIMEOUT'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(timeout, 30);
}

#[test]
fn test_file_database_persists_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.db");
    {
        let mut conn = invex_store::db::open(&path).unwrap();
        invex_store::migrations::apply_migrations(&mut conn).unwrap();
    }
    let mut conn = invex_store::db::open(&path).unwrap();
    let applied = invex_store::migrations::apply_migrations(&mut conn).unwrap();
    assert!(applied.is_empty());
}
