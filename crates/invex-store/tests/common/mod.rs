#![allow(dead_code)]

use chrono::NaiveDateTime;
use invex_core::model::Computer;
use invex_store::repo::ComputerRepo;
use rusqlite::Connection;

/// In-memory database with every migration applied
pub fn setup_test_db() -> Connection {
    let mut conn = invex_store::db::open_in_memory().unwrap();
    invex_store::migrations::apply_migrations(&mut conn).unwrap();
    conn
}

pub fn insert_computer(conn: &Connection, name: &str, cpu_cores: Option<i64>) -> i64 {
    let mut computer = Computer::new(name, format!("{}-device", name));
    computer.cpu_cores = cpu_cores;
    ComputerRepo::insert(conn, &computer).unwrap()
}

pub fn insert_computer_with(conn: &Connection, computer: Computer) -> i64 {
    ComputerRepo::insert(conn, &computer).unwrap()
}

pub fn timestamp(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

/// Pretend a lock row was taken `secs` seconds ago
pub fn backdate_lock(conn: &Connection, entity_id: i64, secs: i64) {
    conn.execute(
        "UPDATE locks SET acquired_at_ms = acquired_at_ms - ?2 WHERE entity_id = ?1",
        [entity_id, secs * 1_000],
    )
    .unwrap();
}

pub fn lock_row_exists(conn: &Connection, entity_id: i64) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM locks WHERE entity_id = ?1",
        [entity_id],
        |r| r.get::<_, i64>(0),
    )
    .unwrap()
        == 1
}

pub fn membership_rows(conn: &Connection, group_id: i64, computer_id: i64) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM group_memberships WHERE group_id = ?1 AND computer_id = ?2",
        [group_id, computer_id],
        |r| r.get(0),
    )
    .unwrap()
}
