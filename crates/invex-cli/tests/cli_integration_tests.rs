//! CLI integration tests
//!
//! Run the built binary against a scratch database seeded through the
//! engine, and check both the printed output and the stored state.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use invex_core::model::{Computer, EntityRef, MembershipKind};
use invex_core::settings::Settings;
use invex_core::ConfigOption;
use invex_engine::Inventory;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn open(db_path: &Path) -> Inventory {
    let mut settings = Settings::default();
    settings.database.path = db_path.to_path_buf();
    Inventory::open(settings).unwrap()
}

fn setup_test_db(temp_dir: &TempDir) -> PathBuf {
    let db_path = temp_dir.path().join("inventory.db");
    let inventory = open(&db_path);
    for (name, os, cores) in [
        ("web-1", "Windows 10", 8),
        ("web-2", "WinXP", 2),
        ("db-1", "MyWindows", 16),
    ] {
        let mut computer = Computer::new(name, format!("{}-device", name));
        computer.os_name = Some(os.to_string());
        computer.cpu_cores = Some(cores);
        inventory.insert_computer(&computer).unwrap();
    }
    db_path
}

fn run(temp_dir: &TempDir, db_path: &Path, args: &[&str]) -> Output {
    let output = Command::new(env!("CARGO_BIN_EXE_invex"))
        .current_dir(temp_dir.path())
        .env("RUST_LOG", "off")
        .args(args)
        .args(["--db", db_path.to_str().unwrap()])
        .output()
        .expect("Failed to execute CLI");
    assert!(
        output.status.success(),
        "CLI command {:?} should succeed. Stderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_cli_migrate_creates_database() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("fresh").join("inventory.db");

    let output = run(&temp_dir, &db_path, &["migrate"]);
    assert!(db_path.exists());
    assert!(stdout(&output).contains("003_config_overrides"));
}

#[test]
fn test_cli_computers_list_json() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = setup_test_db(&temp_dir);

    let output = run(
        &temp_dir,
        &db_path,
        &["computers", "list", "--where", "OsName:like:Win*", "--output", "Name,CpuCores", "--json"],
    );
    let rows: Vec<serde_json::Value> = stdout(&output)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["web-1", "web-2"]);
    assert_eq!(rows[0]["cpu_cores"], 8);
}

#[test]
fn test_cli_computers_list_inverted_and_ordered() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = setup_test_db(&temp_dir);

    let output = run(
        &temp_dir,
        &db_path,
        &["computers", "list", "--not", "CpuCores:gt:4", "--order", "Name", "--direction", "desc"],
    );
    let out = stdout(&output);
    let names: Vec<&str> = out
        .lines()
        .map(|line| line.split('\t').nth(1).unwrap())
        .collect();
    assert_eq!(names, vec!["web-2"]);
}

#[test]
fn test_cli_unknown_field_fails() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = setup_test_db(&temp_dir);

    let output = Command::new(env!("CARGO_BIN_EXE_invex"))
        .env("RUST_LOG", "off")
        .args(["computers", "list", "--where", "Colour::red", "--db", db_path.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ERR_UNKNOWN_FIELD"));
}

#[test]
fn test_cli_group_create_refresh_and_members() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = setup_test_db(&temp_dir);

    run(&temp_dir, &db_path, &["group", "create", "big", "--where", "CpuCores:ge:8"]);
    let output = run(&temp_dir, &db_path, &["group", "refresh", "big", "--force"]);
    assert!(stdout(&output).contains("2 added"));

    run(&temp_dir, &db_path, &["group", "assign", "big", "--kind", "excluded", "--where", "Name:eq:db-1"]);

    let output = run(&temp_dir, &db_path, &["group", "members", "big", "--kind", "dynamic"]);
    assert_eq!(stdout(&output).lines().count(), 1);

    let inventory = open(&db_path);
    let group = inventory.find_group_by_name("big").unwrap().unwrap();
    let excluded = inventory.members(group.id, &[MembershipKind::Excluded]).unwrap();
    assert_eq!(excluded.len(), 1);
}

#[test]
fn test_cli_config_set_and_get() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = setup_test_db(&temp_dir);
    let pc = {
        let inventory = open(&db_path);
        inventory.computer_ids(&[]).unwrap()[0]
    };
    let pc_arg = pc.to_string();

    run(&temp_dir, &db_path, &["config", "set", "downloadTimeout", "12", "--computer", &pc_arg]);
    let output = run(&temp_dir, &db_path, &["config", "get", "downloadTimeout", "--computer", &pc_arg]);
    let out = stdout(&output);
    assert!(out.contains("stored=12"), "{}", out);
    assert!(out.contains("default=30"), "{}", out);
    assert!(out.contains("effective=12"), "{}", out);

    run(&temp_dir, &db_path, &["config", "set", "downloadTimeout", "none", "--computer", &pc_arg]);
    let inventory = open(&db_path);
    assert_eq!(
        inventory
            .get_config(EntityRef::Computer(pc), ConfigOption::DownloadTimeout)
            .unwrap(),
        None
    );
}
