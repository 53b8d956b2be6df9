#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{insert_computer, setup_test_db};
use invex_core::config::{ConfigOption, ConfigValue};
use invex_core::errors::ExErrorKind;
use invex_core::model::{EntityRef, MembershipKind};
use invex_core::schema::Schema;
use invex_core::settings::GroupSettings;
use invex_store::repo::GroupRepo;
use invex_store::{ConfigResolver, GroupCache, LockTable};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;

fn int(v: i64) -> Option<ConfigValue> {
    Some(ConfigValue::Integer(v))
}

/// Create a group holding the computer as a Static member
fn group_with(conn: &Connection, name: &str, computer_id: i64) -> i64 {
    let cache = GroupCache::new(
        Schema::new(),
        Arc::new(LockTable::new(Duration::from_secs(60))),
        GroupSettings::default(),
    );
    let group = GroupRepo::create(conn, name, None, None).unwrap();
    cache
        .set_manual_membership(conn, group, MembershipKind::Static, &[computer_id])
        .unwrap();
    group
}

#[test]
fn test_seeded_globals() {
    let conn = setup_test_db();
    let resolver = ConfigResolver::new();
    assert_eq!(resolver.get_global(&conn, ConfigOption::DownloadTimeout).unwrap(), int(30));
    assert_eq!(resolver.get_global(&conn, ConfigOption::ScanningNetwork).unwrap(), None);
}

#[test]
fn test_min_over_groups() {
    let conn = setup_test_db();
    let resolver = ConfigResolver::new();
    let pc = insert_computer(&conn, "pc", None);
    let g1 = group_with(&conn, "g1", pc);
    let g2 = group_with(&conn, "g2", pc);

    resolver.set_global(&conn, ConfigOption::DownloadTimeout, int(10)).unwrap();
    resolver.set_config(&conn, EntityRef::Group(g1), ConfigOption::DownloadTimeout, int(3)).unwrap();
    resolver.set_config(&conn, EntityRef::Group(g2), ConfigOption::DownloadTimeout, int(7)).unwrap();

    let computer = EntityRef::Computer(pc);
    assert_eq!(resolver.get_stored(&conn, computer, ConfigOption::DownloadTimeout).unwrap(), None);
    assert_eq!(resolver.get_effective(&conn, computer, ConfigOption::DownloadTimeout).unwrap(), int(3));
    assert_eq!(resolver.get_default(&conn, computer, ConfigOption::DownloadTimeout).unwrap(), int(3));

    // Own value wins; the default still reflects the groups
    resolver.set_config(&conn, computer, ConfigOption::DownloadTimeout, int(20)).unwrap();
    assert_eq!(resolver.get_effective(&conn, computer, ConfigOption::DownloadTimeout).unwrap(), int(20));
    assert_eq!(resolver.get_default(&conn, computer, ConfigOption::DownloadTimeout).unwrap(), int(3));
}

#[test]
fn test_max_over_groups() {
    let conn = setup_test_db();
    let resolver = ConfigResolver::new();
    let pc = insert_computer(&conn, "pc", None);
    let g1 = group_with(&conn, "g1", pc);
    let g2 = group_with(&conn, "g2", pc);
    resolver.set_config(&conn, EntityRef::Group(g1), ConfigOption::DownloadCycleDelay, int(5)).unwrap();
    resolver.set_config(&conn, EntityRef::Group(g2), ConfigOption::DownloadCycleDelay, int(90)).unwrap();

    assert_eq!(
        resolver.get_effective(&conn, EntityRef::Computer(pc), ConfigOption::DownloadCycleDelay).unwrap(),
        int(90)
    );
}

#[test]
fn test_gating_disabled_globally() {
    let conn = setup_test_db();
    let resolver = ConfigResolver::new();
    let pc = insert_computer(&conn, "pc", None);
    let group = group_with(&conn, "g", pc);

    resolver.set_global(&conn, ConfigOption::AllowScan, int(0)).unwrap();
    // Enabling is never stored as an override
    resolver.set_config(&conn, EntityRef::Group(group), ConfigOption::AllowScan, int(1)).unwrap();
    assert_eq!(resolver.get_stored(&conn, EntityRef::Group(group), ConfigOption::AllowScan).unwrap(), None);

    assert_eq!(
        resolver.get_effective(&conn, EntityRef::Computer(pc), ConfigOption::AllowScan).unwrap(),
        int(0)
    );
}

#[test]
fn test_gating_disabled_by_group() {
    let conn = setup_test_db();
    let resolver = ConfigResolver::new();
    let pc = insert_computer(&conn, "pc", None);
    let other = insert_computer(&conn, "other", None);
    let group = group_with(&conn, "g", pc);

    resolver.set_config(&conn, EntityRef::Group(group), ConfigOption::PackageDeployment, int(0)).unwrap();
    assert_eq!(
        resolver.get_effective(&conn, EntityRef::Computer(pc), ConfigOption::PackageDeployment).unwrap(),
        int(0)
    );
    assert_eq!(
        resolver.get_effective(&conn, EntityRef::Computer(other), ConfigOption::PackageDeployment).unwrap(),
        int(1)
    );
}

#[test]
fn test_inventory_interval_global_special_values_win() {
    let conn = setup_test_db();
    let resolver = ConfigResolver::new();
    let pc = insert_computer(&conn, "pc", None);
    let computer = EntityRef::Computer(pc);
    resolver.set_config(&conn, computer, ConfigOption::InventoryInterval, int(7)).unwrap();

    // Seeded global is 0: inventory on every contact
    assert_eq!(resolver.get_effective(&conn, computer, ConfigOption::InventoryInterval).unwrap(), int(0));

    resolver.set_global(&conn, ConfigOption::InventoryInterval, int(-1)).unwrap();
    assert_eq!(resolver.get_effective(&conn, computer, ConfigOption::InventoryInterval).unwrap(), int(-1));

    resolver.set_global(&conn, ConfigOption::InventoryInterval, int(30)).unwrap();
    let group = group_with(&conn, "g", pc);
    resolver.set_config(&conn, EntityRef::Group(group), ConfigOption::InventoryInterval, int(4)).unwrap();
    assert_eq!(resolver.get_effective(&conn, computer, ConfigOption::InventoryInterval).unwrap(), int(4));
}

#[test]
fn test_group_default_is_global() {
    let conn = setup_test_db();
    let resolver = ConfigResolver::new();
    let pc = insert_computer(&conn, "pc", None);
    let group = group_with(&conn, "g", pc);
    resolver.set_config(&conn, EntityRef::Group(group), ConfigOption::ContactInterval, int(2)).unwrap();

    assert_eq!(
        resolver.get_default(&conn, EntityRef::Group(group), ConfigOption::ContactInterval).unwrap(),
        int(10)
    );
    assert_eq!(
        resolver.get_effective(&conn, EntityRef::Group(group), ConfigOption::ContactInterval).unwrap(),
        int(2)
    );
}

#[test]
fn test_text_option_entity_or_global() {
    let conn = setup_test_db();
    let resolver = ConfigResolver::new();
    let pc = insert_computer(&conn, "pc", None);
    let computer = EntityRef::Computer(pc);

    assert_eq!(resolver.get_effective(&conn, computer, ConfigOption::ScanningNetwork).unwrap(), None);
    let subnet = Some(ConfigValue::Text("10.0.0.0".into()));
    resolver.set_config(&conn, computer, ConfigOption::ScanningNetwork, subnet.clone()).unwrap();
    assert_eq!(resolver.get_effective(&conn, computer, ConfigOption::ScanningNetwork).unwrap(), subnet);

    resolver.set_config(&conn, computer, ConfigOption::ScanningNetwork, None).unwrap();
    assert_eq!(resolver.get_stored(&conn, computer, ConfigOption::ScanningNetwork).unwrap(), None);
}

#[test]
fn test_type_mismatch_rejected() {
    let conn = setup_test_db();
    let resolver = ConfigResolver::new();
    let pc = insert_computer(&conn, "pc", None);

    let err = resolver
        .set_config(
            &conn,
            EntityRef::Computer(pc),
            ConfigOption::DownloadTimeout,
            Some(ConfigValue::Text("soon".into())),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::InvalidInput);

    let err = resolver
        .set_global(&conn, ConfigOption::ScanningNetwork, int(3))
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::InvalidInput);
}

#[test]
fn test_writes_refresh_cached_values() {
    let conn = setup_test_db();
    let resolver = ConfigResolver::new();
    let pc = insert_computer(&conn, "pc", None);
    let computer = EntityRef::Computer(pc);

    assert_eq!(resolver.get_effective(&conn, computer, ConfigOption::ScanThreshold).unwrap(), int(2));
    resolver.set_global(&conn, ConfigOption::ScanThreshold, int(5)).unwrap();
    assert_eq!(resolver.get_effective(&conn, computer, ConfigOption::ScanThreshold).unwrap(), int(5));

    // Writes behind the resolver's back are not seen until invalidated
    conn.execute(
        "UPDATE global_config SET ivalue = 9 WHERE option_name = 'IPDISCOVER_MAX'",
        [],
    )
    .unwrap();
    assert_eq!(resolver.get_effective(&conn, computer, ConfigOption::ScanThreshold).unwrap(), int(5));
    resolver.invalidate(pc);
    assert_eq!(resolver.get_effective(&conn, computer, ConfigOption::ScanThreshold).unwrap(), int(9));
}
