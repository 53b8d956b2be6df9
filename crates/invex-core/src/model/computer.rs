use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// `device_id` carried by the placeholder row backing each group
///
/// Groups share the computers id space; their rows must never show up in
/// computer listings or as group members.
pub const GROUP_PLACEHOLDER_DEVICE_ID: &str = "_SYSTEMGROUP_";

/// An inventoried computer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computer {
    /// Assigned by the store on insert
    pub id: i64,
    pub name: String,
    /// Agent-reported device identifier
    pub device_id: String,
    pub user_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub cpu_type: Option<String>,
    pub cpu_cores: Option<i64>,
    /// MHz
    pub cpu_clock: Option<f64>,
    /// MiB
    pub physical_memory: Option<i64>,
    pub inventory_date: Option<NaiveDateTime>,
    pub last_contact_date: Option<NaiveDateTime>,
}

impl Computer {
    pub fn new(name: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            device_id: device_id.into(),
            user_name: None,
            os_name: None,
            os_version: None,
            cpu_type: None,
            cpu_cores: None,
            cpu_clock: None,
            physical_memory: None,
            inventory_date: None,
            last_contact_date: None,
        }
    }

    pub fn is_group_placeholder(&self) -> bool {
        self.device_id == GROUP_PLACEHOLDER_DEVICE_ID
    }
}

/// One installed software package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Software {
    pub id: i64,
    pub computer_id: i64,
    pub name: String,
    pub version: Option<String>,
    pub publisher: Option<String>,
    pub install_date: Option<NaiveDateTime>,
}

impl Software {
    pub fn new(name: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            id: 0,
            computer_id: 0,
            name: name.into(),
            version: version.map(str::to_string),
            publisher: None,
            install_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub id: i64,
    pub computer_id: i64,
    pub description: Option<String>,
    pub mac_address: Option<String>,
    pub ip_address: Option<String>,
    pub ip_subnet: Option<String>,
    pub speed_mbps: Option<i64>,
}

impl NetworkInterface {
    pub fn new(ip_address: impl Into<String>, ip_subnet: impl Into<String>) -> Self {
        Self {
            id: 0,
            computer_id: 0,
            description: None,
            mac_address: None,
            ip_address: Some(ip_address.into()),
            ip_subnet: Some(ip_subnet.into()),
            speed_mbps: None,
        }
    }
}
