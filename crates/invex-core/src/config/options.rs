//! Configuration option catalogue

use crate::errors::{ExError, ExErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Agent settings that can be overridden per group or per computer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigOption {
    ContactInterval,
    InventoryInterval,
    DownloadPeriodDelay,
    DownloadCycleDelay,
    DownloadFragmentDelay,
    DownloadMaxPriority,
    DownloadTimeout,
    PackageDeployment,
    AllowScan,
    ScanSnmp,
    ScanThreshold,
    ScanningNetwork,
}

/// How a stored value is typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Integer,
    /// Stored as integer; only `0` (disabled) is ever persisted as override
    Bool,
    Text,
}

/// How group and entity overrides combine with the global default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionClass {
    /// Disabled anywhere means disabled
    Gating,
    /// Global `0`/`-1` wins, else minimum of entity and group values
    InventoryInterval,
    /// Entity value, else minimum of group values, else global
    MinOverGroups,
    /// Entity value, else maximum of group values, else global
    MaxOverGroups,
    /// Entity value, else global
    EntityOrGlobal,
}

impl ConfigOption {
    pub const ALL: [ConfigOption; 12] = [
        ConfigOption::ContactInterval,
        ConfigOption::InventoryInterval,
        ConfigOption::DownloadPeriodDelay,
        ConfigOption::DownloadCycleDelay,
        ConfigOption::DownloadFragmentDelay,
        ConfigOption::DownloadMaxPriority,
        ConfigOption::DownloadTimeout,
        ConfigOption::PackageDeployment,
        ConfigOption::AllowScan,
        ConfigOption::ScanSnmp,
        ConfigOption::ScanThreshold,
        ConfigOption::ScanningNetwork,
    ];

    /// Name used by callers
    pub fn name(&self) -> &'static str {
        match self {
            ConfigOption::ContactInterval => "contactInterval",
            ConfigOption::InventoryInterval => "inventoryInterval",
            ConfigOption::DownloadPeriodDelay => "downloadPeriodDelay",
            ConfigOption::DownloadCycleDelay => "downloadCycleDelay",
            ConfigOption::DownloadFragmentDelay => "downloadFragmentDelay",
            ConfigOption::DownloadMaxPriority => "downloadMaxPriority",
            ConfigOption::DownloadTimeout => "downloadTimeout",
            ConfigOption::PackageDeployment => "packageDeployment",
            ConfigOption::AllowScan => "allowScan",
            ConfigOption::ScanSnmp => "scanSnmp",
            ConfigOption::ScanThreshold => "scanThreshold",
            ConfigOption::ScanningNetwork => "scanningNetwork",
        }
    }

    /// Key in `config_overrides` and `global_config`
    pub fn storage_name(&self) -> &'static str {
        match self {
            ConfigOption::ContactInterval => "PROLOG_FREQ",
            ConfigOption::InventoryInterval => "FREQUENCY",
            ConfigOption::DownloadPeriodDelay => "DOWNLOAD_PERIOD_LATENCY",
            ConfigOption::DownloadCycleDelay => "DOWNLOAD_CYCLE_LATENCY",
            ConfigOption::DownloadFragmentDelay => "DOWNLOAD_FRAG_LATENCY",
            ConfigOption::DownloadMaxPriority => "DOWNLOAD_PERIOD_LENGTH",
            ConfigOption::DownloadTimeout => "DOWNLOAD_TIMEOUT",
            ConfigOption::PackageDeployment => "DOWNLOAD",
            ConfigOption::AllowScan => "IPDISCOVER",
            ConfigOption::ScanSnmp => "SNMP",
            ConfigOption::ScanThreshold => "IPDISCOVER_MAX",
            ConfigOption::ScanningNetwork => "IPDISCOVER_NETWORK",
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            ConfigOption::PackageDeployment | ConfigOption::AllowScan | ConfigOption::ScanSnmp => {
                ValueType::Bool
            }
            ConfigOption::ScanningNetwork => ValueType::Text,
            _ => ValueType::Integer,
        }
    }

    pub fn class(&self) -> OptionClass {
        match self {
            ConfigOption::PackageDeployment | ConfigOption::AllowScan | ConfigOption::ScanSnmp => {
                OptionClass::Gating
            }
            ConfigOption::InventoryInterval => OptionClass::InventoryInterval,
            ConfigOption::ContactInterval
            | ConfigOption::DownloadMaxPriority
            | ConfigOption::DownloadTimeout => OptionClass::MinOverGroups,
            ConfigOption::DownloadPeriodDelay
            | ConfigOption::DownloadCycleDelay
            | ConfigOption::DownloadFragmentDelay => OptionClass::MaxOverGroups,
            ConfigOption::ScanThreshold | ConfigOption::ScanningNetwork => {
                OptionClass::EntityOrGlobal
            }
        }
    }
}

impl std::str::FromStr for ConfigOption {
    type Err = ExError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|option| option.name() == s)
            .ok_or_else(|| {
                ExError::new(ExErrorKind::InvalidInput)
                    .with_op("parse_option")
                    .with_field(s)
                    .with_message(format!("Unknown configuration option '{}'", s))
            })
    }
}

impl std::fmt::Display for ConfigOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored or resolved option value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Integer(i64),
    Text(String),
}

impl ConfigValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(v) => Some(*v),
            ConfigValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(v) => Some(v),
            ConfigValue::Integer(_) => None,
        }
    }

    /// Parse a command-line value according to the option's type
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if an integer option gets a non-integer.
    pub fn parse_for(option: ConfigOption, raw: &str) -> Result<Self> {
        match option.value_type() {
            ValueType::Text => Ok(ConfigValue::Text(raw.to_string())),
            ValueType::Integer | ValueType::Bool => raw
                .trim()
                .parse::<i64>()
                .map(ConfigValue::Integer)
                .map_err(|_| type_mismatch(option, raw)),
        }
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::Integer(v) => write!(f, "{}", v),
            ConfigValue::Text(v) => f.write_str(v),
        }
    }
}

fn type_mismatch(option: ConfigOption, value: impl std::fmt::Display) -> ExError {
    ExError::new(ExErrorKind::InvalidInput)
        .with_op("set_config")
        .with_field(option.name())
        .with_message(format!(
            "Value '{}' does not match the type of option '{}'",
            value, option
        ))
}

/// Check a value against the option's type and map it to what gets stored
///
/// `None` and, for gating options, "enabled" both mean "no override".
///
/// # Errors
///
/// Returns `InvalidInput` on a type mismatch.
pub fn normalize_for_write(
    option: ConfigOption,
    value: Option<ConfigValue>,
) -> Result<Option<ConfigValue>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let type_ok = matches!(
        (option.value_type(), &value),
        (ValueType::Bool | ValueType::Integer, ConfigValue::Integer(_))
            | (ValueType::Text, ConfigValue::Text(_))
    );
    if !type_ok {
        return Err(type_mismatch(option, &value));
    }
    if option.value_type() == ValueType::Bool && value.as_i64() != Some(0) {
        return Ok(None);
    }
    Ok(Some(value))
}
