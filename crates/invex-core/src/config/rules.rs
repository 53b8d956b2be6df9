//! Combination rules
//!
//! Pure functions over already-loaded values. `group_values` are the
//! overrides stored on every group the entity belongs to (empty for a
//! group entity); missing overrides are simply absent from the slice.

use super::options::{ConfigOption, ConfigValue, OptionClass};

/// Inventory interval meaning "inventory on every contact"
pub const INVENTORY_ALWAYS: i64 = 0;
/// Inventory interval meaning "never inventory"
pub const INVENTORY_NEVER: i64 = -1;

fn is_disabled(value: Option<&ConfigValue>) -> bool {
    value.and_then(ConfigValue::as_i64) == Some(0)
}

fn min_int<'a>(values: impl Iterator<Item = &'a ConfigValue>) -> Option<ConfigValue> {
    values
        .filter_map(ConfigValue::as_i64)
        .min()
        .map(ConfigValue::Integer)
}

fn max_int<'a>(values: impl Iterator<Item = &'a ConfigValue>) -> Option<ConfigValue> {
    values
        .filter_map(ConfigValue::as_i64)
        .max()
        .map(ConfigValue::Integer)
}

fn gating(disabled: bool) -> Option<ConfigValue> {
    Some(ConfigValue::Integer(if disabled { 0 } else { 1 }))
}

fn global_wins(global: Option<&ConfigValue>) -> bool {
    matches!(
        global.and_then(ConfigValue::as_i64),
        Some(INVENTORY_ALWAYS) | Some(INVENTORY_NEVER)
    )
}

/// Value the entity inherits when it has no override of its own
pub fn default_value(
    option: ConfigOption,
    group_values: &[ConfigValue],
    global: Option<&ConfigValue>,
) -> Option<ConfigValue> {
    effective_value(option, None, group_values, global)
}

/// Value the agent actually uses
pub fn effective_value(
    option: ConfigOption,
    stored: Option<&ConfigValue>,
    group_values: &[ConfigValue],
    global: Option<&ConfigValue>,
) -> Option<ConfigValue> {
    match option.class() {
        OptionClass::Gating => {
            let disabled = is_disabled(global)
                || is_disabled(stored)
                || group_values.iter().any(|v| is_disabled(Some(v)));
            gating(disabled)
        }
        OptionClass::InventoryInterval => {
            if global_wins(global) {
                return global.cloned();
            }
            min_int(stored.into_iter().chain(group_values)).or_else(|| global.cloned())
        }
        OptionClass::MinOverGroups => stored
            .cloned()
            .or_else(|| min_int(group_values.iter()))
            .or_else(|| global.cloned()),
        OptionClass::MaxOverGroups => stored
            .cloned()
            .or_else(|| max_int(group_values.iter()))
            .or_else(|| global.cloned()),
        OptionClass::EntityOrGlobal => stored.cloned().or_else(|| global.cloned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> ConfigValue {
        ConfigValue::Integer(v)
    }

    #[test]
    fn test_gating_disabled_globally_beats_group_enable() {
        // Group "enabled" is never stored, so it is absent here
        let value = effective_value(ConfigOption::AllowScan, None, &[], Some(&int(0)));
        assert_eq!(value, Some(int(0)));
    }

    #[test]
    fn test_gating_disabled_by_any_group() {
        let value = effective_value(
            ConfigOption::PackageDeployment,
            None,
            &[int(0)],
            Some(&int(1)),
        );
        assert_eq!(value, Some(int(0)));
        let value = effective_value(ConfigOption::PackageDeployment, None, &[], Some(&int(1)));
        assert_eq!(value, Some(int(1)));
    }

    #[test]
    fn test_min_over_groups_chain() {
        let groups = [int(3), int(7)];
        let value = effective_value(ConfigOption::DownloadTimeout, None, &groups, Some(&int(10)));
        assert_eq!(value, Some(int(3)));

        let value = effective_value(
            ConfigOption::DownloadTimeout,
            Some(&int(20)),
            &groups,
            Some(&int(10)),
        );
        assert_eq!(value, Some(int(20)));

        let value = effective_value(ConfigOption::DownloadTimeout, None, &[], Some(&int(10)));
        assert_eq!(value, Some(int(10)));
    }

    #[test]
    fn test_max_over_groups_chain() {
        let value = effective_value(
            ConfigOption::DownloadCycleDelay,
            None,
            &[int(3), int(7)],
            Some(&int(1)),
        );
        assert_eq!(value, Some(int(7)));
    }

    #[test]
    fn test_inventory_interval_special_global_values_win() {
        for special in [INVENTORY_ALWAYS, INVENTORY_NEVER] {
            let value = effective_value(
                ConfigOption::InventoryInterval,
                Some(&int(5)),
                &[int(2)],
                Some(&int(special)),
            );
            assert_eq!(value, Some(int(special)));
        }
    }

    #[test]
    fn test_inventory_interval_minimum_includes_entity() {
        let value = effective_value(
            ConfigOption::InventoryInterval,
            Some(&int(5)),
            &[int(9), int(6)],
            Some(&int(30)),
        );
        assert_eq!(value, Some(int(5)));

        let value = default_value(ConfigOption::InventoryInterval, &[int(9)], Some(&int(30)));
        assert_eq!(value, Some(int(9)));
    }

    #[test]
    fn test_entity_or_global_ignores_groups() {
        let value = effective_value(
            ConfigOption::ScanThreshold,
            None,
            &[int(1)],
            Some(&int(20)),
        );
        assert_eq!(value, Some(int(20)));
        let value = effective_value(ConfigOption::ScanningNetwork, None, &[], None);
        assert_eq!(value, None);
    }
}
