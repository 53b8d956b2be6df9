//! Three-tier configuration overrides
//!
//! Options resolve across the global default, the groups an entity belongs
//! to, and the entity's own override. This module owns the catalogue and
//! the combination rules; persistence lives in the store crate.

pub mod options;
pub mod rules;

pub use options::{normalize_for_write, ConfigOption, ConfigValue, OptionClass, ValueType};
pub use rules::{default_value, effective_value};
