//! Invex Core - storage-agnostic inventory kernel
//!
//! This crate provides:
//! - The schema registry mapping logical field names to tables and columns
//! - The query composer turning filter criteria into a single joined SELECT
//! - Domain models for computers, groups and memberships
//! - The configuration option catalogue and its combination rules
//! - Process-local entity caches
//! - The error, logging and settings facilities shared by every crate
//!
//! Persistence lives in `invex-store`; orchestration in `invex-engine`.

pub mod cache;
pub mod config;
pub mod errors;
pub mod logging_facility;
pub mod model;
pub mod query;
pub mod schema;
pub mod settings;

// Re-export commonly used types
pub use cache::EntityCache;
pub use config::{ConfigOption, ConfigValue};
pub use errors::{ExError, ExErrorKind, QueryError, Result};
pub use model::{Computer, EntityRef, Group, GroupPredicate, Membership, MembershipKind};
pub use query::{Filter, Query, QueryComposer, SqlValue};
pub use schema::{EntityKind, FieldType, Schema};
pub use settings::Settings;
