//! Invex Store - SQLite persistence for the inventory core
//!
//! Provides:
//! - SQLite schema with an embedded, checksummed migrations framework
//! - Row-based locks shared across processes
//! - Repositories for computers, groups and memberships
//! - The group membership cache and the configuration resolver
//! - Execution of composed queries

pub mod config_store;
pub mod db;
pub mod errors;
pub mod group_cache;
pub mod lock;
pub mod migrations;
pub mod query;
pub mod repo;

// Re-export key types
pub use config_store::ConfigResolver;
pub use errors::Result;
pub use group_cache::{GroupCache, RefreshOutcome};
pub use lock::{LockGuard, LockTable};
pub use query::{fetch_ids, fetch_rows, ResultRow};
pub use repo::{ComputerRepo, GroupRepo};
