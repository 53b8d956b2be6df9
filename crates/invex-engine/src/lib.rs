//! Invex Engine - Orchestration layer
//!
//! Wires settings, locks, caches and repositories into the [`Inventory`]
//! facade that administrative tools and ingestion callers talk to.

pub mod inventory;

pub use inventory::Inventory;
pub use invex_store::RefreshOutcome;
