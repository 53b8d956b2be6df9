//! Query composition
//!
//! Turns logical filter criteria into a single parameterised SELECT over
//! the inventory tables. See [`QueryComposer`].

pub mod composer;
pub mod filter;

pub use composer::{Direction, OutputColumn, Query, QueryComposer, SqlValue};
pub use filter::{glob_to_like, CompareOp, Filter, StringOp, SQL_DATETIME_FORMAT};
