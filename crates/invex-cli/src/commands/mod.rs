//! Subcommands and the plumbing they share

pub mod computers;
pub mod config;
pub mod group;
pub mod migrate;

use clap::Args;
use invex_core::query::Filter;
use invex_core::settings::Settings;
use invex_core_types::RequestContext;
use invex_engine::Inventory;
use std::path::PathBuf;

pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Settings file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overriding the settings file
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn settings(&self) -> CliResult<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        if let Some(db) = &self.db {
            settings.database.path = db.clone();
        }
        Ok(settings)
    }

    /// Open the inventory with a fresh request context for this invocation
    pub fn open(&self) -> CliResult<Inventory> {
        let inventory = Inventory::open(self.settings()?)?;
        Ok(inventory.with_context(RequestContext::new()))
    }
}

/// Parse `FIELD:OP:VALUE`; an empty `OP` means the field's default match
///
/// Only the first two colons separate, so values may contain colons.
pub fn parse_filter(raw: &str) -> Result<Filter, String> {
    let mut parts = raw.splitn(3, ':');
    let (Some(field), Some(op), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected FIELD:OP:VALUE, got '{}'", raw));
    };
    if field.is_empty() {
        return Err(format!("missing field name in '{}'", raw));
    }
    let op = if op.is_empty() { None } else { Some(op) };
    Ok(Filter::new(field, op, value))
}

/// Plain filters followed by inverted ones
pub fn collect_filters(filters: Vec<Filter>, excludes: Vec<Filter>) -> Vec<Filter> {
    filters
        .into_iter()
        .chain(excludes.into_iter().map(Filter::inverted))
        .collect()
}
