//! Schema migration command
//!
//! Usage: invex migrate [--db <PATH>]

use super::{CliResult, GlobalArgs};

/// Open (creating if needed) the database and report the schema state
pub fn execute(global: &GlobalArgs) -> CliResult<()> {
    let inventory = global.open()?;
    let applied = invex_store::migrations::applied_migrations(inventory.connection())?;
    println!(
        "Database {} is at schema {}",
        inventory.settings().database.path.display(),
        applied.last().map(String::as_str).unwrap_or("(empty)")
    );
    for id in &applied {
        println!("  {}", id);
    }
    Ok(())
}
