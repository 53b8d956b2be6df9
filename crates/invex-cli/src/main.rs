//! Invex CLI
//!
//! Administrative command line for the inventory core

use clap::{Parser, Subcommand};
use invex_core::logging_facility::{self, Profile};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "invex")]
#[command(about = "Invex - Inventory queries, groups and agent configuration", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: commands::GlobalArgs,

    /// Logging profile (development, production)
    #[arg(long, global = true, default_value = "development")]
    log: Profile,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,
    /// Computer queries
    Computers(commands::computers::ComputersArgs),
    /// Group management
    Group(commands::group::GroupArgs),
    /// Agent configuration overrides
    Config(commands::config::ConfigArgs),
}

fn main() {
    let cli = Cli::parse();
    logging_facility::init(cli.log);

    let result = match cli.command {
        Commands::Migrate => commands::migrate::execute(&cli.global),
        Commands::Computers(args) => commands::computers::execute(&cli.global, args),
        Commands::Group(args) => commands::group::execute(&cli.global, args),
        Commands::Config(args) => commands::config::execute(&cli.global, args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
