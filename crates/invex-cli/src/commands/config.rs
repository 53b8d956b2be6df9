//! Agent configuration commands
//!
//! Usage:
//!   invex config get <OPTION> [--computer ID | --group ID]
//!   invex config set <OPTION> <VALUE|none> [--computer ID | --group ID]
//!
//! Without a target the global default is read or written.

use super::{CliResult, GlobalArgs};
use clap::{Args, Subcommand};
use invex_core::config::{ConfigOption, ConfigValue};
use invex_core::model::EntityRef;

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show stored, inherited and effective values
    Get {
        option: ConfigOption,
        #[command(flatten)]
        target: Target,
    },
    /// Write an override; `none` removes it
    Set {
        option: ConfigOption,
        value: String,
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Debug, Args)]
pub struct Target {
    #[arg(long, conflicts_with = "group")]
    pub computer: Option<i64>,

    #[arg(long)]
    pub group: Option<i64>,
}

impl Target {
    fn entity(&self) -> Option<EntityRef> {
        match (self.computer, self.group) {
            (Some(id), _) => Some(EntityRef::Computer(id)),
            (None, Some(id)) => Some(EntityRef::Group(id)),
            (None, None) => None,
        }
    }
}

pub fn execute(global: &GlobalArgs, args: ConfigArgs) -> CliResult<()> {
    match args.command {
        ConfigCommand::Get { option, target } => execute_get(global, option, &target),
        ConfigCommand::Set {
            option,
            value,
            target,
        } => execute_set(global, option, &value, &target),
    }
}

fn show(value: Option<ConfigValue>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn execute_get(global: &GlobalArgs, option: ConfigOption, target: &Target) -> CliResult<()> {
    let inventory = global.open()?;
    match target.entity() {
        None => println!("{}\tglobal={}", option, show(inventory.get_global(option)?)),
        Some(entity) => println!(
            "{}\tstored={}\tdefault={}\teffective={}",
            option,
            show(inventory.get_config(entity, option)?),
            show(inventory.get_default(entity, option)?),
            show(inventory.get_effective(entity, option)?),
        ),
    }
    Ok(())
}

fn execute_set(
    global: &GlobalArgs,
    option: ConfigOption,
    raw: &str,
    target: &Target,
) -> CliResult<()> {
    let inventory = global.open()?;
    let value = if raw.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(ConfigValue::parse_for(option, raw)?)
    };
    match target.entity() {
        None => inventory.set_global(option, value)?,
        Some(entity) => inventory.set_config(entity, option, value)?,
    }
    println!("{} updated", option);
    Ok(())
}
