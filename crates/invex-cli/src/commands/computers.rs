//! Computer listing command
//!
//! Usage: invex computers list [--where FIELD:OP:VALUE]... [--not FIELD:OP:VALUE]...
//!        [--output FIELD,...] [--order FIELD] [--direction asc|desc] [--json]

use super::{collect_filters, parse_filter, CliResult, GlobalArgs};
use clap::{Args, Subcommand};
use invex_core::query::{Filter, SqlValue};

#[derive(Debug, Args)]
pub struct ComputersArgs {
    #[command(subcommand)]
    pub command: ComputersCommand,
}

#[derive(Debug, Subcommand)]
pub enum ComputersCommand {
    /// List computers matching every criterion
    List(ListArgs),
    /// Delete a computer and everything attached to it
    Delete {
        /// Computer id
        id: i64,
    },
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Criterion FIELD:OP:VALUE (empty OP for the field's default match)
    #[arg(long = "where", value_parser = parse_filter)]
    pub filters: Vec<Filter>,

    /// Inverted criterion FIELD:OP:VALUE
    #[arg(long = "not", value_parser = parse_filter)]
    pub excludes: Vec<Filter>,

    /// Fields to show besides the id
    #[arg(long, value_delimiter = ',', default_value = "Name")]
    pub output: Vec<String>,

    /// Field to sort by (defaults to the id)
    #[arg(long)]
    pub order: Option<String>,

    /// asc or desc
    #[arg(long)]
    pub direction: Option<String>,

    /// Print one JSON object per line
    #[arg(long)]
    pub json: bool,
}

pub fn execute(global: &GlobalArgs, args: ComputersArgs) -> CliResult<()> {
    match args.command {
        ComputersCommand::List(list_args) => execute_list(global, list_args),
        ComputersCommand::Delete { id } => execute_delete(global, id),
    }
}

fn render(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Integer(v) => v.to_string(),
        SqlValue::Real(v) => v.to_string(),
        SqlValue::Text(v) => v.clone(),
    }
}

fn execute_list(global: &GlobalArgs, args: ListArgs) -> CliResult<()> {
    let inventory = global.open()?;
    let filters = collect_filters(args.filters, args.excludes);
    let rows = inventory.list_computers(
        &filters,
        &args.output,
        args.order.as_deref(),
        args.direction.as_deref(),
    )?;

    for row in &rows {
        if args.json {
            println!("{}", serde_json::to_string(row)?);
        } else {
            let line: Vec<String> = row.iter().map(|(_, value)| render(value)).collect();
            println!("{}", line.join("\t"));
        }
    }
    if !args.json {
        eprintln!("{} computer(s)", rows.len());
    }
    Ok(())
}

fn execute_delete(global: &GlobalArgs, id: i64) -> CliResult<()> {
    let inventory = global.open()?;
    if inventory.delete_computer(id)? {
        println!("Deleted computer {}", id);
        Ok(())
    } else {
        Err(format!("Computer {} is locked by another process; try again later", id).into())
    }
}
