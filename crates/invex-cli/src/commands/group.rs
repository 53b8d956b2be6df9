//! Group management commands
//!
//! Usage:
//!   invex group create <NAME> [--description TEXT] [--where FIELD:OP:VALUE]... [--sql QUERY]
//!   invex group list
//!   invex group refresh <GROUP> [--force]
//!   invex group members <GROUP> [--kind dynamic|static|excluded]...
//!   invex group assign <GROUP> --kind KIND (--computer ID... | --where FIELD:OP:VALUE...)
//!   invex group delete <GROUP>
//!
//! `GROUP` is a numeric id or a group name.

use super::{collect_filters, parse_filter, CliResult, GlobalArgs};
use clap::{Args, Subcommand};
use invex_core::model::{GroupPredicate, MembershipKind};
use invex_core::query::Filter;
use invex_engine::{Inventory, RefreshOutcome};

#[derive(Debug, Args)]
pub struct GroupArgs {
    #[command(subcommand)]
    pub command: GroupCommand,
}

#[derive(Debug, Subcommand)]
pub enum GroupCommand {
    /// Create a group, optionally with a dynamic predicate
    Create(CreateArgs),
    /// List all groups
    List,
    /// Rebuild the dynamic members if the cache expired
    Refresh {
        group: String,
        /// Rebuild even if the cache is still fresh
        #[arg(long)]
        force: bool,
    },
    /// Show membership rows
    Members {
        group: String,
        /// Only these kinds (repeatable)
        #[arg(long)]
        kind: Vec<MembershipKind>,
    },
    /// Set the membership kind of computers
    Assign(AssignArgs),
    /// Delete a group with its memberships and overrides
    Delete { group: String },
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    pub name: String,

    #[arg(long)]
    pub description: Option<String>,

    /// Dynamic predicate criterion FIELD:OP:VALUE
    #[arg(long = "where", value_parser = parse_filter, conflicts_with = "sql")]
    pub filters: Vec<Filter>,

    /// Inverted predicate criterion FIELD:OP:VALUE
    #[arg(long = "not", value_parser = parse_filter, conflicts_with = "sql")]
    pub excludes: Vec<Filter>,

    /// Dynamic predicate as a query returning computer ids
    #[arg(long)]
    pub sql: Option<String>,
}

#[derive(Debug, Args)]
pub struct AssignArgs {
    pub group: String,

    /// dynamic (drop the override), static or excluded
    #[arg(long)]
    pub kind: MembershipKind,

    /// Computer ids
    #[arg(long = "computer", required_unless_present_any = ["filters", "excludes"])]
    pub computers: Vec<i64>,

    /// Select computers by criterion FIELD:OP:VALUE
    #[arg(long = "where", value_parser = parse_filter, conflicts_with = "computers")]
    pub filters: Vec<Filter>,

    /// Select computers by inverted criterion FIELD:OP:VALUE
    #[arg(long = "not", value_parser = parse_filter, conflicts_with = "computers")]
    pub excludes: Vec<Filter>,
}

pub fn execute(global: &GlobalArgs, args: GroupArgs) -> CliResult<()> {
    let inventory = global.open()?;
    match args.command {
        GroupCommand::Create(create_args) => execute_create(&inventory, create_args),
        GroupCommand::List => execute_list(&inventory),
        GroupCommand::Refresh { group, force } => execute_refresh(&inventory, &group, force),
        GroupCommand::Members { group, kind } => execute_members(&inventory, &group, &kind),
        GroupCommand::Assign(assign_args) => execute_assign(&inventory, assign_args),
        GroupCommand::Delete { group } => execute_delete(&inventory, &group),
    }
}

/// Resolve a numeric id or a group name
fn resolve_group(inventory: &Inventory, group: &str) -> CliResult<i64> {
    let found = match group.parse::<i64>() {
        Ok(id) => inventory.get_group(id)?,
        Err(_) => inventory.find_group_by_name(group)?,
    };
    found
        .map(|g| g.id)
        .ok_or_else(|| format!("No group '{}'", group).into())
}

fn execute_create(inventory: &Inventory, args: CreateArgs) -> CliResult<()> {
    let filters = collect_filters(args.filters, args.excludes);
    let predicate = match args.sql {
        Some(sql) => Some(GroupPredicate::Sql(sql)),
        None if !filters.is_empty() => Some(GroupPredicate::Filters(filters)),
        None => None,
    };
    let id = inventory.create_group(&args.name, args.description.as_deref(), predicate.as_ref())?;
    println!("Created group {} ({})", args.name, id);
    Ok(())
}

fn execute_list(inventory: &Inventory) -> CliResult<()> {
    for group in inventory.list_groups()? {
        let predicate = match &group.predicate {
            Some(GroupPredicate::Sql(_)) => "sql",
            Some(GroupPredicate::Filters(_)) => "filters",
            None => "-",
        };
        println!(
            "{}\t{}\t{}\t{}",
            group.id,
            group.name,
            predicate,
            group.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn execute_refresh(inventory: &Inventory, group: &str, force: bool) -> CliResult<()> {
    let id = resolve_group(inventory, group)?;
    match inventory.update_cache(id, force)? {
        RefreshOutcome::Rebuilt { added, removed } => {
            println!("Rebuilt group {}: {} added, {} removed", id, added, removed)
        }
        RefreshOutcome::Fresh => println!("Group {} cache is still fresh", id),
        RefreshOutcome::NoPredicate => println!("Group {} has no dynamic predicate", id),
        RefreshOutcome::Locked => println!("Group {} is being rebuilt elsewhere", id),
    }
    Ok(())
}

fn execute_members(inventory: &Inventory, group: &str, kinds: &[MembershipKind]) -> CliResult<()> {
    let id = resolve_group(inventory, group)?;
    for membership in inventory.members(id, kinds)? {
        println!("{}\t{}", membership.computer_id, membership.kind);
    }
    Ok(())
}

fn execute_assign(inventory: &Inventory, args: AssignArgs) -> CliResult<()> {
    let id = resolve_group(inventory, &args.group)?;
    let changed = if args.computers.is_empty() {
        let filters = collect_filters(args.filters, args.excludes);
        inventory.set_members_from_query(id, args.kind, &filters)?
    } else {
        inventory.set_manual_membership(id, args.kind, &args.computers)?
    };
    println!("{} membership row(s) changed", changed);
    Ok(())
}

fn execute_delete(inventory: &Inventory, group: &str) -> CliResult<()> {
    let id = resolve_group(inventory, group)?;
    if inventory.delete_group(id)? {
        println!("Deleted group {}", id);
        Ok(())
    } else {
        Err(format!("Group {} is locked by another process; try again later", id).into())
    }
}
