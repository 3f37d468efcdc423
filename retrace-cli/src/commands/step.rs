use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use retrace_core::{Context, Direction, HistoryStore};
use std::io::IsTerminal;

use crate::display;

#[derive(Args, Debug)]
pub struct StepArgs {
    /// Number of operations to step over
    #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
    pub steps: i64,

    /// List recent history instead of stepping
    #[arg(short, long, conflicts_with = "clear")]
    pub list: bool,

    /// Clear all history
    #[arg(long)]
    pub clear: bool,

    /// Skip the confirmation prompt for --clear
    #[arg(short, long)]
    pub yes: bool,

    /// Number of entries shown by --list
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(ctx: &Context, direction: Direction, args: StepArgs) -> Result<()> {
    let mut store = super::open_store(ctx)?;

    if args.clear {
        return clear(&mut store, args.yes);
    }

    if args.list {
        return list(&store, args.limit, args.json);
    }

    let outcome = match direction {
        Direction::Reverse => store.undo(args.steps)?,
        Direction::Forward => store.redo(args.steps)?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if outcome.count == 0 {
        println!("{}", outcome.message.yellow());
    } else {
        println!("{} {}", "✓".green().bold(), outcome.message);
    }

    Ok(())
}

fn list(store: &HistoryStore, limit: usize, json: bool) -> Result<()> {
    let summary = store.history();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.operations.is_empty() {
        println!("{}", "No history yet".yellow());
        return Ok(());
    }

    println!("{}", "Operation History".bold().cyan());
    println!();

    for entry in display::newest_first(&summary, limit) {
        let line = display::history_line(entry);
        if entry.current {
            println!("{}", line.green().bold());
        } else if entry.applied {
            println!("{}", line);
        } else {
            println!("{}", line.dimmed());
        }
    }

    let hidden = summary.operations.len().saturating_sub(limit);
    if hidden > 0 {
        println!(
            "{}",
            format!("  ... and {} older operation(s)", hidden).dimmed()
        );
    }

    println!();
    println!("{}", display::summary_line(&summary));
    Ok(())
}

fn clear(store: &mut HistoryStore, yes: bool) -> Result<()> {
    if store.is_empty() {
        println!("{}", "History is already empty".yellow());
        return Ok(());
    }

    if !yes && std::io::stdin().is_terminal() {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Clear {} operation(s) from history? This cannot be undone",
                store.len()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("{}", "Aborted".yellow());
            return Ok(());
        }
    }

    let count = store.len();
    if !store.clear_history() {
        bail!("Failed to clear history");
    }

    println!(
        "{} Cleared {} operation(s) from history",
        "✓".green().bold(),
        count
    );
    Ok(())
}
