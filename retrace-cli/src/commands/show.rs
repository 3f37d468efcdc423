use anyhow::{bail, Result};
use colored::Colorize;
use retrace_core::diff::{DiffLineType, FileDiff};
use retrace_core::Context;

use crate::display;

pub fn run(ctx: &Context, position: Option<usize>, stat: bool) -> Result<()> {
    let store = super::open_store(ctx)?;

    if store.is_empty() {
        println!("{}", "No history yet".yellow());
        return Ok(());
    }

    let position = match position {
        Some(p) => p,
        None if store.position() == 0 => {
            println!("{}", "No applied operations; pass a position to inspect the redo tail".yellow());
            return Ok(());
        }
        None => store.position(),
    };

    if position == 0 || position > store.len() {
        bail!(
            "No operation at position {} (history has {} operation(s))",
            position,
            store.len()
        );
    }

    let operation = store.operation(position - 1)?;
    let state = if position <= store.position() {
        "applied".green()
    } else {
        "undone".yellow()
    };

    println!(
        "{} {} {}",
        "operation".yellow().bold(),
        position.to_string().yellow(),
        format!("({})", state)
    );
    println!("{}: {}", "Id".bold(), operation.id);
    println!(
        "{}: {}",
        "Date".bold(),
        operation.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    println!();
    println!("    {}", operation.description);
    println!();

    for delta in &operation.deltas {
        let path = display::relative(&ctx.project_root, &delta.target_path);

        match &delta.symlink_target {
            Some(target) => println!(
                "{} {} -> {}",
                display::kind_marker(delta.kind),
                path.white().bold(),
                display::relative(&ctx.project_root, target)
            ),
            None => println!("{} {}", display::kind_marker(delta.kind), path.white().bold()),
        }

        if stat {
            continue;
        }

        let Some(diff) = FileDiff::from_delta(delta) else {
            continue;
        };

        if diff.binary {
            println!("  {}", "[Binary content]".dimmed());
            continue;
        }

        println!("{}", "━".repeat(80).bright_black());
        for line in &diff.diff_lines {
            let (prefix, color): (&str, fn(&str) -> colored::ColoredString) = match line.line_type {
                DiffLineType::Addition => ("+", |s| s.green()),
                DiffLineType::Deletion => ("-", |s| s.red()),
                DiffLineType::Context => (" ", |s| s.normal()),
            };
            print!("{}", color(&format!("{}{}", prefix, line.content)));
        }
        println!();
    }

    Ok(())
}
