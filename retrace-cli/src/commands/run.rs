use anyhow::{bail, Context as _, Result};
use colored::Colorize;
use retrace_core::{tracked, Context};
use std::path::PathBuf;
use std::process::Command;

pub fn run(
    ctx: &Context,
    description: Option<String>,
    dir: Option<PathBuf>,
    command: Vec<String>,
) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("No command given");
    };

    let description = description.unwrap_or_else(|| command.join(" "));
    let root = dir
        .map(|d| ctx.resolve(&d))
        .unwrap_or_else(|| ctx.project_root.clone());

    let mut store = super::open_store(ctx)?;

    println!("{} {}", "Running".bold(), command.join(" ").cyan());

    let (status, changes) = tracked(ctx, &mut store, description.clone(), |tracker| {
        let status = tracker.track_batch(&root, || {
            Command::new(program)
                .args(args)
                .current_dir(&root)
                .status()
                .with_context(|| format!("Failed to run '{}'", program))
        })?;
        Ok::<_, anyhow::Error>((status, tracker.deltas().len()))
    })?;

    if changes == 0 {
        println!("{}", "No changes to record".yellow());
    } else {
        println!(
            "{} Recorded '{}' ({} change(s))",
            "✓".green().bold(),
            description,
            changes
        );
    }

    if !status.success() {
        bail!(
            "'{}' exited with {}; its changes were recorded and can be undone",
            program,
            status
        );
    }

    Ok(())
}
