pub mod run;
pub mod show;
pub mod step;

pub use step::StepArgs;

use anyhow::{Context as _, Result};
use retrace_core::{Context, HistoryStore};
use std::path::PathBuf;

pub fn open_context(project_dir: Option<PathBuf>, history_file: Option<PathBuf>) -> Result<Context> {
    let dir = match project_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };
    let root = std::fs::canonicalize(&dir)
        .with_context(|| format!("Project directory {} does not exist", dir.display()))?;

    let ctx = Context::new(root);
    Ok(match history_file {
        Some(path) => {
            let path = ctx.resolve(&path);
            ctx.with_history_path(path)
        }
        None => ctx,
    })
}

pub fn open_store(ctx: &Context) -> Result<HistoryStore> {
    HistoryStore::open(ctx)
        .with_context(|| format!("Failed to open history at {}", ctx.history_path.display()))
}
