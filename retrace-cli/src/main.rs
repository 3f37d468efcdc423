use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use retrace_core::Direction;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod display;
mod logging;

use commands::{run, show, step, StepArgs};

#[derive(Parser)]
#[command(name = "retrace")]
#[command(version, about = "Undo and redo tracked project changes", long_about = None)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(long, global = true, env = "RETRACE_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// History database path
    #[arg(long, global = true)]
    history_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Undo the most recent operations
    Undo(StepArgs),

    /// Redo previously undone operations
    Redo(StepArgs),

    /// Show the deltas of a recorded operation
    Show {
        /// History position of the operation (defaults to the current one)
        position: Option<usize>,

        /// Only list affected paths, without content diffs
        #[arg(long)]
        stat: bool,
    },

    /// Run a generator command and record its changes as one operation
    Run {
        /// Description stored in history (defaults to the command line)
        #[arg(short, long)]
        description: Option<String>,

        /// Directory to track (defaults to the project directory)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Command to run, after `--`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.verbose) {
        eprintln!("Failed to initialise logging: {e}");
    }

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let ctx = commands::open_context(cli.project_dir, cli.history_file)?;

    match cli.command {
        Commands::Undo(args) => {
            step::run(&ctx, Direction::Reverse, args)?;
        }
        Commands::Redo(args) => {
            step::run(&ctx, Direction::Forward, args)?;
        }
        Commands::Show { position, stat } => {
            show::run(&ctx, position, stat)?;
        }
        Commands::Run {
            description,
            dir,
            command,
        } => {
            run::run(&ctx, description, dir, command)?;
        }
    }

    Ok(())
}
