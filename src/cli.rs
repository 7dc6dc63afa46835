use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ralph", version, about = "Autonomous execution engine for markdown task plans")]
pub struct Cli {
    /// Repository root; defaults to the current directory.
    #[arg(long, global = true)]
    pub repo: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process the pending queue. One-shot by default; pass --daemon to poll forever.
    Run {
        #[arg(long)]
        daemon: bool,
    },
    /// Print the current queue state.
    Status,
    /// Remove worktrees with no corresponding plan in current/.
    Cleanup,
}
