mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use ralph::config::Config;
use ralph::notifier::LogNotifier;
use ralph::plan::PlanStore;
use ralph::vcs::GitVcs;
use ralph::worker::Worker;
use ralph::worktree::WorktreeScheduler;
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    ralph::logging::init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    let result = runtime.block_on(async_main());
    runtime.shutdown_timeout(std::time::Duration::from_millis(100));
    result
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();

    let repo_root = match cli.repo {
        Some(path) => path,
        None => std::env::current_dir().context("resolving current directory")?,
    };

    let config_path = repo_root.join(".ralph").join("config.yaml");
    let config = Config::load(&config_path)?;

    let store = PlanStore::new(&repo_root);
    store.ensure_dirs()?;

    let vcs = GitVcs::new();
    let notifier = LogNotifier::new(&repo_root)?;

    match cli.command {
        Command::Run { daemon } => {
            let worker = Worker {
                repo_root: repo_root.clone(),
                store: &store,
                vcs: &vcs,
                notifier: &notifier,
                config: &config,
            };

            let cancel = CancellationToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("received interrupt, cancelling in-flight work");
                    ctrl_c_cancel.cancel();
                }
            });

            if daemon {
                worker.run_forever(&cancel).await?;
            } else {
                let processed = worker.run_once(&cancel).await?;
                tracing::info!(processed, "queue drained");
            }
        }
        Command::Status => {
            let pending = store.pending()?;
            let current = store.current()?;
            println!("pending: {}", pending.join(", "));
            println!("current: {}", current.as_deref().unwrap_or("(none)"));
        }
        Command::Cleanup => {
            let current_slugs: Vec<String> = store.current()?.into_iter().collect();
            let scheduler = WorktreeScheduler::new(
                repo_root.clone(),
                &vcs,
                config.base_branch.clone(),
                config.seed_dotfiles.clone(),
            );
            let removed = scheduler.cleanup(&current_slugs)?;
            println!("removed {} orphaned worktree(s)", removed.len());
        }
    }

    Ok(())
}
