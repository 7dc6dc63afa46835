//! Worker: the top-level loop that pops plans from the queue, delegates to
//! the scheduler and iteration loop, and reconciles completion back onto the
//! base branch (or requests a PR).

use crate::config::{CompletionMode, Config};
use crate::iteration::IterationLoop;
use crate::notifier::{Notifier, Outcome};
use crate::plan::PlanStore;
use crate::vcs::git::branch_slug;
use crate::vcs::Vcs;
use crate::worktree::WorktreeScheduler;
use crate::agent::AgentRunner;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Worker<'a> {
    pub repo_root: PathBuf,
    pub store: &'a PlanStore,
    pub vcs: &'a dyn Vcs,
    pub notifier: &'a dyn Notifier,
    pub config: &'a Config,
}

impl<'a> Worker<'a> {
    /// Drains the pending queue once. Returns the number of plans processed.
    /// A cancelled `cancel` token stops before starting the next plan and
    /// propagates into whichever plan is currently in flight.
    pub async fn run_once(&self, cancel: &CancellationToken) -> anyhow::Result<usize> {
        let mut processed = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let stem = match self.store.current()? {
                Some(stem) => {
                    info!(plan = stem, "resuming in-progress plan");
                    stem
                }
                None => match self.store.pending()?.into_iter().next() {
                    Some(stem) => {
                        self.store.activate(&stem)?;
                        stem
                    }
                    None => break,
                },
            };

            self.process(&stem, cancel).await;
            processed += 1;
        }

        Ok(processed)
    }

    /// Runs indefinitely, polling for new plans. Intended for the daemon
    /// subcommand; `run_once` suffices for one-shot invocations. A cancelled
    /// `cancel` token aborts the poll sleep immediately.
    pub async fn run_forever(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let processed = self.run_once(cancel).await?;
            if processed == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)) => {}
                    _ = cancel.cancelled() => return Ok(()),
                }
            }
        }
    }

    async fn process(&self, stem: &str, cancel: &CancellationToken) {
        let correlation_id = self.notifier.start(stem);

        let scheduler = WorktreeScheduler::new(
            self.repo_root.clone(),
            self.vcs,
            self.config.base_branch.clone(),
            self.config.seed_dotfiles.clone(),
        );

        let worktree = match scheduler.acquire(stem) {
            Ok(w) => w,
            Err(e) => {
                warn!(plan = stem, error = %e, "could not acquire worktree, leaving plan for later");
                self.notifier.error(stem, correlation_id, &e.to_string());
                return;
            }
        };

        scheduler.seed(&worktree);

        let runner = AgentRunner::new(self.config.agent_command.clone(), self.config.agent_args.clone());
        let loop_runner = IterationLoop {
            store: self.store,
            vcs: self.vcs,
            runner: &runner,
            notifier: self.notifier,
            config: self.config,
        };

        let result = loop_runner.run(stem, &worktree.path, correlation_id, cancel).await;

        match result {
            Ok(()) => self.finish(stem, &worktree.path, &worktree.branch, correlation_id),
            Err(e) => {
                error!(plan = stem, error = %e, "plan did not complete");
                self.notifier.error(stem, correlation_id, &e.to_string());
                // plan stays in current/ for operator intervention
            }
        }

        if let Err(e) = scheduler.release(&worktree) {
            warn!(plan = stem, error = %e, "failed to release worktree");
        }
    }

    fn finish(&self, stem: &str, worktree_path: &std::path::Path, branch: &str, correlation_id: uuid::Uuid) {
        let outcome = match self.config.completion_mode {
            CompletionMode::Merge => {
                // Merge from the main tree, not the feature worktree: `base_branch`
                // is already checked out there, and checking it out a second time
                // inside the worktree would fail with "already checked out" since
                // git allows only one worktree per branch.
                if let Err(e) = self
                    .vcs
                    .checkout(&self.repo_root, &self.config.base_branch)
                    .and_then(|_| self.vcs.merge(&self.repo_root, branch, true))
                {
                    error!(plan = stem, error = %e, "merge failed");
                    self.notifier.error(stem, correlation_id, &e.to_string());
                    return;
                }
                Outcome::Merged { branch: branch.to_string() }
            }
            CompletionMode::Pr => {
                if let Err(e) = self.vcs.push_with_upstream(worktree_path, "origin", branch) {
                    error!(plan = stem, error = %e, "push failed");
                    self.notifier.error(stem, correlation_id, &e.to_string());
                    return;
                }
                Outcome::PullRequestRequested { branch: branch.to_string() }
            }
        };

        self.notifier.complete(stem, correlation_id, &outcome);

        if let Err(e) = self.store.complete(stem) {
            error!(plan = stem, error = %e, "failed to archive completed plan");
        }
    }
}

/// Derives the branch slug a plan would use, for orphan-cleanup comparisons.
pub fn expected_slug(stem: &str) -> String {
    branch_slug(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_slug_matches_branch_slug() {
        assert_eq!(expected_slug("20250101-000000-fix"), "fix");
    }
}
