//! Iteration loop: drives one plan, in its isolated worktree, through
//! repeated agent invocations until it completes, blocks terminally, or
//! exceeds the iteration cap.

use crate::agent::{AgentRunner, RunOptions, RunOutcome};
use crate::config::Config;
use crate::error::LoopError;
use crate::notifier::Notifier;
use crate::plan::{parser::all_tasks_complete, Lifecycle, PlanStore};
use crate::vcs::Vcs;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub struct IterationLoop<'a> {
    pub store: &'a PlanStore,
    pub vcs: &'a dyn Vcs,
    pub runner: &'a AgentRunner,
    pub notifier: &'a dyn Notifier,
    pub config: &'a Config,
}

impl<'a> IterationLoop<'a> {
    /// Runs `plan_stem` to completion inside `worktree`. Returns `Ok(())` on
    /// verified completion. A cancelled `cancel` token aborts before the next
    /// agent invocation starts and propagates out of any invocation already
    /// in flight.
    pub async fn run(
        &self,
        plan_stem: &str,
        worktree: &Path,
        correlation_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), LoopError> {
        let mut iteration = self.store.iteration_count(Lifecycle::Current, plan_stem);

        loop {
            if cancel.is_cancelled() {
                return Err(LoopError::Cancelled(plan_stem.to_string()));
            }

            let plan = self.store.read(Lifecycle::Current, plan_stem)?;

            if plan.tasks.is_empty() || all_tasks_complete(&plan) {
                info!(plan = plan_stem, "no remaining tasks, loop complete");
                return Ok(());
            }

            if iteration >= self.config.iteration_cap {
                return Err(LoopError::IterationCapExceeded(self.config.iteration_cap, plan_stem.to_string()));
            }

            let prompt = self.compose_prompt(plan_stem)?;

            let options = RunOptions {
                working_dir: worktree.to_path_buf(),
                print_mode: false,
                max_retries: self.config.max_retries,
                retry_delay: std::time::Duration::from_secs(self.config.retry_delay_secs),
                grace_period: std::time::Duration::from_secs(self.config.grace_period_secs),
                timeout: None,
            };

            let report = self.runner.run(&prompt, &options, cancel).await;

            if let RunOutcome::Cancelled = report.outcome {
                // Nothing was committed for this attempt; leave the worktree
                // as the agent left it for the next run to pick up.
                return Err(LoopError::Cancelled(plan_stem.to_string()));
            }

            self.reconcile(plan_stem, worktree, iteration + 1)?;
            iteration += 1;

            match report.outcome {
                RunOutcome::Cancelled => unreachable!("handled above"),
                RunOutcome::Failed { reason } => {
                    return Err(LoopError::Agent(crate::error::RunnerError::NonTransient(reason)));
                }
                RunOutcome::Blocked { blocker, .. } => {
                    self.notifier.blocker(plan_stem, correlation_id, &blocker);
                    // Blockers are non-terminal by default: the agent is expected
                    // to keep working once the notifier's reply lands in feedback.
                    continue;
                }
                RunOutcome::InProgress { .. } => {
                    self.notifier.iteration(plan_stem, correlation_id, &format!("iteration {iteration}"));
                    continue;
                }
                RunOutcome::Complete { .. } => {
                    self.notifier.iteration(plan_stem, correlation_id, &format!("iteration {iteration}: reported complete"));
                    if self.verify(plan_stem, worktree, &options, cancel).await? {
                        return Ok(());
                    }
                    // verifier rejected: feedback was already written by verify(),
                    // so the next loop iteration will pick it up.
                    continue;
                }
            }
        }
    }

    fn compose_prompt(&self, plan_stem: &str) -> Result<String, LoopError> {
        let plan_body = self.store.read_body(Lifecycle::Current, plan_stem)?;

        let progress_tail = self.store.read_progress(Lifecycle::Current, plan_stem);

        let feedback = self.store.take_feedback(Lifecycle::Current, plan_stem)?;

        let mut prompt = String::new();
        prompt.push_str("# Plan\n\n");
        prompt.push_str(&plan_body);
        prompt.push_str("\n\n# Progress so far\n\n");
        prompt.push_str(tail(&progress_tail, 4000));
        if let Some(feedback) = feedback {
            prompt.push_str("\n\n# Feedback\n\n");
            prompt.push_str(&feedback);
        }
        prompt.push_str(&format!(
            "\n\nWhen every task is done, emit the literal text {} somewhere in your final response.",
            crate::agent::parser::COMPLETE_MARKER
        ));
        Ok(prompt)
    }

    fn reconcile(&self, plan_stem: &str, worktree: &Path, iteration: u32) -> anyhow::Result<()> {
        let status = self.vcs.status(worktree)?;
        if !status.is_clean() || !status.untracked.is_empty() {
            self.vcs.add(worktree, &["-A"])?;
        }

        self.store.append_progress(
            Lifecycle::Current,
            plan_stem,
            &format!("Completed: agent invocation for iteration {iteration}."),
        )?;
        self.vcs.add(worktree, &["-A"])?;

        self.vcs
            .commit(worktree, &format!("ralph: iteration {iteration} of {plan_stem}"))?;
        Ok(())
    }

    async fn verify(
        &self,
        plan_stem: &str,
        worktree: &Path,
        base_options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<bool, LoopError> {
        let plan_body = self.store.read_body(Lifecycle::Current, plan_stem)?;

        let verify_prompt = format!(
            "The following plan was reported complete. Reply with exactly one word, \
             \"yes\" or \"no\", indicating whether every task is genuinely satisfied.\n\n{plan_body}"
        );

        let options = RunOptions {
            print_mode: true,
            timeout: Some(std::time::Duration::from_secs(self.config.verification_timeout_secs)),
            working_dir: base_options.working_dir.clone(),
            max_retries: 0,
            retry_delay: base_options.retry_delay,
            grace_period: base_options.grace_period,
        };

        let report = self.runner.run(&verify_prompt, &options, cancel).await;
        let text = match report.outcome {
            RunOutcome::Complete { output } | RunOutcome::InProgress { output } => output,
            RunOutcome::Blocked { output, .. } => output,
            RunOutcome::Failed { reason } => {
                warn!(plan = plan_stem, reason, "verification invocation failed, treating as rejection");
                self.store
                    .write_feedback(Lifecycle::Current, plan_stem, &format!("Verification failed: {reason}"))?;
                return Ok(false);
            }
            RunOutcome::Cancelled => return Err(LoopError::Cancelled(plan_stem.to_string())),
        };

        let ratified = text.trim().to_lowercase().starts_with("yes");
        if !ratified {
            self.store
                .write_feedback(Lifecycle::Current, plan_stem, text.trim())?;
        }
        Ok(ratified)
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        text
    } else {
        &text[text.len() - max_chars..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_truncates_long_progress() {
        let long = "x".repeat(5000);
        assert_eq!(tail(&long, 4000).len(), 4000);
    }

    #[test]
    fn tail_keeps_short_progress_whole() {
        assert_eq!(tail("short", 4000), "short");
    }
}
