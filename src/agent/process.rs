//! Child-process execution for the agent runner: streaming output capture,
//! the post-`result` grace-period hang watcher, the per-attempt timeout, and
//! the transient-failure retry policy.

use super::parser::{self, ParsedEvent};
use super::{RunOptions, RunOutcome, RunReport};
use crate::error::RunnerError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct AgentRunner {
    command: String,
    args: Vec<String>,
}

impl AgentRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        AgentRunner {
            command: command.into(),
            args,
        }
    }

    /// Runs the agent against `prompt`, retrying transient failures up to
    /// `options.max_retries` times with a linearly increasing delay. `cancel`
    /// aborts immediately, including mid-retry-sleep.
    pub async fn run(&self, prompt: &str, options: &RunOptions, cancel: &CancellationToken) -> RunReport {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return RunReport { outcome: RunOutcome::Cancelled, attempts: attempt };
            }
            attempt += 1;
            match self.run_once(prompt, options, cancel).await {
                Ok(outcome) => {
                    return RunReport { outcome, attempts: attempt };
                }
                Err(RunnerError::Cancelled) => {
                    return RunReport {
                        outcome: RunOutcome::Cancelled,
                        attempts: attempt,
                    };
                }
                Err(e) if attempt <= options.max_retries && is_transient(&e) => {
                    warn!(attempt, error = %e, "agent invocation failed transiently, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(options.retry_delay * attempt) => {}
                        _ = cancel.cancelled() => {
                            return RunReport { outcome: RunOutcome::Cancelled, attempts: attempt };
                        }
                    }
                    continue;
                }
                Err(e) => {
                    return RunReport {
                        outcome: RunOutcome::Failed { reason: e.to_string() },
                        attempts: attempt,
                    };
                }
            }
        }
    }

    async fn run_once(
        &self,
        prompt: &str,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunnerError> {
        let mut cmd = self.build_command(options);
        let mut child = cmd.spawn().map_err(RunnerError::Spawn)?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        let prompt_owned = prompt.to_string();
        tokio::spawn(async move {
            let _ = stdin.write_all(prompt_owned.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let stdout = child.stdout.take().expect("stdout was piped");
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        });

        let mut retained = String::new();
        let mut text_accumulator = String::new();
        let mut final_output: Option<String> = None;
        let mut is_error = false;
        let mut result_seen_at: Option<Instant> = None;
        let mut killed_for_hang = false;
        let mut cancelled = false;

        let streaming = async {
            loop {
                let grace_deadline = result_seen_at.map(|seen| seen + options.grace_period);

                tokio::select! {
                    line = rx.recv() => {
                        match line {
                            Some(line) => {
                                retained.push_str(&line);
                                retained.push('\n');

                                if !parser::is_structured_line(&line) {
                                    text_accumulator.push_str(&line);
                                    text_accumulator.push('\n');
                                }

                                for event in parser::parse_json_line(&line) {
                                    match event {
                                        ParsedEvent::TextContent(t) => {
                                            text_accumulator.push_str(&t);
                                            text_accumulator.push('\n');
                                        }
                                        ParsedEvent::Result { output, is_error: err, .. } => {
                                            final_output = output;
                                            is_error = err;
                                            result_seen_at = Some(Instant::now());
                                            debug!("observed result record, starting grace period");
                                        }
                                    }
                                }
                            }
                            None => break,
                        }
                    }
                    _ = cancel.cancelled() => {
                        warn!("agent invocation cancelled, killing child");
                        kill_tree(&mut child);
                        cancelled = true;
                        break;
                    }
                    _ = async {
                        match grace_deadline {
                            Some(deadline) => tokio::time::sleep_until(deadline).await,
                            None => std::future::pending().await,
                        }
                    } => {
                        warn!("agent process still alive after grace period, killing");
                        kill_tree(&mut child);
                        killed_for_hang = true;
                        break;
                    }
                }
            }
        };

        match options.timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, streaming).await.is_err() {
                    warn!(?limit, "agent invocation exceeded its timeout, killing");
                    kill_tree(&mut child);
                    let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
                    return Err(RunnerError::NonTransient(format!(
                        "agent invocation exceeded timeout of {limit:?}"
                    )));
                }
            }
            None => streaming.await,
        }

        if cancelled {
            let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
            return Err(RunnerError::Cancelled);
        }

        let status = tokio::time::timeout(Duration::from_secs(30), child.wait()).await;
        match status {
            Ok(Ok(status)) => {
                if !status.success() && final_output.is_none() && !killed_for_hang {
                    return Err(RunnerError::NonTransient(format!(
                        "agent exited with status {status} and produced no result record"
                    )));
                }
            }
            Ok(Err(e)) => return Err(RunnerError::Io(e)),
            Err(_) => {
                kill_tree(&mut child);
            }
        }

        info!(bytes = retained.len(), "agent invocation finished");

        if final_output.is_none() && !killed_for_hang {
            for line in retained.lines() {
                if parser::is_transient_failure_line(line) {
                    return Err(RunnerError::NonTransient(format!("transient marker: {line}")));
                }
            }
            return Err(RunnerError::NonTransient(
                "agent produced no result record".to_string(),
            ));
        }

        if let Some(blocker) = parser::extract_blocker(&text_accumulator) {
            return Ok(RunOutcome::Blocked {
                output: text_accumulator,
                blocker,
            });
        }

        if parser::contains_completion_marker(&text_accumulator) {
            return Ok(RunOutcome::Complete { output: text_accumulator });
        }

        if is_error {
            return Err(RunnerError::NonTransient(
                final_output.unwrap_or_else(|| "agent reported an error".to_string()),
            ));
        }

        Ok(RunOutcome::InProgress { output: text_accumulator })
    }

    fn build_command(&self, options: &RunOptions) -> Command {
        let mut cmd = Command::new(&self.command);
        for arg in &self.args {
            cmd.arg(arg);
        }
        if options.print_mode {
            cmd.arg("--print");
        } else {
            cmd.arg("--output-format").arg("stream-json").arg("--verbose");
        }
        cmd.current_dir(&options.working_dir);
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

/// Kills the child and, on unix, the whole process group it leads (it was
/// spawned with `process_group(0)`) so a subprocess the agent forked cannot
/// outlive it.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let _ = std::process::Command::new("kill")
                .args(["-KILL", &format!("-{pid}")])
                .status();
        }
    }
    let _ = child.start_kill();
}

fn is_transient(err: &RunnerError) -> bool {
    match err {
        RunnerError::NonTransient(msg) => {
            let lower = msg.to_lowercase();
            lower.contains("transient marker")
                || lower.contains("no result record")
                || lower.contains("rate limit")
                || lower.contains("overloaded")
        }
        RunnerError::Io(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_missing_result_as_transient() {
        let err = RunnerError::NonTransient("agent produced no result record".to_string());
        assert!(is_transient(&err));
    }

    #[test]
    fn classifies_hard_failure_as_non_transient() {
        let err = RunnerError::NonTransient("agent reported an error: bad prompt".to_string());
        assert!(!is_transient(&err));
    }

    #[tokio::test]
    async fn run_once_detects_completion_via_real_child_process() {
        // Reads the prompt from stdin and discards it; the completion comes
        // from the script body, not from echoing the prompt.
        let script = r#"cat >/dev/null; printf '%s\n' '{"type":"result","result":"ok","is_error":false}' '<promise>COMPLETE</promise>'"#;
        let runner = AgentRunner::new("sh", vec!["-c".to_string(), script.to_string()]);
        let options = RunOptions {
            working_dir: std::env::temp_dir(),
            ..Default::default()
        };
        let cancel = CancellationToken::new();

        let outcome = runner.run_once("ignored prompt", &options, &cancel).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Complete { .. }));
    }

    #[tokio::test]
    async fn run_once_extracts_blocker() {
        let script = r#"cat >/dev/null; printf '%s\n' '{"type":"result","result":"ok","is_error":false}' '<blocker>need credentials</blocker>'"#;
        let runner = AgentRunner::new("sh", vec!["-c".to_string(), script.to_string()]);
        let options = RunOptions {
            working_dir: std::env::temp_dir(),
            ..Default::default()
        };
        let cancel = CancellationToken::new();

        let outcome = runner.run_once("ignored prompt", &options, &cancel).await.unwrap();
        match outcome {
            RunOutcome::Blocked { blocker, .. } => assert_eq!(blocker.description, "need credentials"),
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_once_honors_cancellation() {
        let script = "cat >/dev/null; sleep 30";
        let runner = AgentRunner::new("sh", vec!["-c".to_string(), script.to_string()]);
        let options = RunOptions {
            working_dir: std::env::temp_dir(),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = runner.run_once("ignored prompt", &options, &cancel).await;
        assert!(matches!(result, Err(RunnerError::Cancelled)));
    }

    #[tokio::test]
    async fn run_once_honors_timeout() {
        let script = "cat >/dev/null; sleep 30";
        let runner = AgentRunner::new("sh", vec!["-c".to_string(), script.to_string()]);
        let options = RunOptions {
            working_dir: std::env::temp_dir(),
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let cancel = CancellationToken::new();

        let result = runner.run_once("ignored prompt", &options, &cancel).await;
        assert!(matches!(result, Err(RunnerError::NonTransient(_))));
    }
}
