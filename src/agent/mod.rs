//! Agent runner: invokes the external coding agent, streams its output,
//! detects completion/blocker markers, retries transient failures, and
//! recovers from the known hang-after-completion defect.

pub mod parser;
mod process;

pub use process::AgentRunner;

use parser::Blocker;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub working_dir: PathBuf,
    pub print_mode: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub grace_period: Duration,
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            working_dir: PathBuf::from("."),
            print_mode: false,
            max_retries: 5,
            retry_delay: Duration::from_secs(5),
            grace_period: Duration::from_secs(5),
            timeout: None,
        }
    }
}

/// Sum-typed runner outcome; callers dispatch on the variant rather than
/// inspecting free-form strings.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Complete { output: String },
    Blocked { output: String, blocker: Blocker },
    InProgress { output: String },
    Cancelled,
    Failed { reason: String },
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub attempts: u32,
}

impl Default for RunOutcome {
    fn default() -> Self {
        RunOutcome::InProgress { output: String::new() }
    }
}
