//! Typed leaf errors for the core subsystems. Call sites that need to branch on
//! failure kind match these; call sites that only need to propagate wrap them in
//! `anyhow::Error` via `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("{0} is not a git repository")]
    NotRepo(std::path::PathBuf),

    #[error("branch {0} already exists")]
    BranchExists(String),

    #[error("branch {0} not found")]
    BranchNotFound(String),

    #[error("branch {0} is already checked out in another worktree")]
    BranchAlreadyCheckedOut(String),

    #[error("worktree {0} not found")]
    WorktreeNotFound(std::path::PathBuf),

    #[error("merge conflict merging {0}")]
    MergeConflict(String),

    #[error("uncommitted changes in {0}")]
    Uncommitted(std::path::PathBuf),

    #[error("git command failed: {0}")]
    Command(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("plan {0} is already current")]
    AlreadyCurrent(String),

    #[error("branch {0} is in use by another worktree")]
    BranchInUse(String),

    #[error("worktree for {0} already exists")]
    WorktreeExists(String),
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn agent process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("io error communicating with agent process: {0}")]
    Io(#[source] std::io::Error),

    #[error("agent failed non-transiently: {0}")]
    NonTransient(String),

    #[error("agent invocation cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("iteration cap ({0}) exceeded for plan {1}")]
    IterationCapExceeded(u32, String),

    #[error("loop cancelled for plan {0}")]
    Cancelled(String),

    #[error("agent error: {0}")]
    Agent(#[from] RunnerError),

    #[error("version control error: {0}")]
    Vcs(#[from] VcsError),

    #[error("plan store error: {0}")]
    Plan(#[from] anyhow::Error),
}
