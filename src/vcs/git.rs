//! Git-backed `Vcs` implementation. Every method shells out to the real `git`
//! binary; there is no library-level access to repository internals.

use super::{Vcs, VcsStatus, WorktreeEntry};
use crate::cmd::Cmd;
use crate::error::VcsError;
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct GitVcs;

impl GitVcs {
    pub fn new() -> Self {
        GitVcs
    }

    fn git<'a>(&self, worktree: &'a Path) -> Cmd<'a> {
        Cmd::new("git").workdir(worktree)
    }
}

impl Default for GitVcs {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses `git status --porcelain` (v1). Each line is a two-character XY
/// status code, a space, then the path; renames use ` -> ` as a separator.
fn parse_status_porcelain(output: &str) -> VcsStatus {
    let mut status = VcsStatus::default();

    for line in output.lines() {
        if line.len() < 3 {
            continue;
        }
        let (code, rest) = line.split_at(2);
        let path = rest.trim_start();
        let path = path.split(" -> ").last().unwrap_or(path).to_string();

        let index = code.as_bytes()[0] as char;
        let work_tree = code.as_bytes()[1] as char;

        if index == '?' && work_tree == '?' {
            status.untracked.push(path);
            continue;
        }
        if index != ' ' {
            status.staged.push(path.clone());
        }
        if work_tree != ' ' {
            status.unstaged.push(path);
        }
    }

    status
}

fn classify_stderr(stderr: &str) -> VcsError {
    if stderr.contains("already exists") {
        VcsError::BranchExists(stderr.trim().to_string())
    } else if stderr.contains("is already checked out") || stderr.contains("already used by worktree") {
        VcsError::BranchAlreadyCheckedOut(stderr.trim().to_string())
    } else if stderr.contains("CONFLICT") || stderr.contains("Automatic merge failed") {
        VcsError::MergeConflict(stderr.trim().to_string())
    } else {
        VcsError::Command(stderr.trim().to_string())
    }
}

impl Vcs for GitVcs {
    fn repo_root(&self) -> Result<PathBuf, VcsError> {
        let cwd = std::env::current_dir().map_err(|e| VcsError::Other(e.into()))?;
        let out = Cmd::new("git")
            .args(&["rev-parse", "--show-toplevel"])
            .workdir(&cwd)
            .run_and_capture_stdout()
            .map_err(|_| VcsError::NotRepo(cwd.clone()))?;
        Ok(PathBuf::from(out))
    }

    fn status(&self, worktree: &Path) -> Result<VcsStatus, VcsError> {
        let out = self
            .git(worktree)
            .args(&["status", "--porcelain"])
            .run_and_capture_stdout()
            .map_err(|e| VcsError::Other(e))?;
        let mut status = parse_status_porcelain(&out);

        let branch = self
            .git(worktree)
            .args(&["rev-parse", "--abbrev-ref", "HEAD"])
            .run_and_capture_stdout()
            .ok();
        status.branch = branch.filter(|b| b != "HEAD");
        Ok(status)
    }

    fn add(&self, worktree: &Path, files: &[&str]) -> Result<(), VcsError> {
        let mut args = vec!["add"];
        args.extend_from_slice(files);
        self.git(worktree)
            .args(&args)
            .run()
            .map(|_| ())
            .map_err(VcsError::Other)
    }

    fn commit(&self, worktree: &Path, message: &str) -> Result<(), VcsError> {
        let output = Cmd::new("git")
            .workdir(worktree)
            .args(&["commit", "-m", message])
            .run();

        match output {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("nothing to commit") {
                    Ok(())
                } else {
                    Err(VcsError::Other(e))
                }
            }
        }
    }

    fn current_branch(&self, worktree: &Path) -> Result<Option<String>, VcsError> {
        let branch = self
            .git(worktree)
            .args(&["rev-parse", "--abbrev-ref", "HEAD"])
            .run_and_capture_stdout()
            .map_err(VcsError::Other)?;
        Ok(if branch == "HEAD" { None } else { Some(branch) })
    }

    fn branch_exists(&self, worktree: &Path, name: &str) -> Result<bool, VcsError> {
        self.git(worktree)
            .args(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")])
            .run_as_check()
            .map_err(VcsError::Other)
    }

    fn create_branch(&self, worktree: &Path, name: &str, base: &str) -> Result<(), VcsError> {
        if self.branch_exists(worktree, name)? {
            return Err(VcsError::BranchExists(name.to_string()));
        }
        self.git(worktree)
            .args(&["branch", name, base])
            .run()
            .map(|_| ())
            .map_err(|e| classify_stderr(&e.to_string()))
    }

    fn delete_branch(&self, worktree: &Path, name: &str, force: bool) -> Result<(), VcsError> {
        let flag = if force { "-D" } else { "-d" };
        self.git(worktree)
            .args(&["branch", flag, name])
            .run()
            .map(|_| ())
            .map_err(|_| VcsError::BranchNotFound(name.to_string()))
    }

    fn checkout(&self, worktree: &Path, branch: &str) -> Result<(), VcsError> {
        self.git(worktree)
            .args(&["checkout", branch])
            .run()
            .map(|_| ())
            .map_err(|_| VcsError::BranchNotFound(branch.to_string()))
    }

    fn merge(&self, worktree: &Path, branch: &str, no_fast_forward: bool) -> Result<(), VcsError> {
        let mut args = vec!["merge"];
        if no_fast_forward {
            args.push("--no-ff");
        }
        args.push(branch);
        self.git(worktree)
            .args(&args)
            .run()
            .map(|_| ())
            .map_err(|e| classify_stderr(&e.to_string()))
    }

    fn create_worktree(&self, path: &Path, branch: &str, base: &str) -> Result<(), VcsError> {
        let root = self.repo_root()?;
        let path_str = path.to_string_lossy().to_string();

        let output = Command::new("git")
            .current_dir(&root)
            .args(["worktree", "add", "-b", branch, &path_str, base])
            .output()
            .map_err(|e| VcsError::Other(e.into()))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_stderr(&stderr))
    }

    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError> {
        let root = self.repo_root()?;
        let path_str = path.to_string_lossy().to_string();

        let output = Command::new("git")
            .current_dir(&root)
            .args(["worktree", "remove", "--force", &path_str])
            .output()
            .map_err(|e| VcsError::Other(e.into()))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("is not a working tree") || stderr.contains("not a valid path") {
            return Err(VcsError::WorktreeNotFound(path.to_path_buf()));
        }
        Err(VcsError::Command(stderr.trim().to_string()))
    }

    fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>, VcsError> {
        let root = self.repo_root()?;
        let output = Cmd::new("git")
            .workdir(&root)
            .args(&["worktree", "list", "--porcelain"])
            .run_and_capture_stdout()
            .map_err(VcsError::Other)?;

        let mut entries = Vec::new();
        let mut path = None;
        let mut branch = None;
        let mut commit = None;
        let mut bare = false;

        let flush = |path: &mut Option<PathBuf>,
                     branch: &mut Option<String>,
                     commit: &mut Option<String>,
                     bare: &mut bool,
                     entries: &mut Vec<WorktreeEntry>| {
            if let Some(p) = path.take() {
                entries.push(WorktreeEntry {
                    path: p,
                    branch: branch.take(),
                    commit: commit.take().unwrap_or_default(),
                    bare: *bare,
                });
            }
            *bare = false;
        };

        for block in output.split("\n\n") {
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("worktree ") {
                    path = Some(PathBuf::from(rest));
                } else if let Some(rest) = line.strip_prefix("HEAD ") {
                    commit = Some(rest.to_string());
                } else if let Some(rest) = line.strip_prefix("branch ") {
                    branch = Some(rest.trim_start_matches("refs/heads/").to_string());
                } else if line == "bare" {
                    bare = true;
                }
            }
            flush(&mut path, &mut branch, &mut commit, &mut bare, &mut entries);
        }

        Ok(entries)
    }

    fn push(&self, worktree: &Path) -> Result<(), VcsError> {
        self.git(worktree)
            .args(&["push"])
            .run()
            .map(|_| ())
            .map_err(VcsError::Other)
    }

    fn push_with_upstream(&self, worktree: &Path, remote: &str, branch: &str) -> Result<(), VcsError> {
        self.git(worktree)
            .args(&["push", "-u", remote, branch])
            .run()
            .map(|_| ())
            .map_err(VcsError::Other)
    }
}

/// Sanitizes a plan stem into a branch-name-safe slug, stripping a leading
/// `YYYYMMDD-HHMMSS-` timestamp prefix if present.
pub fn branch_slug(plan_stem: &str) -> String {
    static TIMESTAMP_PREFIX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = TIMESTAMP_PREFIX
        .get_or_init(|| regex::Regex::new(r"^\d{8}-\d{6}-").expect("valid regex"));

    let stripped = re.replace(plan_stem, "");
    let sanitized: String = stripped
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
        .collect();

    if sanitized.trim_matches('-').is_empty() {
        "plan".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_porcelain_status() {
        let out = " M src/lib.rs\nA  new.rs\n?? untracked.txt\nR  old.rs -> new2.rs\n";
        let status = parse_status_porcelain(out);
        assert_eq!(status.unstaged, vec!["src/lib.rs".to_string()]);
        assert!(status.staged.contains(&"new.rs".to_string()));
        assert_eq!(status.untracked, vec!["untracked.txt".to_string()]);
        assert!(status.staged.contains(&"new2.rs".to_string()));
    }

    #[test]
    fn clean_status_has_no_entries() {
        let status = parse_status_porcelain("");
        assert!(status.is_clean());
        assert!(status.untracked.is_empty());
    }

    #[test]
    fn branch_slug_strips_timestamp_prefix() {
        assert_eq!(branch_slug("20250131-120000-fix-bug"), "fix-bug");
    }

    #[test]
    fn branch_slug_sanitizes_special_chars() {
        assert_eq!(branch_slug("feature/with space!"), "feature-with-space-");
    }

    #[test]
    fn branch_slug_falls_back_on_empty() {
        assert_eq!(branch_slug("!!!"), "plan");
    }
}
