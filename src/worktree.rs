//! Worktree scheduler: the three-layer lock (queue-folder, branch,
//! directory), worktree creation/seeding/release, and orphan cleanup.

use crate::error::LockError;
use crate::vcs::Vcs;
use crate::vcs::git::branch_slug;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct WorktreeScheduler<'a> {
    repo_root: PathBuf,
    vcs: &'a dyn Vcs,
    base_branch: String,
    seed_dotfiles: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AcquiredWorktree {
    pub path: PathBuf,
    pub branch: String,
}

impl<'a> WorktreeScheduler<'a> {
    pub fn new(repo_root: PathBuf, vcs: &'a dyn Vcs, base_branch: String, seed_dotfiles: Vec<String>) -> Self {
        WorktreeScheduler {
            repo_root,
            vcs,
            base_branch,
            seed_dotfiles,
        }
    }

    fn worktrees_root(&self) -> PathBuf {
        self.repo_root.join(".ralph").join("worktrees")
    }

    fn worktree_path(&self, slug: &str) -> PathBuf {
        self.worktrees_root().join(slug)
    }

    /// Acquires an isolated worktree for `plan_stem`, creating its feature
    /// branch off `base_branch` if needed. Idempotent: a second call for the
    /// same stem while the first worktree still exists returns the same path
    /// without mutating version control again (directory-lock layer).
    pub fn acquire(&self, plan_stem: &str) -> Result<AcquiredWorktree, LockError> {
        std::fs::create_dir_all(self.worktrees_root())
            .map_err(|e| LockError::WorktreeExists(format!("{plan_stem}: {e}")))?;

        let slug = branch_slug(plan_stem);
        let branch = format!("feat/{slug}");
        let path = self.worktree_path(&slug);

        if path.exists() {
            info!(plan = plan_stem, path = %path.display(), "reusing existing worktree");
            return Ok(AcquiredWorktree { path, branch });
        }

        match self.vcs.create_worktree(&path, &branch, &self.base_branch) {
            Ok(()) => {
                info!(plan = plan_stem, branch, "created worktree");
                Ok(AcquiredWorktree { path, branch })
            }
            Err(e) => Err(LockError::BranchInUse(format!("{branch}: {e}"))),
        }
    }

    /// Copies configured dotfiles and runs dependency install for detected
    /// project types. Failures here are non-fatal: the worktree is still
    /// usable, just not pre-seeded.
    pub fn seed(&self, worktree: &AcquiredWorktree) {
        for dotfile in &self.seed_dotfiles {
            let src = self.repo_root.join(dotfile);
            let dst = worktree.path.join(dotfile);
            if src.exists() {
                if let Err(e) = std::fs::copy(&src, &dst) {
                    warn!(dotfile, error = %e, "failed to seed dotfile, continuing");
                }
            }
        }

        if let Some(install_cmd) = detect_install_command(&worktree.path) {
            info!(command = %install_cmd, "running dependency install in worktree");
            let parts: Vec<&str> = install_cmd.split_whitespace().collect();
            if let Some((program, args)) = parts.split_first() {
                let status = std::process::Command::new(program)
                    .args(args)
                    .current_dir(&worktree.path)
                    .status();
                if let Err(e) = status {
                    warn!(error = %e, "dependency install failed, continuing");
                }
            }
        }
    }

    /// Releases a worktree: force-removes the working tree directory. The
    /// branch is left intact for a later merge step.
    pub fn release(&self, worktree: &AcquiredWorktree) -> Result<()> {
        self.vcs
            .remove_worktree(&worktree.path)
            .with_context(|| format!("removing worktree {}", worktree.path.display()))?;
        Ok(())
    }

    /// Removes worktrees under `.ralph/worktrees/` that have no corresponding
    /// plan in `current/`.
    pub fn cleanup(&self, current_plan_slugs: &[String]) -> Result<Vec<PathBuf>> {
        let root = self.worktrees_root();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for entry in std::fs::read_dir(&root).with_context(|| format!("reading {}", root.display()))? {
            let entry = entry?;
            let path = entry.path();
            let Some(slug) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if current_plan_slugs.iter().any(|s| branch_slug(s) == slug) {
                continue;
            }
            warn!(slug, "removing orphaned worktree");
            if self.vcs.remove_worktree(&path).is_ok() {
                removed.push(path);
            }
        }
        Ok(removed)
    }
}

/// Lockfile marker -> install command, checked in order.
const PROJECT_MARKERS: &[(&str, &str)] = &[
    ("package-lock.json", "npm ci"),
    ("yarn.lock", "yarn install --frozen-lockfile"),
    ("pnpm-lock.yaml", "pnpm install --frozen-lockfile"),
    ("bun.lockb", "bun install"),
    ("composer.json", "composer install"),
    ("requirements.txt", "pip install -r requirements.txt"),
    ("pyproject.toml", "pip install ."),
    ("Gemfile", "bundle install"),
    ("go.mod", "go mod download"),
    ("Cargo.toml", "cargo fetch"),
];

fn detect_install_command(worktree: &Path) -> Option<String> {
    PROJECT_MARKERS
        .iter()
        .find(|(marker, _)| worktree.join(marker).exists())
        .map(|(_, cmd)| cmd.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cargo_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        assert_eq!(detect_install_command(dir.path()), Some("cargo fetch".to_string()));
    }

    #[test]
    fn no_markers_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_install_command(dir.path()), None);
    }

    #[test]
    fn prefers_first_matching_marker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        assert_eq!(detect_install_command(dir.path()), Some("npm ci".to_string()));
    }
}
