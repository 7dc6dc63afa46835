//! Plan store: discovers plan files in the lifecycle queue, parses them, and
//! moves them through `pending/` -> `current/` -> `complete/`.

pub mod parser;

use anyhow::{Context, Result};
use chrono::Local;
use parser::ParsedPlan;
use std::path::{Path, PathBuf};

pub struct PlanStore {
    root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Pending,
    Current,
    Complete,
}

impl Lifecycle {
    fn dirname(self) -> &'static str {
        match self {
            Lifecycle::Pending => "pending",
            Lifecycle::Current => "current",
            Lifecycle::Complete => "complete",
        }
    }
}

impl PlanStore {
    pub fn new(repo_root: &Path) -> Self {
        PlanStore {
            root: repo_root.join("plans"),
        }
    }

    fn dir(&self, stage: Lifecycle) -> PathBuf {
        self.root.join(stage.dirname())
    }

    fn plan_path(&self, stage: Lifecycle, stem: &str) -> PathBuf {
        self.dir(stage).join(format!("{stem}.md"))
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for stage in [Lifecycle::Pending, Lifecycle::Current, Lifecycle::Complete] {
            std::fs::create_dir_all(self.dir(stage))
                .with_context(|| format!("creating {}", self.dir(stage).display()))?;
        }
        Ok(())
    }

    /// Lexicographically ordered list of pending plan stems.
    pub fn pending(&self) -> Result<Vec<String>> {
        list_stems(&self.dir(Lifecycle::Pending))
    }

    /// The plan currently being worked, if any. Errors if more than one plan
    /// is present in `current/`, which is a configuration error rather than a
    /// normal race — there should only ever be one.
    pub fn current(&self) -> Result<Option<String>> {
        let mut stems = list_stems(&self.dir(Lifecycle::Current))?;
        match stems.len() {
            0 => Ok(None),
            1 => Ok(Some(stems.remove(0))),
            n => anyhow::bail!("expected at most one plan in current/, found {n}"),
        }
    }

    /// Atomically moves `stem` from `pending/` to `current/`.
    pub fn activate(&self, stem: &str) -> Result<PathBuf> {
        let from = self.plan_path(Lifecycle::Pending, stem);
        let to = self.plan_path(Lifecycle::Current, stem);
        std::fs::rename(&from, &to)
            .with_context(|| format!("activating {stem}: {} -> {}", from.display(), to.display()))?;
        Ok(to)
    }

    /// Moves `stem` from `current/` to `complete/`.
    pub fn complete(&self, stem: &str) -> Result<PathBuf> {
        let from = self.plan_path(Lifecycle::Current, stem);
        let to = self.plan_path(Lifecycle::Complete, stem);
        std::fs::rename(&from, &to)
            .with_context(|| format!("completing {stem}: {} -> {}", from.display(), to.display()))?;
        Ok(to)
    }

    /// Moves `stem` back from `current/` to `pending/`, for interrupted runs.
    pub fn reset(&self, stem: &str) -> Result<PathBuf> {
        let from = self.plan_path(Lifecycle::Current, stem);
        let to = self.plan_path(Lifecycle::Pending, stem);
        std::fs::rename(&from, &to)
            .with_context(|| format!("resetting {stem}: {} -> {}", from.display(), to.display()))?;
        Ok(to)
    }

    pub fn read(&self, stage: Lifecycle, stem: &str) -> Result<ParsedPlan> {
        let path = self.plan_path(stage, stem);
        let body = std::fs::read_to_string(&path)
            .with_context(|| format!("reading plan {}", path.display()))?;
        Ok(parser::parse(&body))
    }

    pub fn read_body(&self, stage: Lifecycle, stem: &str) -> Result<String> {
        let path = self.plan_path(stage, stem);
        std::fs::read_to_string(&path).with_context(|| format!("reading plan {}", path.display()))
    }

    pub fn write_body(&self, stage: Lifecycle, stem: &str, body: &str) -> Result<()> {
        let path = self.plan_path(stage, stem);
        std::fs::write(&path, body).with_context(|| format!("writing plan {}", path.display()))
    }

    fn progress_path(&self, stage: Lifecycle, stem: &str) -> PathBuf {
        self.dir(stage).join(format!("{stem}.progress.md"))
    }

    fn feedback_path(&self, stage: Lifecycle, stem: &str) -> PathBuf {
        self.dir(stage).join(format!("{stem}.feedback.md"))
    }

    /// Appends an iteration entry to the progress log, creating it if absent.
    /// The log is append-only: iteration numbering is the number of
    /// `### Iteration` headers already present, so resuming a worktree
    /// continues counting rather than resetting.
    pub fn append_progress(&self, stage: Lifecycle, stem: &str, summary: &str) -> Result<u32> {
        let path = self.progress_path(stage, stem);
        let existing = std::fs::read_to_string(&path).unwrap_or_default();
        let iteration = existing.matches("### Iteration ").count() as u32 + 1;

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let entry = format!("### Iteration {iteration} ({timestamp})\n{summary}\n\n");

        let mut full = existing;
        full.push_str(&entry);
        std::fs::write(&path, full).with_context(|| format!("writing {}", path.display()))?;
        Ok(iteration)
    }

    pub fn read_progress(&self, stage: Lifecycle, stem: &str) -> String {
        let path = self.progress_path(stage, stem);
        std::fs::read_to_string(&path).unwrap_or_default()
    }

    pub fn iteration_count(&self, stage: Lifecycle, stem: &str) -> u32 {
        let path = self.progress_path(stage, stem);
        std::fs::read_to_string(&path)
            .map(|s| s.matches("### Iteration ").count() as u32)
            .unwrap_or(0)
    }

    /// Reads feedback text, if any, and clears the file so it is not
    /// re-injected into subsequent prompts.
    pub fn take_feedback(&self, stage: Lifecycle, stem: &str) -> Result<Option<String>> {
        let path = self.feedback_path(stage, stem);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        std::fs::write(&path, "").with_context(|| format!("clearing {}", path.display()))?;
        Ok(Some(trimmed.to_string()))
    }

    pub fn write_feedback(&self, stage: Lifecycle, stem: &str, content: &str) -> Result<()> {
        let path = self.feedback_path(stage, stem);
        std::fs::write(&path, content).with_context(|| format!("writing {}", path.display()))
    }
}

fn list_stems(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut stems = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".md") || name.ends_with(".progress.md") || name.ends_with(".feedback.md") {
            continue;
        }
        stems.push(name.trim_end_matches(".md").to_string());
    }
    stems.sort();
    Ok(stems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, PlanStore) {
        let dir = tempdir().unwrap();
        let store = PlanStore::new(dir.path());
        store.ensure_dirs().unwrap();
        (dir, store)
    }

    #[test]
    fn discovers_pending_plans_in_order() {
        let (_dir, store) = setup();
        std::fs::write(store.dir(Lifecycle::Pending).join("b.md"), "# b").unwrap();
        std::fs::write(store.dir(Lifecycle::Pending).join("a.md"), "# a").unwrap();
        std::fs::write(store.dir(Lifecycle::Pending).join("a.progress.md"), "").unwrap();

        let pending = store.pending().unwrap();
        assert_eq!(pending, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn activate_moves_plan_atomically() {
        let (_dir, store) = setup();
        std::fs::write(store.dir(Lifecycle::Pending).join("p.md"), "- [ ] task").unwrap();
        store.activate("p").unwrap();

        assert!(store.current().unwrap() == Some("p".to_string()));
        assert!(!store.plan_path(Lifecycle::Pending, "p").exists());
    }

    #[test]
    fn progress_entries_are_monotonic() {
        let (_dir, store) = setup();
        std::fs::write(store.dir(Lifecycle::Current).join("p.md"), "- [ ] task").unwrap();

        let first = store.append_progress(Lifecycle::Current, "p", "did a thing").unwrap();
        let second = store.append_progress(Lifecycle::Current, "p", "did another thing").unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn feedback_is_consumed_once() {
        let (_dir, store) = setup();
        store.write_feedback(Lifecycle::Current, "p", "please also handle edge case X").unwrap();

        let feedback = store.take_feedback(Lifecycle::Current, "p").unwrap();
        assert_eq!(feedback.as_deref(), Some("please also handle edge case X"));

        let again = store.take_feedback(Lifecycle::Current, "p").unwrap();
        assert_eq!(again, None);
    }
}
