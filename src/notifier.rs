//! Notifier interface consumed by the worker and iteration loop at lifecycle
//! boundaries. Methods are fire-and-forget: a notifier failure must never
//! abort plan execution.

use crate::agent::parser::Blocker;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Merged { branch: String },
    PullRequestRequested { branch: String },
}

pub trait Notifier: Send + Sync {
    fn start(&self, plan: &str) -> Uuid;
    fn iteration(&self, plan: &str, correlation_id: Uuid, summary: &str);
    fn blocker(&self, plan: &str, correlation_id: Uuid, blocker: &Blocker);
    fn complete(&self, plan: &str, correlation_id: Uuid, outcome: &Outcome);
    fn error(&self, plan: &str, correlation_id: Uuid, message: &str);
}

/// Default notifier: logs through `tracing` and appends structured JSON lines
/// to `.ralph/notifications.json`, deduping blocker emissions by
/// `(plan stem, blocker hash)`.
pub struct LogNotifier {
    log_path: PathBuf,
    seq: AtomicU64,
    seen_blockers: Mutex<HashSet<(String, String)>>,
}

#[derive(Serialize)]
struct Entry {
    seq: u64,
    ts: String,
    plan: String,
    correlation_id: Uuid,
    event: Value,
}

impl LogNotifier {
    pub fn new(repo_root: &Path) -> anyhow::Result<Self> {
        let dir = repo_root.join(".ralph");
        std::fs::create_dir_all(&dir)?;
        Ok(LogNotifier {
            log_path: dir.join("notifications.json"),
            seq: AtomicU64::new(0),
            seen_blockers: Mutex::new(HashSet::new()),
        })
    }

    fn append(&self, plan: &str, correlation_id: Uuid, event: Value) {
        let entry = Entry {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            plan: plan.to_string(),
            correlation_id,
            event,
        };

        let Ok(line) = serde_json::to_string(&entry) else {
            return;
        };

        // write-to-temp-then-rename keeps concurrent workers from ever
        // interleaving partial writes into the shared notifications file.
        let tmp = self.log_path.with_extension("json.tmp");
        let existing = std::fs::read_to_string(&self.log_path).unwrap_or_default();
        let mut combined = existing;
        combined.push_str(&line);
        combined.push('\n');

        if std::fs::write(&tmp, &combined).is_ok() {
            let _ = std::fs::rename(&tmp, &self.log_path);
        } else if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.log_path) {
            let _ = writeln!(file, "{line}");
        }
    }
}

impl Notifier for LogNotifier {
    fn start(&self, plan: &str) -> Uuid {
        let id = Uuid::new_v4();
        tracing::info!(plan, correlation_id = %id, "plan started");
        self.append(plan, id, serde_json::json!({"type": "start"}));
        id
    }

    fn iteration(&self, plan: &str, correlation_id: Uuid, summary: &str) {
        tracing::info!(plan, correlation_id = %correlation_id, summary, "iteration complete");
        self.append(plan, correlation_id, serde_json::json!({"type": "iteration", "summary": summary}));
    }

    fn blocker(&self, plan: &str, correlation_id: Uuid, blocker: &Blocker) {
        let key = (plan.to_string(), blocker.hash.clone());
        let mut seen = self.seen_blockers.lock().expect("notifier lock poisoned");
        if !seen.insert(key) {
            return;
        }
        drop(seen);

        tracing::warn!(plan, correlation_id = %correlation_id, hash = %blocker.hash, "blocker reported");
        self.append(
            plan,
            correlation_id,
            serde_json::json!({
                "type": "blocker",
                "description": blocker.description,
                "action_hint": blocker.action_hint,
                "resume_hint": blocker.resume_hint,
                "hash": blocker.hash,
            }),
        );
    }

    fn complete(&self, plan: &str, correlation_id: Uuid, outcome: &Outcome) {
        tracing::info!(plan, correlation_id = %correlation_id, "plan complete");
        self.append(plan, correlation_id, serde_json::json!({"type": "complete", "outcome": outcome}));
    }

    fn error(&self, plan: &str, correlation_id: Uuid, message: &str) {
        tracing::error!(plan, correlation_id = %correlation_id, message, "plan error");
        self.append(plan, correlation_id, serde_json::json!({"type": "error", "message": message}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::parser::Blocker;

    #[test]
    fn dedups_blocker_by_plan_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = LogNotifier::new(dir.path()).unwrap();
        let id = notifier.start("p");
        let blocker = Blocker {
            description: "need credentials".to_string(),
            action_hint: None,
            resume_hint: None,
            hash: "abc12345".to_string(),
        };

        notifier.blocker("p", id, &blocker);
        notifier.blocker("p", id, &blocker);

        let log = std::fs::read_to_string(dir.path().join(".ralph/notifications.json")).unwrap();
        assert_eq!(log.matches("\"type\":\"blocker\"").count(), 1);
    }

    #[test]
    fn distinct_plans_are_not_deduped() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = LogNotifier::new(dir.path()).unwrap();
        let id_a = notifier.start("a");
        let id_b = notifier.start("b");
        let blocker = Blocker {
            description: "need credentials".to_string(),
            action_hint: None,
            resume_hint: None,
            hash: "abc12345".to_string(),
        };

        notifier.blocker("a", id_a, &blocker);
        notifier.blocker("b", id_b, &blocker);

        let log = std::fs::read_to_string(dir.path().join(".ralph/notifications.json")).unwrap();
        assert_eq!(log.matches("\"type\":\"blocker\"").count(), 2);
    }
}
