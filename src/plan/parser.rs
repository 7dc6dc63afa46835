//! Tolerant markdown plan parsing. Plans are authored by the agent itself, so
//! the parser accepts common formatting variance rather than demanding one
//! exact structure.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtask {
    pub title: String,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Byte offset of the checkbox character (the space or x between brackets)
    /// within the source text, used for byte-exact mutation.
    pub checkbox_offset: usize,
    pub line_number: usize,
    pub title: String,
    pub done: bool,
    pub requires: Vec<String>,
    pub subtasks: Vec<Subtask>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPlan {
    pub status: Option<String>,
    pub tasks: Vec<Task>,
}

fn checkbox_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<indent>\s*)[-*]\s*\[(?P<mark>[ xX])\]\s+(?P<title>.*)$").unwrap())
}

fn status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*Status:\*\*\s*(?P<value>.+)").unwrap())
}

fn requires_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*Requires:\s*(?P<names>.*)$").unwrap())
}

/// Parses a plan's markdown body into a structured task list.
///
/// Indentation of a checkbox line relative to the nearest preceding
/// zero-indent checkbox line determines whether it is a top-level task or a
/// subtask of it.
pub fn parse(body: &str) -> ParsedPlan {
    let mut plan = ParsedPlan::default();
    let mut byte_offset = 0usize;
    let mut pending_task_index: Option<usize> = None;

    for (line_number, line) in body.lines().enumerate() {
        if plan.status.is_none() {
            if let Some(caps) = status_re().captures(line) {
                plan.status = Some(caps["value"].trim().to_string());
            }
        }

        if let Some(caps) = checkbox_re().captures(line) {
            let indent = caps["indent"].len();
            let mark = &caps["mark"];
            let done = mark != " ";
            let title = caps["title"].trim().to_string();

            let mark_start = line.find('[').map(|i| i + 1).unwrap_or(0);
            let checkbox_offset = byte_offset + mark_start;

            if indent == 0 {
                plan.tasks.push(Task {
                    checkbox_offset,
                    line_number,
                    title,
                    done,
                    requires: Vec::new(),
                    subtasks: Vec::new(),
                });
                pending_task_index = Some(plan.tasks.len() - 1);
            } else if let Some(idx) = pending_task_index {
                plan.tasks[idx].subtasks.push(Subtask { title, done });
            }
        } else if let Some(caps) = requires_re().captures(line) {
            if let Some(idx) = pending_task_index {
                let names = caps["names"].trim();
                if names != "\u{2014}" && !names.is_empty() && names != "-" {
                    plan.tasks[idx].requires = names
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
            }
        }

        byte_offset += line.len() + 1;
    }

    plan
}

/// Flips the checkbox at `checkbox_offset` in `body`, rewriting only the one
/// byte between the brackets. Every other byte of `body` is preserved.
pub fn set_checkbox(body: &str, checkbox_offset: usize, done: bool) -> String {
    let mut bytes = body.as_bytes().to_vec();
    bytes[checkbox_offset] = if done { b'x' } else { b' ' };
    String::from_utf8(bytes).expect("checkbox mutation stays within ascii bracket contents")
}

pub fn all_tasks_complete(plan: &ParsedPlan) -> bool {
    !plan.tasks.is_empty() && plan.tasks.iter().all(|t| t.done && t.subtasks.iter().all(|s| s.done))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Plan\n\n**Status:** in-progress\n\n- [ ] First task\n  - [x] a subtask\n  - [ ] another subtask\nRequires: —\n- [x] Second task\nRequires: First task\n";

    #[test]
    fn parses_tasks_and_status() {
        let plan = parse(SAMPLE);
        assert_eq!(plan.status.as_deref(), Some("in-progress"));
        assert_eq!(plan.tasks.len(), 2);
        assert!(!plan.tasks[0].done);
        assert_eq!(plan.tasks[0].subtasks.len(), 2);
        assert!(plan.tasks[0].subtasks[0].done);
        assert!(plan.tasks[1].done);
        assert_eq!(plan.tasks[1].requires, vec!["First task".to_string()]);
    }

    #[test]
    fn empty_plan_has_no_tasks() {
        let plan = parse("# Nothing here\n");
        assert!(plan.tasks.is_empty());
        assert!(!all_tasks_complete(&plan));
    }

    #[test]
    fn all_complete_detection() {
        let done = "- [x] one\n- [x] two\n";
        let plan = parse(done);
        assert!(all_tasks_complete(&plan));

        let not_done = "- [x] one\n- [ ] two\n";
        let plan = parse(not_done);
        assert!(!all_tasks_complete(&plan));
    }

    #[test]
    fn checkbox_mutation_is_byte_exact() {
        let body = "- [ ] do the thing\n";
        let plan = parse(body);
        let offset = plan.tasks[0].checkbox_offset;
        let mutated = set_checkbox(body, offset, true);
        assert_eq!(mutated, "- [x] do the thing\n");

        // every other byte is identical
        for (a, b) in body.bytes().zip(mutated.bytes()) {
            if a != b {
                assert_eq!(offset, body.find('[').unwrap() + 1);
            }
        }
    }

    #[test]
    fn round_trip_parse_is_idempotent() {
        let first = parse(SAMPLE);
        let second = parse(SAMPLE);
        assert_eq!(first, second);
    }
}
