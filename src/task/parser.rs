#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::task::model::{BRANCH_PREFIX, DEFAULT_BASE, DEFAULT_ENGINE, Task};

static TASK_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##\s+TASK\s+(.+?)\s*$").expect("valid task header regex"));
static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z][a-zA-Z0-9_-]*):\s*(.*?)\s*$").expect("valid key/value regex")
});
static ID_SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9._-]+").expect("valid id regex"));

/// Keys that must never be stored, whatever map backs the task.
const RESERVED_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

const PROMPT_END: &str = "ENDPROMPT";

/// Lowercases `raw`, collapses every run of characters outside `[a-z0-9._-]`
/// into one `-`, and strips leading/trailing dashes. May return an empty string.
#[must_use]
pub fn normalize_task_id(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    ID_SEPARATOR_RE
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Fields,
    Verify,
    Prompt,
}

#[derive(Debug, Default)]
struct Draft {
    raw_id: String,
    repo: Option<String>,
    path: Option<String>,
    base: Option<String>,
    branch: Option<String>,
    engine: Option<String>,
    verify: Vec<String>,
    prompt: String,
    extra: BTreeMap<String, String>,
}

impl Draft {
    fn new(raw_id: &str) -> Self {
        Self {
            raw_id: raw_id.trim().to_owned(),
            ..Self::default()
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        if RESERVED_KEYS.contains(&key) {
            return;
        }
        let value = value.to_owned();
        match key {
            "id" => self.raw_id = value,
            "repo" => self.repo = Some(value),
            "path" => self.path = Some(value),
            "base" => self.base = Some(value),
            "branch" => self.branch = Some(value),
            "engine" => self.engine = Some(value),
            "verify" => {
                if !value.is_empty() {
                    self.verify.push(value);
                }
            }
            "prompt" => self.prompt = value,
            _ => {
                self.extra.insert(key.to_owned(), value);
            }
        }
    }

    fn finish(self) -> Task {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        let id = normalize_task_id(&self.raw_id);
        let branch =
            non_empty(self.branch).unwrap_or_else(|| format!("{BRANCH_PREFIX}{id}"));
        Task {
            repo: non_empty(self.repo),
            path: non_empty(self.path),
            base: non_empty(self.base).unwrap_or_else(|| DEFAULT_BASE.to_owned()),
            engine: non_empty(self.engine).unwrap_or_else(|| DEFAULT_ENGINE.to_owned()),
            verify: self.verify,
            prompt: self.prompt,
            extra: self.extra,
            branch,
            id,
        }
    }
}

/// Parses the task file into tasks, in file order.
///
/// Text before the first `## TASK` header is ignored. Inside a block,
/// `verify:` opens a `- item` list, `prompt:` captures raw lines up to
/// `ENDPROMPT`, and any other `key: value` line sets a field.
#[must_use]
pub fn parse_tasks(content: &str) -> Vec<Task> {
    let mut tasks = Vec::new();
    let mut cur: Option<Draft> = None;
    let mut mode = Mode::Fields;

    for line in content.split('\n') {
        if let Some(caps) = TASK_HEADER_RE.captures(line) {
            if let Some(done) = cur.take() {
                tasks.push(done.finish());
            }
            cur = Some(Draft::new(&caps[1]));
            mode = Mode::Fields;
            continue;
        }

        let Some(task) = cur.as_mut() else {
            continue;
        };

        if mode == Mode::Prompt {
            if line.trim() == PROMPT_END {
                mode = Mode::Fields;
            } else {
                task.prompt.push_str(line);
                task.prompt.push('\n');
            }
            continue;
        }

        if mode == Mode::Verify {
            if let Some(item) = line.trim_start().strip_prefix("- ") {
                task.verify.push(item.trim().to_owned());
                continue;
            }
            mode = Mode::Fields;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "verify:" {
            mode = Mode::Verify;
            continue;
        }
        if trimmed == "prompt:" {
            mode = Mode::Prompt;
            task.prompt.clear();
            continue;
        }

        if let Some(caps) = KEY_VALUE_RE.captures(line) {
            task.set(&caps[1], &caps[2]);
        }
    }

    if let Some(done) = cur.take() {
        tasks.push(done.finish());
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_ids() {
        assert_eq!(normalize_task_id("Fix Login Redirect"), "fix-login-redirect");
        assert_eq!(normalize_task_id("my.task_name-v2"), "my.task_name-v2");
        assert_eq!(normalize_task_id("--hello--"), "hello");
        assert_eq!(normalize_task_id("a   b!!!c"), "a-b-c");
        assert_eq!(normalize_task_id(""), "");
        assert_eq!(normalize_task_id("!!!"), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "Fix Login Redirect",
            "--hello--",
            "!!!",
            "Ünïcode Task #42",
            "a..b__c--d",
            "  spaced  ",
        ] {
            let once = normalize_task_id(raw);
            assert_eq!(normalize_task_id(&once), once, "input: {raw:?}");
        }
    }

    #[test]
    fn parses_single_task_with_all_fields() {
        let input = "# Night Shift Tasks

## TASK fix-login-redirect
repo: my-repo
base: main
branch: night/fix-login-redirect
engine: codex
verify:
- bun test
- bun run lint
prompt:
Fix the login redirect loop.

Context:
- Users on /app are redirected back to /login even after auth.
ENDPROMPT
";
        let tasks = parse_tasks(input);
        assert_eq!(tasks.len(), 1);
        let t = &tasks[0];
        assert_eq!(t.id, "fix-login-redirect");
        assert_eq!(t.repo.as_deref(), Some("my-repo"));
        assert_eq!(t.base, "main");
        assert_eq!(t.branch, "night/fix-login-redirect");
        assert_eq!(t.engine, "codex");
        assert_eq!(t.verify, vec!["bun test", "bun run lint"]);
        assert_eq!(
            t.prompt,
            "Fix the login redirect loop.\n\nContext:\n- Users on /app are redirected back to /login even after auth.\n"
        );
    }

    #[test]
    fn parses_multiple_tasks_with_defaults() {
        let input = "## TASK task-one
repo: repo-a
engine: none
prompt:
Do thing one.
ENDPROMPT

## TASK task-two
repo: repo-b
";
        let tasks = parse_tasks(input);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].engine, "none");
        assert_eq!(tasks[1].id, "task-two");
        assert_eq!(tasks[1].engine, "codex");
        assert_eq!(tasks[1].base, "main");
        assert_eq!(tasks[1].branch, "night/task-two");
        assert!(tasks[1].verify.is_empty());
        assert_eq!(tasks[1].prompt, "");
    }

    #[test]
    fn header_id_is_normalized_into_branch() {
        let tasks = parse_tasks("## TASK Fix Login  Redirect!!\nrepo: app\n");
        assert_eq!(tasks[0].id, "fix-login-redirect");
        assert_eq!(tasks[0].branch, "night/fix-login-redirect");
    }

    #[test]
    fn path_field_leaves_repo_unset() {
        let tasks = parse_tasks("## TASK custom\npath: /abs/path/to/repo\n");
        assert_eq!(tasks[0].path.as_deref(), Some("/abs/path/to/repo"));
        assert_eq!(tasks[0].repo, None);
        assert_eq!(tasks[0].location(), "/abs/path/to/repo");
    }

    #[test]
    fn empty_verify_list_is_allowed() {
        let tasks = parse_tasks("## TASK v\nrepo: demo\nverify:\nprompt:\nDo thing.\nENDPROMPT\n");
        assert!(tasks[0].verify.is_empty());
        assert_eq!(tasks[0].prompt, "Do thing.\n");
    }

    #[test]
    fn non_list_line_ends_verify_list_and_is_reprocessed() {
        let tasks =
            parse_tasks("## TASK mixed\nrepo: demo\nverify:\n- bun test\nengine: none\n");
        assert_eq!(tasks[0].verify, vec!["bun test"]);
        assert_eq!(tasks[0].engine, "none");
    }

    #[test]
    fn ignores_text_before_first_task() {
        let input = "# Night Shift Tasks\n\nPrep session:\n- add tasks\nrepo: nope\n\n## TASK actual\nrepo: demo\n";
        let tasks = parse_tasks(input);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "actual");
        assert_eq!(tasks[0].repo.as_deref(), Some("demo"));
    }

    #[test]
    fn empty_input_yields_no_tasks() {
        assert!(parse_tasks("").is_empty());
        assert!(parse_tasks("# Just a heading\nSome text").is_empty());
    }

    #[test]
    fn prompt_keeps_blank_lines_and_key_like_lines() {
        let tasks = parse_tasks(
            "## TASK multi\nprompt:\nLine one.\n\nbase: not-a-field\n## not a header either\nENDPROMPT\n",
        );
        assert_eq!(
            tasks[0].prompt,
            "Line one.\n\nbase: not-a-field\n## not a header either\n"
        );
        assert_eq!(tasks[0].base, "main");
    }

    #[test]
    fn preserves_unknown_keys_and_rejects_reserved_ones() {
        let tasks = parse_tasks(
            "## TASK extra\nrepo: demo\ncustomField: custom-value\nconstructor: x\nprototype: y\n",
        );
        let extra = &tasks[0].extra;
        assert_eq!(extra.get("customField").map(String::as_str), Some("custom-value"));
        assert!(!extra.contains_key("constructor"));
        assert!(!extra.contains_key("prototype"));
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let tasks = parse_tasks("## TASK d\nbase:\nengine:\nbranch:\n");
        assert_eq!(tasks[0].base, "main");
        assert_eq!(tasks[0].engine, "codex");
        assert_eq!(tasks[0].branch, "night/d");
    }

    #[test]
    fn all_punctuation_id_normalizes_to_empty() {
        let tasks = parse_tasks("## TASK !!!\nrepo: demo\n");
        assert_eq!(tasks[0].id, "");
        assert_eq!(tasks[0].branch, "night/");
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let tasks = parse_tasks("## TASK win\r\nrepo: demo\r\nverify:\r\n- cargo test\r\n");
        assert_eq!(tasks[0].id, "win");
        assert_eq!(tasks[0].repo.as_deref(), Some("demo"));
        assert_eq!(tasks[0].verify, vec!["cargo test"]);
    }
}
