#![forbid(unsafe_code)]

use std::fmt::Write as _;

use crate::task::model::{BRANCH_PREFIX, Engine};
use crate::task::parser::{normalize_task_id, parse_tasks};

pub const TASKS_FILE_HEADER: &str = "# Night Shift Tasks\n\n";

pub const TASKS_TEMPLATE: &str = "# Night Shift Tasks

Prep session (17:00-17:30):
- add 1-3 tasks max
- keep them execution-oriented (bugfix / small feature)
- include verify commands

## TASK example-fix-login-redirect
repo: my-repo
base: main
branch: night/example-fix-login-redirect
engine: codex
verify:
- bun test
- bun run lint
prompt:
Fix the login redirect loop.

Context:
- Users on /app are redirected back to /login even after auth.

DoD:
- tests pass
- no new lints
- minimal diff

Notes:
- likely in src/auth/* and middleware
ENDPROMPT
";

/// Characters of the prompt used to derive a quick task's id.
const QUICK_ID_PROMPT_CHARS: usize = 40;

#[derive(Debug, Clone)]
pub struct QuickTask<'a> {
    pub repo: &'a str,
    pub prompt: &'a str,
    pub verify: Option<&'a str>,
    pub engine: Engine,
    pub base: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickBlock {
    pub task_id: String,
    pub branch: String,
    pub block: String,
}

/// Renders a task block for `nightshift quick`, checked by re-parsing it.
pub fn render_quick_task(quick: &QuickTask<'_>) -> anyhow::Result<QuickBlock> {
    let repo = quick.repo.trim();
    let prompt = quick.prompt.trim();
    if repo.is_empty() {
        anyhow::bail!("--repo must not be empty");
    }
    if prompt.is_empty() {
        anyhow::bail!("--prompt must not be empty");
    }

    let head: String = prompt.chars().take(QUICK_ID_PROMPT_CHARS).collect();
    let task_id = normalize_task_id(&head);
    if task_id.is_empty() {
        anyhow::bail!("prompt does not yield a usable task id: {head:?}");
    }
    let branch = format!("{BRANCH_PREFIX}{task_id}");

    let mut block = String::new();
    let _ = writeln!(block, "## TASK {task_id}");
    let _ = writeln!(block, "repo: {repo}");
    let _ = writeln!(block, "base: {}", quick.base.trim());
    let _ = writeln!(block, "branch: {branch}");
    let _ = writeln!(block, "engine: {}", quick.engine);
    if let Some(verify) = quick.verify.map(str::trim).filter(|v| !v.is_empty()) {
        let _ = writeln!(block, "verify:\n- {verify}");
    }
    let _ = writeln!(block, "prompt:\n{prompt}\nENDPROMPT\n");

    let parsed = parse_tasks(&block);
    match parsed.as_slice() {
        [task] if task.id == task_id && task.repo.as_deref() == Some(repo) => {}
        _ => anyhow::bail!("generated task block did not parse back; check the input"),
    }

    Ok(QuickBlock {
        task_id,
        branch,
        block,
    })
}
