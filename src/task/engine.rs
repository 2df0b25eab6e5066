#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context as _;
use thiserror::Error;

use crate::config::Settings;
use crate::core::checks::missing_binaries;
use crate::core::process::{kill_group, own_process_group};
use crate::task::model::Engine;

pub const TASK_DIR: &str = ".nightshift";
pub const TASK_FILE: &str = "TASK.md";
pub const ENGINE_PROMPT_FILE: &str = "ENGINE_PROMPT.txt";

const ENGINE_SYSTEM_PROMPT: &str = "You are a senior engineer running an overnight batch task.

Read .nightshift/TASK.md and implement it.
Constraints:
- No browser.
- Do not create PRs.
- Do not merge.
- Prefer minimal changes.
- After implementation, run the verify commands listed in the task (if any).
- Leave the working tree in a clean state if possible.

If you need to choose between options, pick the simplest that ships.
";

/// Everything written to `.nightshift/TASK.md`.
#[derive(Debug, Clone)]
pub struct TaskBrief<'a> {
    pub task_id: &'a str,
    pub repo_name: &'a str,
    pub base: &'a str,
    pub branch: &'a str,
    pub engine: &'a str,
    pub prompt: &'a str,
    pub verify: &'a [String],
}

impl TaskBrief<'_> {
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Night Shift Task: {}\n", self.task_id);
        let _ = writeln!(out, "Repo: {}", self.repo_name);
        let _ = writeln!(out, "Base: {}", self.base);
        let _ = writeln!(out, "Branch: {}", self.branch);
        let _ = writeln!(out, "Engine: {}\n", self.engine);
        let _ = write!(out, "## Prompt\n{}", self.prompt);
        let commands: Vec<&str> = self
            .verify
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if !commands.is_empty() {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("\n## Verify\n");
            for cmd in commands {
                let _ = writeln!(out, "- {cmd}");
            }
        }
        out
    }
}

/// Writes the task brief and engine prompt into `{work_dir}/.nightshift/`.
pub fn write_task_files(work_dir: &Path, brief: &TaskBrief<'_>) -> anyhow::Result<PathBuf> {
    let dir = work_dir.join(TASK_DIR);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let task_path = dir.join(TASK_FILE);
    std::fs::write(&task_path, brief.render())
        .with_context(|| format!("failed to write {}", task_path.display()))?;

    let prompt_path = dir.join(ENGINE_PROMPT_FILE);
    std::fs::write(&prompt_path, ENGINE_SYSTEM_PROMPT)
        .with_context(|| format!("failed to write {}", prompt_path.display()))?;
    Ok(dir)
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub codex_executable: String,
    pub timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            codex_executable: "codex".to_owned(),
            timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            codex_executable: settings.engine.codex_executable.clone(),
            timeout: settings.engine_timeout()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EngineRun<'a> {
    pub work_dir: &'a Path,
    pub task_id: &'a str,
    pub engine: &'a str,
    pub log_file: &'a Path,
}

/// Why an engine step failed. The engine's own log is the diagnostic surface,
/// so process failures stay opaque.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0}")]
    Unsupported(String),

    #[error("missing binary: {0}")]
    MissingBinary(String),

    #[error("engine failed")]
    Failed,

    #[error("engine timed out after {0:?}")]
    TimedOut(Duration),
}

/// Runs the task's engine against its worktree. `none` succeeds without a process.
pub async fn run_engine(run: &EngineRun<'_>, opts: &EngineOptions) -> Result<(), EngineError> {
    let engine: Engine = run.engine.parse().map_err(EngineError::Unsupported)?;
    match engine {
        Engine::None => Ok(()),
        Engine::Codex => run_codex(run, opts).await,
    }
}

async fn run_codex(run: &EngineRun<'_>, opts: &EngineOptions) -> Result<(), EngineError> {
    let exe = opts.codex_executable.as_str();
    if !missing_binaries(&[exe]).is_empty() {
        return Err(EngineError::MissingBinary(exe.to_owned()));
    }

    let prompt_path = run.work_dir.join(TASK_DIR).join(ENGINE_PROMPT_FILE);
    let stdin = std::fs::File::open(&prompt_path).map_err(|e| {
        tracing::warn!(path = %prompt_path.display(), "engine prompt unavailable: {e}");
        EngineError::Failed
    })?;
    if let Some(parent) = run.log_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let mut cmd = tokio::process::Command::new(exe);
    cmd.current_dir(run.work_dir);
    cmd.arg("exec");
    cmd.arg("--full-auto");
    cmd.arg("-C").arg(run.work_dir);
    cmd.arg("-o").arg(run.log_file);
    cmd.arg("-");
    cmd.stdin(Stdio::from(stdin));
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());
    cmd.kill_on_drop(true);

    tracing::info!(task_id = run.task_id, log = %run.log_file.display(), "starting {exe}");
    let mut child = own_process_group(&mut cmd).spawn().map_err(|e| {
        tracing::warn!("failed to start {exe}: {e}");
        EngineError::Failed
    })?;

    let status = if let Ok(res) = tokio::time::timeout(opts.timeout, child.wait()).await {
        res.map_err(|e| {
            tracing::warn!("failed to wait for {exe}: {e}");
            EngineError::Failed
        })?
    } else {
        kill_group(&mut child).await;
        tracing::warn!(task_id = run.task_id, "engine timed out after {:?}", opts.timeout);
        return Err(EngineError::TimedOut(opts.timeout));
    };

    if status.success() {
        tracing::info!(task_id = run.task_id, "engine finished");
        Ok(())
    } else {
        tracing::warn!(task_id = run.task_id, code = ?status.code(), "engine exited unsuccessfully");
        Err(EngineError::Failed)
    }
}
