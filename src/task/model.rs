#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE: &str = "main";
pub const DEFAULT_ENGINE: &str = "codex";
pub const BRANCH_PREFIX: &str = "night/";
pub const STATE_VERSION: u32 = 1;

/// One block of the task file after defaults have been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub base: String,
    pub branch: String,
    pub engine: String,
    pub verify: Vec<String>,
    pub prompt: String,
    /// Keys the parser does not recognize, kept verbatim.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Task {
    /// Repository location as written in the task file (`path` wins over `repo`).
    #[must_use]
    pub fn location(&self) -> &str {
        self.path
            .as_deref()
            .or(self.repo.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Codex,
    None,
}

impl Engine {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::None => "none",
        }
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "codex" => Ok(Self::Codex),
            "none" => Ok(Self::None),
            _ => Err(format!("unsupported engine: {}", s.trim())),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values written to the `status` field of the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Todo,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub version: u32,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskState>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            tasks: BTreeMap::new(),
        }
    }
}

impl State {
    #[must_use]
    pub fn is_done(&self, task_id: &str) -> bool {
        self.tasks
            .get(task_id)
            .and_then(|t| t.status.as_deref())
            == Some(TaskStatus::Done.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<String>,
    /// Fields written by other tools; preserved across rewrites.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKey {
    Status,
    Branch,
    Worktree,
    LastRunAt,
    LastError,
    Verify,
}

impl TaskState {
    pub fn set(&mut self, key: StateKey, value: impl Into<String>) {
        let slot = match key {
            StateKey::Status => &mut self.status,
            StateKey::Branch => &mut self.branch,
            StateKey::Worktree => &mut self.worktree,
            StateKey::LastRunAt => &mut self.last_run_at,
            StateKey::LastError => &mut self.last_error,
            StateKey::Verify => &mut self.verify,
        };
        *slot = Some(value.into());
    }
}

/// Terminal outcome of one task within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Done,
    Failed,
    DryRun,
    #[default]
    Skipped,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Failed => "failed",
            Self::DryRun => "dry-run",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    Ok,
    Failed,
    Skipped,
    NotApplicable,
}

impl VerifyStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::NotApplicable => "n/a",
        }
    }
}

/// One line of `history.jsonl`. `status` is required; other missing fields
/// deserialize to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub task_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub verify: String,
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub repo_dir: String,
    #[serde(default)]
    pub worktree: String,
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub ended_at: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub log_file: String,
    #[serde(default)]
    pub verify_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReportTask {
    pub task_id: String,
    pub status: RunStatus,
    pub verify: String,
    pub branch: String,
    pub engine: String,
    pub repo_dir: String,
    pub worktree: String,
    pub started_at: String,
    pub ended_at: String,
    pub error: String,
    pub log_file: String,
}

impl From<&HistoryEntry> for RunReportTask {
    fn from(e: &HistoryEntry) -> Self {
        Self {
            task_id: e.task_id.clone(),
            status: e.status,
            verify: e.verify.clone(),
            branch: e.branch.clone(),
            engine: e.engine.clone(),
            repo_dir: e.repo_dir.clone(),
            worktree: e.worktree.clone(),
            started_at: e.started_at.clone(),
            ended_at: e.ended_at.clone(),
            error: e.error.clone(),
            log_file: e.log_file.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReportSummary {
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunReportSummary {
    /// Dry-run tasks count as skipped.
    pub fn record(&mut self, status: RunStatus) {
        match status {
            RunStatus::Done => self.done += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::DryRun | RunStatus::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub verify_only: bool,
    pub require_verify: bool,
    pub tasks_file: String,
    pub summary: RunReportSummary,
    pub tasks: Vec<RunReportTask>,
}
