#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::config::{Config, Settings};
use crate::core::checks::require_binaries;
use crate::core::clock::{now_compact, now_rfc3339};
use crate::core::git::is_git_repo;
use crate::core::worktree::{WorktreeSpec, ensure_worktree};
use crate::error::NightshiftError;
use crate::task::engine::{EngineOptions, EngineRun, TaskBrief, run_engine, write_task_files};
use crate::task::git_ops::commit_and_push;
use crate::task::history::{append_history, prune_history};
use crate::task::model::{
    HistoryEntry, RunReport, RunReportSummary, RunReportTask, RunStatus, StateKey, Task,
    TaskStatus, VerifyStatus,
};
use crate::task::parser::parse_tasks;
use crate::task::report::write_reports;
use crate::task::state::{read_state, update_task_fields};
use crate::task::verify::{VerifyOptions, run_verify};
use crate::task::ensure_dirs;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Skip the engine and commit/push; only run verify commands.
    pub verify_only: bool,
    /// Fail tasks that have no verify commands.
    pub require_verify: bool,
    /// Restrict the run to these task ids. Empty means all.
    pub only: Vec<String>,
    /// Attempt at most this many tasks. 0 means no limit.
    pub limit: usize,
    pub force_unlock: bool,
}

/// Contents of `run.lock` while a run is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunLock {
    pub pid: u32,
    pub started_at: String,
}

pub fn read_run_lock(cfg: &Config) -> Option<RunLock> {
    let data = std::fs::read(cfg.lock_file()).ok()?;
    serde_json::from_slice(&data).ok()
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

/// True when `path` holds a readable lock whose owner process is gone.
fn lock_is_stale(path: &Path) -> bool {
    let Ok(data) = std::fs::read(path) else {
        return false;
    };
    match serde_json::from_slice::<RunLock>(&data) {
        Ok(lock) => lock.pid != std::process::id() && !pid_alive(lock.pid),
        Err(_) => false,
    }
}

fn acquire_lock(path: &Path, force: bool) -> anyhow::Result<LockGuard> {
    if force && path.exists() {
        tracing::warn!(path = %path.display(), "removing existing run lock");
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
    } else if lock_is_stale(path) {
        tracing::warn!(path = %path.display(), "removing run lock left by a dead process");
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
    }

    let lock = RunLock {
        pid: std::process::id(),
        started_at: now_rfc3339(),
    };
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path);
    let mut file = match file {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(NightshiftError::RunLocked(path.to_path_buf()).into());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to create {}", path.display()));
        }
    };
    let guard = LockGuard {
        path: path.to_path_buf(),
    };
    serde_json::to_writer_pretty(&mut file, &lock)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(guard)
}

/// Resolves where a task's repository lives and the name used for its worktree.
#[must_use]
pub fn resolve_repo(cfg: &Config, task: &Task) -> (PathBuf, String) {
    if let Some(path) = task.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        let dir = cfg.expand_tilde(path);
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo".to_owned());
        return (dir, name);
    }
    let name = task
        .repo
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(task.id.as_str())
        .to_owned();
    (cfg.project_root.join(&name), name)
}

/// The multi-line text printed after a run.
#[must_use]
pub fn summary_text(cfg: &Config, report: &RunReport) -> String {
    format!(
        "Run complete: {}\nDone: {}, Failed: {}, Skipped: {}\nReport: {}\nReport JSON: {}",
        report.run_id,
        report.summary.done,
        report.summary.failed,
        report.summary.skipped,
        cfg.last_report_file.display(),
        cfg.last_report_json_file.display()
    )
}

/// Runs every selected task in file order and writes the run reports.
///
/// Only a missing `git`, a missing or empty task file, or a held lock fail the
/// whole run. Everything else is recorded against the task that hit it.
pub async fn run(cfg: &Config, settings: &Settings, opts: &RunOptions) -> anyhow::Result<RunReport> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let listener = {
        let flag = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping after the current task");
                flag.store(true, Ordering::SeqCst);
            }
        })
    };
    let res = run_until(cfg, settings, opts, &interrupted).await;
    listener.abort();
    res
}

/// Like [`run`], but stops starting new tasks once `interrupted` is set.
pub async fn run_until(
    cfg: &Config,
    settings: &Settings,
    opts: &RunOptions,
    interrupted: &AtomicBool,
) -> anyhow::Result<RunReport> {
    require_binaries(&["git"])?;

    if !cfg.tasks_file.exists() {
        return Err(NightshiftError::TasksFileNotFound(cfg.tasks_file.clone()).into());
    }
    let content = std::fs::read_to_string(&cfg.tasks_file)
        .with_context(|| format!("failed to read {}", cfg.tasks_file.display()))?;
    let mut tasks = parse_tasks(&content);

    let only: Vec<&str> = opts
        .only
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if !only.is_empty() {
        tasks.retain(|t| only.contains(&t.id.as_str()));
    }
    if tasks.is_empty() {
        return Err(NightshiftError::NoTasks(cfg.tasks_file.clone()).into());
    }

    ensure_dirs(cfg)?;
    let _lock = acquire_lock(&cfg.lock_file(), opts.force_unlock)?;

    let mut runner = Runner {
        cfg,
        opts,
        engine: EngineOptions::from_settings(settings)?,
        verify: VerifyOptions::from_settings(settings)?,
        run_id: format!("{}-{}", now_compact(), std::process::id()),
        rows: Vec::new(),
        summary: RunReportSummary::default(),
    };
    let started_at = now_rfc3339();
    tracing::info!(run_id = %runner.run_id, tasks = tasks.len(), "run started");

    for (idx, task) in tasks.iter().enumerate() {
        if opts.limit > 0 && idx >= opts.limit {
            runner.summary.record(RunStatus::Skipped);
            continue;
        }
        if interrupted.load(Ordering::SeqCst) {
            runner.push(skipped_row(task, "run interrupted"));
            continue;
        }
        runner.attempt(task).await;
    }

    if !opts.dry_run
        && settings.history.max_entries > 0
        && let Err(e) = prune_history(&cfg.history_file, settings.history.max_entries)
    {
        tracing::warn!("history prune failed: {e:#}");
    }

    let report = RunReport {
        run_id: runner.run_id,
        started_at,
        finished_at: now_rfc3339(),
        verify_only: opts.verify_only,
        require_verify: opts.require_verify,
        tasks_file: cfg.tasks_file.to_string_lossy().into_owned(),
        summary: runner.summary,
        tasks: runner.rows,
    };
    write_reports(cfg, &report)?;
    tracing::info!(
        run_id = %report.run_id,
        done = report.summary.done,
        failed = report.summary.failed,
        skipped = report.summary.skipped,
        "run finished"
    );
    Ok(report)
}

fn skipped_row(task: &Task, reason: &str) -> RunReportTask {
    RunReportTask {
        task_id: task.id.clone(),
        status: RunStatus::Skipped,
        verify: VerifyStatus::NotApplicable.as_str().to_owned(),
        branch: task.branch.clone(),
        engine: task.engine.clone(),
        error: reason.to_owned(),
        ..RunReportTask::default()
    }
}

struct Runner<'a> {
    cfg: &'a Config,
    opts: &'a RunOptions,
    engine: EngineOptions,
    verify: VerifyOptions,
    run_id: String,
    rows: Vec<RunReportTask>,
    summary: RunReportSummary,
}

/// What is known about a task attempt so far.
struct Attempt<'t> {
    task: &'t Task,
    repo_dir: String,
    worktree: String,
    started_at: String,
    log_file: String,
}

impl Runner<'_> {
    fn push(&mut self, row: RunReportTask) {
        self.summary.record(row.status);
        self.rows.push(row);
    }

    fn set_state(&self, task_id: &str, fields: &[(StateKey, &str)]) {
        if let Err(e) = update_task_fields(&self.cfg.state_file, task_id, fields) {
            tracing::error!(task_id, "failed to update state: {e:#}");
        }
    }

    /// Appends the history entry and report row for a finished attempt.
    fn record(&mut self, a: &Attempt<'_>, status: RunStatus, verify: VerifyStatus, error: &str) {
        let entry = HistoryEntry {
            run_id: self.run_id.clone(),
            task_id: a.task.id.clone(),
            status,
            verify: verify.as_str().to_owned(),
            engine: a.task.engine.clone(),
            branch: a.task.branch.clone(),
            repo_dir: a.repo_dir.clone(),
            worktree: a.worktree.clone(),
            started_at: a.started_at.clone(),
            ended_at: now_rfc3339(),
            error: error.to_owned(),
            log_file: a.log_file.clone(),
            verify_only: self.opts.verify_only,
        };
        if let Err(e) = append_history(&self.cfg.history_file, &entry) {
            tracing::error!(task_id = %a.task.id, "failed to append history: {e:#}");
        }
        self.push(RunReportTask::from(&entry));
    }

    fn fail(&mut self, a: &Attempt<'_>, verify: VerifyStatus, error: &str) {
        tracing::warn!(task_id = %a.task.id, "task failed: {error}");
        if !a.task.id.is_empty() {
            self.set_state(
                &a.task.id,
                &[
                    (StateKey::Status, TaskStatus::Failed.as_str()),
                    (StateKey::LastError, error),
                ],
            );
        }
        self.record(a, RunStatus::Failed, verify, error);
    }

    async fn attempt(&mut self, task: &Task) {
        let mut a = Attempt {
            task,
            repo_dir: String::new(),
            worktree: String::new(),
            started_at: now_rfc3339(),
            log_file: String::new(),
        };

        if task.id.is_empty() {
            self.fail(&a, VerifyStatus::Skipped, "invalid task id");
            return;
        }

        match read_state(&self.cfg.state_file) {
            Ok(state) if state.is_done(&task.id) => {
                tracing::info!(task_id = %task.id, "already done; skipping");
                self.push(skipped_row(task, "already done"));
                return;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("state unreadable, treating task as pending: {e:#}"),
        }

        tracing::info!(task_id = %task.id, branch = %task.branch, "task started");
        self.set_state(
            &task.id,
            &[
                (StateKey::Status, TaskStatus::Running.as_str()),
                (StateKey::LastRunAt, a.started_at.as_str()),
                (StateKey::Branch, task.branch.as_str()),
            ],
        );

        let (repo_dir, repo_name) = resolve_repo(self.cfg, task);
        a.repo_dir = repo_dir.to_string_lossy().into_owned();

        if self.opts.dry_run {
            self.set_state(&task.id, &[(StateKey::Status, TaskStatus::Todo.as_str())]);
            self.push(RunReportTask {
                task_id: task.id.clone(),
                status: RunStatus::DryRun,
                verify: VerifyStatus::NotApplicable.as_str().to_owned(),
                branch: task.branch.clone(),
                engine: task.engine.clone(),
                repo_dir: a.repo_dir.clone(),
                started_at: a.started_at.clone(),
                ended_at: a.started_at.clone(),
                ..RunReportTask::default()
            });
            return;
        }

        if !is_git_repo(&repo_dir) {
            let msg = format!("repo not found: {}", a.repo_dir);
            self.fail(&a, VerifyStatus::Skipped, &msg);
            return;
        }

        if self.opts.require_verify && task.verify.iter().all(|c| c.trim().is_empty()) {
            self.fail(&a, VerifyStatus::Failed, "verify commands required");
            self.set_state(&task.id, &[(StateKey::Verify, VerifyStatus::Failed.as_str())]);
            return;
        }

        let spec = WorktreeSpec {
            repo_dir: &repo_dir,
            repo_name: &repo_name,
            base: &task.base,
            branch: &task.branch,
            task_id: &task.id,
            worktree_root: &self.cfg.worktree_root,
        };
        let wt = match ensure_worktree(&spec) {
            Ok(wt) => wt,
            Err(e) => {
                self.fail(&a, VerifyStatus::Skipped, &format!("worktree failed: {e}"));
                return;
            }
        };
        a.worktree = wt.to_string_lossy().into_owned();
        self.set_state(&task.id, &[(StateKey::Worktree, a.worktree.as_str())]);

        let brief = TaskBrief {
            task_id: &task.id,
            repo_name: &repo_name,
            base: &task.base,
            branch: &task.branch,
            engine: &task.engine,
            prompt: &task.prompt,
            verify: &task.verify,
        };
        if let Err(e) = write_task_files(&wt, &brief) {
            self.fail(&a, VerifyStatus::Skipped, &format!("write task files failed: {e:#}"));
            return;
        }

        let log_file = self
            .cfg
            .log_dir
            .join(format!("{}-{}.log", task.id, now_compact()));
        a.log_file = log_file.to_string_lossy().into_owned();

        let mut error: Option<String> = None;

        if !self.opts.verify_only {
            let run = EngineRun {
                work_dir: &wt,
                task_id: &task.id,
                engine: &task.engine,
                log_file: &log_file,
            };
            if let Err(e) = run_engine(&run, &self.engine).await {
                error = Some(e.to_string());
            }
        }

        let mut verify_status = VerifyStatus::Skipped;
        if task.verify.iter().any(|c| !c.trim().is_empty()) {
            let opts = VerifyOptions {
                log_file: Some(log_file.clone()),
                ..self.verify.clone()
            };
            let res = run_verify(&wt, &task.verify, &opts).await;
            verify_status = if res.is_ok() {
                VerifyStatus::Ok
            } else {
                VerifyStatus::Failed
            };
            self.set_state(&task.id, &[(StateKey::Verify, verify_status.as_str())]);
            error = error.or(res.error());
        }

        if !self.opts.verify_only {
            let message = format!("nightshift: {}", task.id);
            if let Err(e) = commit_and_push(&wt, &task.branch, &message) {
                error = error.or(Some(e.to_string()));
            }
        }

        match error {
            Some(err) => self.fail(&a, verify_status, &err),
            None => {
                self.set_state(
                    &task.id,
                    &[
                        (StateKey::Status, TaskStatus::Done.as_str()),
                        (StateKey::LastError, ""),
                    ],
                );
                tracing::info!(task_id = %task.id, "task done");
                self.record(&a, RunStatus::Done, verify_status, "");
            }
        }
    }
}
