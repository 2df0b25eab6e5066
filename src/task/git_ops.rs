#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::Context as _;
use thiserror::Error;

use crate::core::git::Git;
use crate::task::engine::TASK_DIR;

const GITIGNORE: &str = ".gitignore";

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CommitPushError {
    #[error("no remote found")]
    NoRemote,

    #[error("commit failed")]
    CommitFailed,

    #[error("push failed")]
    PushFailed,
}

fn ignore_line() -> String {
    format!("{TASK_DIR}/")
}

/// Appends `.nightshift/` to the worktree's `.gitignore` unless a line already
/// matches it exactly (after trimming).
pub fn ensure_gitignore_entry(work_dir: &Path) -> anyhow::Result<()> {
    let path = work_dir.join(GITIGNORE);
    let entry = ignore_line();

    let mut content = if path.exists() {
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?
    } else {
        String::new()
    };
    if content.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }

    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&entry);
    content.push('\n');
    std::fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))
}

fn find_remote(git: &Git) -> Option<String> {
    let remotes = git.remotes().ok()?;
    if remotes.iter().any(|r| r == "origin") {
        return Some("origin".to_owned());
    }
    remotes.into_iter().next()
}

/// Stages tracked modifications and untracked, non-ignored files. Never `git add -A`.
fn stage_changes(git: &Git) -> anyhow::Result<()> {
    let mut files = git.modified_files()?;
    files.extend(git.untracked_files()?);
    git.add(&files)?;

    if git.dir().join(GITIGNORE).exists()
        && let Err(e) = git.add(&[GITIGNORE.to_owned()])
    {
        tracing::debug!("could not stage {GITIGNORE}: {e}");
    }
    Ok(())
}

/// Commits the task's changes (if any) and pushes `branch` with upstream tracking.
///
/// Nothing to commit is not an error; the branch is still pushed.
pub fn commit_and_push(work_dir: &Path, branch: &str, message: &str) -> Result<(), CommitPushError> {
    let git = Git::new(work_dir);
    let remote = find_remote(&git).ok_or(CommitPushError::NoRemote)?;

    let committed = (|| -> anyhow::Result<bool> {
        ensure_gitignore_entry(work_dir)?;
        stage_changes(&git)?;
        if git.staged_files()?.is_empty() {
            return Ok(false);
        }
        git.commit(message)?;
        Ok(true)
    })();
    match committed {
        Ok(true) => tracing::info!(branch, "committed: {message}"),
        Ok(false) => tracing::info!(branch, "nothing to commit"),
        Err(e) => {
            tracing::warn!(branch, "commit failed: {e:#}");
            return Err(CommitPushError::CommitFailed);
        }
    }

    if let Err(e) = git.push_upstream(&remote, branch) {
        tracing::warn!(branch, remote = %remote, "push failed: {e}");
        return Err(CommitPushError::PushFailed);
    }
    tracing::info!(branch, remote = %remote, "pushed");
    Ok(())
}
