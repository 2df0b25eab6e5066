#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use crate::core::git::{Git, is_git_repo};
use crate::error::NightshiftError;

/// Inputs for [`ensure_worktree`].
#[derive(Debug, Clone)]
pub struct WorktreeSpec<'a> {
    pub repo_dir: &'a Path,
    pub repo_name: &'a str,
    pub base: &'a str,
    pub branch: &'a str,
    pub task_id: &'a str,
    pub worktree_root: &'a Path,
}

/// Where the task branch was started from when a worktree had to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchSource {
    Reused,
    LocalBranch,
    RemoteBranch,
    RemoteBase,
    LocalBase,
    Head,
}

#[must_use]
pub fn worktree_path(worktree_root: &Path, repo_name: &str, task_id: &str) -> PathBuf {
    worktree_root.join(format!("{repo_name}-{task_id}"))
}

/// Returns the task's worktree, creating it on first use.
///
/// The branch is resolved in priority order so that a re-run resumes the
/// existing task branch instead of re-branching from base:
/// local branch, remote branch, remote base, local base, then HEAD.
pub fn ensure_worktree(spec: &WorktreeSpec<'_>) -> Result<PathBuf, NightshiftError> {
    ensure_worktree_with_source(spec).map(|(path, _)| path)
}

pub fn ensure_worktree_with_source(
    spec: &WorktreeSpec<'_>,
) -> Result<(PathBuf, BranchSource), NightshiftError> {
    let path = worktree_path(spec.worktree_root, spec.repo_name, spec.task_id);
    if path.join(".git").exists() {
        tracing::debug!(path = %path.display(), "reusing existing worktree");
        return Ok((path, BranchSource::Reused));
    }

    std::fs::create_dir_all(spec.worktree_root).map_err(|e| NightshiftError::IoPath {
        path: spec.worktree_root.to_path_buf(),
        source: e,
    })?;

    let git = Git::new(spec.repo_dir);
    if let Err(e) = git.fetch_prune("origin") {
        tracing::debug!("fetch skipped: {e}");
    }

    let remote_branch = format!("origin/{}", spec.branch);
    let remote_base = format!("origin/{}", spec.base);

    let source = if git.ref_exists(&format!("refs/heads/{}", spec.branch)) {
        git.add_worktree(&path, spec.branch)?;
        BranchSource::LocalBranch
    } else if git.ref_exists(&format!("refs/remotes/{remote_branch}")) {
        git.add_worktree_new_branch(&path, spec.branch, Some(&remote_branch))?;
        BranchSource::RemoteBranch
    } else if git.ref_exists(&format!("refs/remotes/{remote_base}")) {
        git.add_worktree_new_branch(&path, spec.branch, Some(&remote_base))?;
        BranchSource::RemoteBase
    } else if git.ref_exists(&format!("refs/heads/{}", spec.base)) {
        git.add_worktree_new_branch(&path, spec.branch, Some(spec.base))?;
        BranchSource::LocalBase
    } else {
        tracing::warn!(
            task_id = spec.task_id,
            base = spec.base,
            "base branch not found locally or on origin; branching from HEAD"
        );
        git.add_worktree_new_branch(&path, spec.branch, None)?;
        BranchSource::Head
    };

    tracing::info!(
        task_id = spec.task_id,
        path = %path.display(),
        source = ?source,
        "created worktree"
    );
    Ok((path, source))
}

/// Drops registrations of worktrees whose directories are gone, then prunes.
///
/// Best-effort: any failure yields 0.
#[must_use]
pub fn clean_worktrees(repo_dir: &Path) -> usize {
    if !is_git_repo(repo_dir) {
        return 0;
    }
    let git = Git::new(repo_dir);
    let Ok(out) = git.list_worktrees_porcelain() else {
        return 0;
    };

    let mut cleaned = 0;
    for entry in parse_worktree_porcelain(&out) {
        let path = PathBuf::from(&entry.path);
        if path == repo_dir || path.exists() {
            continue;
        }
        match git.remove_worktree(&path, true) {
            Ok(()) => {
                tracing::info!(
                    path = %path.display(),
                    branch = %entry.branch,
                    "removed stale worktree"
                );
                cleaned += 1;
            }
            Err(e) => tracing::debug!(path = %path.display(), "worktree remove failed: {e}"),
        }
    }

    if let Err(e) = git.prune_worktrees() {
        tracing::debug!("worktree prune failed: {e}");
    }
    cleaned
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PorcelainEntry {
    pub path: String,
    pub branch: String,
}

#[must_use]
pub fn parse_worktree_porcelain(out: &str) -> Vec<PorcelainEntry> {
    let mut entries: Vec<PorcelainEntry> = Vec::new();

    let mut cur_path: Option<String> = None;
    let mut cur_branch = String::new();

    for line in out.lines() {
        let line = line.trim_end();
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(p) = cur_path.take() {
                entries.push(PorcelainEntry {
                    path: p,
                    branch: std::mem::take(&mut cur_branch),
                });
            }
            cur_path = Some(path.to_owned());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            branch
                .trim()
                .trim_start_matches("refs/heads/")
                .clone_into(&mut cur_branch);
        }
    }
    if let Some(p) = cur_path.take() {
        entries.push(PorcelainEntry {
            path: p,
            branch: cur_branch,
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worktree_list_porcelain() {
        let out = r"worktree /projects/app
HEAD 1111111111111111111111111111111111111111
branch refs/heads/main

worktree /projects/worktrees/app-fix-login
HEAD 2222222222222222222222222222222222222222
branch refs/heads/night/fix-login

worktree /projects/worktrees/app-detached
HEAD 3333333333333333333333333333333333333333
detached
";

        let entries = parse_worktree_porcelain(out);
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0],
            PorcelainEntry {
                path: "/projects/app".to_owned(),
                branch: "main".to_owned(),
            }
        );
        assert_eq!(entries[1].branch, "night/fix-login");
        assert_eq!(entries[2].branch, "");
    }

    #[test]
    fn worktree_path_joins_repo_and_task() {
        assert_eq!(
            worktree_path(Path::new("/wt"), "app", "fix-login"),
            PathBuf::from("/wt/app-fix-login")
        );
    }

    #[test]
    fn clean_on_non_repo_is_zero() {
        let td = tempfile::tempdir().expect("tempdir");
        assert_eq!(clean_worktrees(td.path()), 0);
    }
}
