#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::NightshiftError;

/// Thin wrapper running `git` with a fixed working directory.
#[derive(Debug, Clone)]
pub struct Git {
    dir: PathBuf,
}

impl Git {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ref_exists(&self, reference: &str) -> bool {
        self.run_raw(&["show-ref", "--verify", "--quiet", reference])
            .is_ok_and(|out| out.status.success())
    }

    pub fn fetch_prune(&self, remote: &str) -> Result<(), NightshiftError> {
        let _ = self.run(&["fetch", remote, "--prune"])?;
        Ok(())
    }

    /// Checks out an existing local branch into a new worktree.
    pub fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), NightshiftError> {
        let path = path.to_string_lossy();
        let _ = self.run(&["worktree", "add", &path, branch])?;
        Ok(())
    }

    /// Creates `branch` at `start` (or HEAD) and checks it out into a new worktree.
    pub fn add_worktree_new_branch(
        &self,
        path: &Path,
        branch: &str,
        start: Option<&str>,
    ) -> Result<(), NightshiftError> {
        let path = path.to_string_lossy();
        if let Some(start) = start {
            let _ = self.run(&["worktree", "add", "-b", branch, &path, start])?;
        } else {
            let _ = self.run(&["worktree", "add", "-b", branch, &path])?;
        }
        Ok(())
    }

    pub fn list_worktrees_porcelain(&self) -> Result<String, NightshiftError> {
        self.run(&["worktree", "list", "--porcelain"])
    }

    pub fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), NightshiftError> {
        let path = path.to_string_lossy();
        if force {
            let _ = self.run(&["worktree", "remove", "--force", &path])?;
        } else {
            let _ = self.run(&["worktree", "remove", &path])?;
        }
        Ok(())
    }

    pub fn prune_worktrees(&self) -> Result<(), NightshiftError> {
        let _ = self.run(&["worktree", "prune"])?;
        Ok(())
    }

    pub fn remotes(&self) -> Result<Vec<String>, NightshiftError> {
        Ok(lines(&self.run(&["remote"])?))
    }

    /// Tracked files with unstaged modifications.
    pub fn modified_files(&self) -> Result<Vec<String>, NightshiftError> {
        Ok(nul_separated(&self.run(&["diff", "--name-only", "-z"])?))
    }

    /// Untracked files, honoring the standard ignore rules.
    pub fn untracked_files(&self) -> Result<Vec<String>, NightshiftError> {
        Ok(nul_separated(&self.run(&[
            "ls-files",
            "--others",
            "--exclude-standard",
            "-z",
        ])?))
    }

    pub fn staged_files(&self) -> Result<Vec<String>, NightshiftError> {
        Ok(nul_separated(&self.run(&["diff", "--cached", "--name-only", "-z"])?))
    }

    pub fn add(&self, paths: &[String]) -> Result<(), NightshiftError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        let _ = self.run(&args)?;
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<(), NightshiftError> {
        let _ = self.run(&["commit", "-m", message])?;
        Ok(())
    }

    pub fn push_upstream(&self, remote: &str, branch: &str) -> Result<(), NightshiftError> {
        let _ = self.run(&["push", "-u", remote, branch])?;
        Ok(())
    }

    pub fn run(&self, args: &[&str]) -> Result<String, NightshiftError> {
        let out = self.run_raw(args)?;
        if out.status.success() {
            Ok(String::from_utf8_lossy(&out.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&out.stderr);
            Err(NightshiftError::Other(format!(
                "git {}: {}",
                args.join(" "),
                stderr.trim()
            )))
        }
    }

    pub fn run_raw(&self, args: &[&str]) -> Result<Output, NightshiftError> {
        tracing::debug!(dir = %self.dir.display(), "git {}", args.join(" "));
        let out = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => NightshiftError::GitNotFound,
                _ => NightshiftError::Other(format!("failed to run git: {e}")),
            })?;
        Ok(out)
    }
}

/// True when `dir` holds a `.git` directory or gitfile.
#[must_use]
pub fn is_git_repo(dir: &Path) -> bool {
    let candidate = dir.join(".git");
    candidate.is_dir() || candidate.is_file()
}

fn lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Splits `-z` output. Paths are taken verbatim, unquoted and untrimmed.
fn nul_separated(out: &str) -> Vec<String> {
    out.split('\0')
        .filter(|p| !p.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_output_into_non_empty_lines() {
        assert_eq!(
            lines("a.txt\n\n  b/c.rs \n"),
            vec!["a.txt".to_owned(), "b/c.rs".to_owned()]
        );
        assert!(lines("").is_empty());
    }

    #[test]
    fn splits_nul_separated_paths_verbatim() {
        assert_eq!(
            nul_separated("caf\u{e9}.txt\0 lead space\0a\nb\0"),
            vec![
                "caf\u{e9}.txt".to_owned(),
                " lead space".to_owned(),
                "a\nb".to_owned()
            ]
        );
        assert!(nul_separated("").is_empty());
    }

    #[test]
    fn detects_git_dir_and_gitfile() {
        let td = tempfile::tempdir().expect("tempdir");
        assert!(!is_git_repo(td.path()));

        let with_dir = td.path().join("a");
        std::fs::create_dir_all(with_dir.join(".git")).unwrap();
        assert!(is_git_repo(&with_dir));

        let with_file = td.path().join("b");
        std::fs::create_dir_all(&with_file).unwrap();
        std::fs::write(with_file.join(".git"), "gitdir: /elsewhere\n").unwrap();
        assert!(is_git_repo(&with_file));
    }
}
