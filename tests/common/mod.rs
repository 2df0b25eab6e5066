#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use nightshift::config::Config;

pub fn git_available() -> bool {
    if Command::new("git").arg("--version").output().is_err() {
        eprintln!("skipping: git not found");
        return false;
    }
    true
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command");
    if !out.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
    }
    String::from_utf8_lossy(&out.stdout).trim().to_owned()
}

pub fn git_ok(dir: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Creates a repository at `dir` with one commit on `main`.
pub fn init_repo(dir: &Path) {
    std::fs::create_dir_all(dir).expect("mkdir repo");
    git(dir, &["init"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    std::fs::write(dir.join("README.md"), "hello\n").expect("write");
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "init"]);
    git(dir, &["checkout", "-B", "main"]);
}

/// Adds a bare repository next to `repo` as `origin` and pushes `main` to it.
pub fn add_bare_origin(repo: &Path) -> PathBuf {
    let bare = repo.with_extension("remote.git");
    std::fs::create_dir_all(&bare).expect("mkdir bare");
    git(&bare, &["init", "--bare"]);
    git(repo, &["remote", "add", "origin", &bare.to_string_lossy()]);
    git(repo, &["push", "origin", "main"]);
    bare
}

pub fn remote_has_branch(bare: &Path, branch: &str) -> bool {
    git_ok(bare, &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
}

/// Config rooted entirely inside `root`.
pub fn config_in(root: &Path) -> Config {
    let root = root.to_string_lossy().into_owned();
    Config::resolve(move |key| match key {
        "HOME" => Some(format!("{root}/home")),
        "PI_PROJECT_ROOT" => Some(format!("{root}/projects")),
        "PI_WORKTREE_ROOT" => Some(format!("{root}/worktrees")),
        "NIGHTSHIFT_STATE_DIR" => Some(format!("{root}/state")),
        _ => None,
    })
}
