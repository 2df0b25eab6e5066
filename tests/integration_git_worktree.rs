mod common;

use nightshift::core::worktree::{
    BranchSource, WorktreeSpec, clean_worktrees, ensure_worktree_with_source,
};

use common::{add_bare_origin, git, git_available, init_repo};

fn spec<'a>(
    repo: &'a std::path::Path,
    root: &'a std::path::Path,
    base: &'a str,
    branch: &'a str,
    task_id: &'a str,
) -> WorktreeSpec<'a> {
    WorktreeSpec {
        repo_dir: repo,
        repo_name: "app",
        base,
        branch,
        task_id,
        worktree_root: root,
    }
}

#[test]
fn creates_from_local_base_then_reuses() {
    if !git_available() {
        return;
    }
    let td = tempfile::tempdir().expect("tempdir");
    let repo = td.path().join("app");
    let root = td.path().join("worktrees");
    init_repo(&repo);

    let s = spec(&repo, &root, "main", "night/fix", "fix");
    let (path, source) = ensure_worktree_with_source(&s).expect("create worktree");
    assert_eq!(path, root.join("app-fix"));
    assert_eq!(source, BranchSource::LocalBase);
    assert_eq!(git(&path, &["rev-parse", "--abbrev-ref", "HEAD"]), "night/fix");

    let (again, source) = ensure_worktree_with_source(&s).expect("reuse worktree");
    assert_eq!(again, path);
    assert_eq!(source, BranchSource::Reused);
}

#[test]
fn resumes_existing_local_branch_after_worktree_is_lost() {
    if !git_available() {
        return;
    }
    let td = tempfile::tempdir().expect("tempdir");
    let repo = td.path().join("app");
    let root = td.path().join("worktrees");
    init_repo(&repo);

    let s = spec(&repo, &root, "main", "night/resume", "resume");
    let (path, _) = ensure_worktree_with_source(&s).expect("create worktree");
    std::fs::write(path.join("work.txt"), "progress\n").unwrap();
    git(&path, &["add", "work.txt"]);
    git(&path, &["commit", "-m", "progress"]);

    std::fs::remove_dir_all(&path).unwrap();
    assert_eq!(clean_worktrees(&repo), 1);

    let (path, source) = ensure_worktree_with_source(&s).expect("recreate worktree");
    assert_eq!(source, BranchSource::LocalBranch);
    assert!(path.join("work.txt").exists());
}

#[test]
fn prefers_remote_task_branch_over_base() {
    if !git_available() {
        return;
    }
    let td = tempfile::tempdir().expect("tempdir");
    let repo = td.path().join("app");
    let root = td.path().join("worktrees");
    init_repo(&repo);
    add_bare_origin(&repo);

    // Publish a task branch from elsewhere, then drop the local copy.
    git(&repo, &["checkout", "-b", "night/remote"]);
    std::fs::write(repo.join("remote.txt"), "from remote\n").unwrap();
    git(&repo, &["add", "remote.txt"]);
    git(&repo, &["commit", "-m", "remote work"]);
    git(&repo, &["push", "origin", "night/remote"]);
    git(&repo, &["checkout", "main"]);
    git(&repo, &["branch", "-D", "night/remote"]);

    let s = spec(&repo, &root, "main", "night/remote", "remote");
    let (path, source) = ensure_worktree_with_source(&s).expect("create worktree");
    assert_eq!(source, BranchSource::RemoteBranch);
    assert!(path.join("remote.txt").exists());

    let s = spec(&repo, &root, "main", "night/fresh", "fresh");
    let (_, source) = ensure_worktree_with_source(&s).expect("create worktree");
    assert_eq!(source, BranchSource::RemoteBase);
}

#[test]
fn falls_back_to_head_when_base_is_unknown() {
    if !git_available() {
        return;
    }
    let td = tempfile::tempdir().expect("tempdir");
    let repo = td.path().join("app");
    let root = td.path().join("worktrees");
    init_repo(&repo);

    let s = spec(&repo, &root, "does-not-exist", "night/head", "head");
    let (path, source) = ensure_worktree_with_source(&s).expect("create worktree");
    assert_eq!(source, BranchSource::Head);
    assert!(path.join("README.md").exists());
}

#[test]
fn clean_is_zero_for_non_repos_and_healthy_worktrees() {
    if !git_available() {
        return;
    }
    let td = tempfile::tempdir().expect("tempdir");
    assert_eq!(clean_worktrees(td.path()), 0);

    let repo = td.path().join("app");
    let root = td.path().join("worktrees");
    init_repo(&repo);
    let s = spec(&repo, &root, "main", "night/keep", "keep");
    ensure_worktree_with_source(&s).expect("create worktree");
    assert_eq!(clean_worktrees(&repo), 0);
}
