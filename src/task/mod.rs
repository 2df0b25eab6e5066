#![forbid(unsafe_code)]

pub mod engine;
pub mod git_ops;
pub mod history;
pub mod model;
pub mod parser;
pub mod report;
pub mod runner;
pub mod state;
pub mod template;
pub mod verify;

use anyhow::Context as _;

use crate::config::Config;
use crate::task::model::State;

/// Creates the state, log and worktree directories and seeds empty
/// `state.json` / `history.jsonl` files when absent.
pub fn ensure_dirs(cfg: &Config) -> anyhow::Result<()> {
    for dir in [&cfg.state_dir, &cfg.log_dir, &cfg.worktree_root] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    if !cfg.state_file.exists() {
        state::write_state(&cfg.state_file, &State::default())?;
    }
    if !cfg.history_file.exists() {
        std::fs::write(&cfg.history_file, "")
            .with_context(|| format!("failed to create {}", cfg.history_file.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dirs_seeds_files_once() {
        let td = tempfile::tempdir().expect("tempdir");
        let root = td.path().to_string_lossy().into_owned();
        let cfg = Config::resolve(|k| match k {
            "HOME" => Some(root.clone()),
            "NIGHTSHIFT_STATE_DIR" => Some(format!("{root}/state")),
            _ => None,
        });

        ensure_dirs(&cfg).unwrap();
        assert!(cfg.log_dir.is_dir());
        assert!(cfg.worktree_root.is_dir());
        assert_eq!(
            std::fs::read_to_string(&cfg.state_file).unwrap(),
            "{\n  \"version\": 1,\n  \"tasks\": {}\n}\n"
        );

        std::fs::write(&cfg.history_file, "{\"taskId\":\"keep\"}\n").unwrap();
        ensure_dirs(&cfg).unwrap();
        assert!(std::fs::read_to_string(&cfg.history_file).unwrap().contains("keep"));
    }
}
