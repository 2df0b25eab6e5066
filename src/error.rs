#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NightshiftError {
    #[error("git is required but was not found in PATH")]
    GitNotFound,

    #[error("missing required binaries: {}", .0.join(", "))]
    MissingBinaries(Vec<String>),

    #[error("no tasks file found: {}\nRun `nightshift init` to create one.", .0.display())]
    TasksFileNotFound(PathBuf),

    #[error("no tasks found in: {}", .0.display())]
    NoTasks(PathBuf),

    #[error("another run holds the lock ({}); pass --force-unlock if it is stale", .0.display())]
    RunLocked(PathBuf),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}
