#![forbid(unsafe_code)]

pub mod checks;
pub mod clock;
pub mod fs;
pub mod git;
pub mod process;
pub mod worktree;
