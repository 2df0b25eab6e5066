#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::config::Settings;
use crate::core::process::{kill_group, own_process_group};

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub shell: String,
    /// Upper bound for each command.
    pub timeout: Duration,
    /// When set, command output is appended here; otherwise it is discarded.
    pub log_file: Option<PathBuf>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_owned(),
            timeout: Duration::from_secs(30 * 60),
            log_file: None,
        }
    }
}

impl VerifyOptions {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            shell: settings.verify.shell.clone(),
            timeout: settings.verify_timeout()?,
            log_file: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Ok,
    Failed { command: String },
    TimedOut { command: String, after: Duration },
}

impl VerifyResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    #[must_use]
    pub fn failed_command(&self) -> Option<&str> {
        match self {
            Self::Ok => None,
            Self::Failed { command } | Self::TimedOut { command, .. } => Some(command),
        }
    }

    /// Error text recorded against the task, if any.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        match self {
            Self::Ok => None,
            Self::Failed { command } => Some(format!("verify failed: {command}")),
            Self::TimedOut { command, .. } => Some(format!("verify timed out: {command}")),
        }
    }
}

/// Runs `commands` in order inside `work_dir`, stopping at the first failure.
///
/// Blank commands are skipped; an empty list is `Ok`.
pub async fn run_verify(work_dir: &Path, commands: &[String], opts: &VerifyOptions) -> VerifyResult {
    for cmd in commands {
        if cmd.trim().is_empty() {
            continue;
        }
        tracing::info!(dir = %work_dir.display(), "verify: {cmd}");

        let mut command = tokio::process::Command::new(&opts.shell);
        command
            .args(["-c", cmd])
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        match output_sink(opts.log_file.as_deref()) {
            Some((out, err)) => {
                command.stdout(out).stderr(err);
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let mut child = match own_process_group(&mut command).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("failed to start {}: {e}", opts.shell);
                return VerifyResult::Failed {
                    command: cmd.clone(),
                };
            }
        };

        let status = if let Ok(res) = tokio::time::timeout(opts.timeout, child.wait()).await {
            res
        } else {
            kill_group(&mut child).await;
            tracing::warn!("verify command timed out after {:?}: {cmd}", opts.timeout);
            return VerifyResult::TimedOut {
                command: cmd.clone(),
                after: opts.timeout,
            };
        };

        match status {
            Ok(s) if s.success() => {}
            Ok(s) => {
                tracing::warn!(code = ?s.code(), "verify command failed: {cmd}");
                return VerifyResult::Failed {
                    command: cmd.clone(),
                };
            }
            Err(e) => {
                tracing::warn!("verify command could not be awaited: {e}");
                return VerifyResult::Failed {
                    command: cmd.clone(),
                };
            }
        }
    }
    VerifyResult::Ok
}

fn output_sink(log_file: Option<&Path>) -> Option<(Stdio, Stdio)> {
    let path = log_file?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| tracing::debug!(path = %path.display(), "verify log unavailable: {e}"))
        .ok()?;
    let err = file.try_clone().ok()?;
    Some((Stdio::from(file), Stdio::from(err)))
}
