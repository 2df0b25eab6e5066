#![forbid(unsafe_code)]

use tokio::process::{Child, Command};

/// Starts the child as the leader of a new process group so that
/// [`kill_group`] reaches everything it spawns.
pub fn own_process_group(cmd: &mut Command) -> &mut Command {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    cmd
}

/// Kills the child's whole process group, then the child itself, and reaps it.
pub async fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok())
            && let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL)
        {
            tracing::debug!(pid, "killpg failed: {e}");
        }
    }
    let _ = child.kill().await;
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn kills_grandchildren_with_the_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("late");
        let script = format!("(sleep 1; touch '{}') & wait", marker.display());

        let mut cmd = Command::new("sh");
        cmd.args(["-c", &script]).kill_on_drop(true);
        let mut child = own_process_group(&mut cmd).spawn().expect("spawn sh");
        tokio::time::sleep(Duration::from_millis(200)).await;

        kill_group(&mut child).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
