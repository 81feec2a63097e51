//! Launching and reaping external processes

use std::fs::File;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::common::{Error, Result};

/// Long-running processes owned by one scenario
///
/// Processes are terminated in reverse start order, each getting a grace
/// period after SIGTERM before it is killed.
#[derive(Debug)]
pub struct ProcessSet {
    children: Vec<(String, Child)>,
    grace: Duration,
}

impl ProcessSet {
    pub fn new(grace: Duration) -> Self {
        Self {
            children: Vec::new(),
            grace,
        }
    }

    /// Start `cmd`, sending stdout and stderr to `log` (or discarding them)
    pub fn spawn(&mut self, mut cmd: Command, label: &str, log: Option<&Path>) -> Result<()> {
        let (stdout, stderr) = match log {
            Some(path) => {
                let file = File::create(path).map_err(|e| Error::spawn(label, e))?;
                let copy = file.try_clone().map_err(|e| Error::spawn(label, e))?;
                (Stdio::from(file), Stdio::from(copy))
            }
            None => (Stdio::null(), Stdio::null()),
        };

        tracing::debug!("Starting {}: {:?}", label, cmd.as_std());
        let child = cmd
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::spawn(label, e))?;

        self.children.push((label.to_string(), child));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Stop every process; safe to call repeatedly
    pub async fn terminate_all(&mut self) {
        while let Some((label, mut child)) = self.children.pop() {
            if let Err(e) = terminate(&mut child, self.grace).await {
                tracing::warn!("Failed to stop {}: {}", label, e);
            } else {
                tracing::debug!("Stopped {}", label);
            }
        }
    }
}

async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    if let Some(pid) = child.id() {
        // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map(|_| ()),
        Err(_) => {
            tracing::debug!("Process did not exit within {:?}, killing", grace);
            child.kill().await
        }
    }
}

/// Run a command to completion and capture its output
pub async fn run_command(mut cmd: Command, label: &str) -> Result<Output> {
    tracing::trace!("Running {}: {:?}", label, cmd.as_std());
    cmd.stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::spawn(label, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_terminate_all_stops_processes() {
        let mut set = ProcessSet::new(Duration::from_secs(3));
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        set.spawn(cmd, "sleep", None).unwrap();
        assert_eq!(set.len(), 1);

        let started = Instant::now();
        set.terminate_all().await;
        assert!(set.is_empty());
        assert!(started.elapsed() < Duration::from_secs(3));

        // second call is a no-op
        set.terminate_all().await;
    }

    #[tokio::test]
    async fn test_sigterm_ignored_falls_back_to_kill() {
        let mut set = ProcessSet::new(Duration::from_millis(200));
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "trap '' TERM; sleep 30"]);
        set.spawn(cmd, "stubborn", None).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        set.terminate_all().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_output_goes_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("echo.log");
        let mut set = ProcessSet::new(Duration::from_secs(1));
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2"]);
        set.spawn(cmd, "echo", Some(log.as_path())).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        set.terminate_all().await;

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("out"));
        assert!(content.contains("err"));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let mut set = ProcessSet::new(Duration::from_secs(1));
        let cmd = Command::new("/nonexistent/netharness-binary");
        let err = set.spawn(cmd, "missing", None).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_run_command_captures_stdout() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let output = run_command(cmd, "echo").await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }
}
