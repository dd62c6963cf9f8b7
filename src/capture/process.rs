//! Capture process supervision
//!
//! The capture process is the single source of truth for the broker's
//! lifetime: whenever it exits, for any reason, the broker shuts down.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Time a cancelled capture process gets to exit on its own before it is killed
pub const EXIT_GRACE: Duration = Duration::from_millis(200);

/// How the capture process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureExit {
    /// Exited on its own
    Exited(ExitStatus),
    /// Killed by the broker during shutdown
    Terminated(ExitStatus),
}

impl CaptureExit {
    /// Whether this exit counts as a clean shutdown
    pub fn is_success(&self) -> bool {
        match self {
            CaptureExit::Exited(status) => status.success(),
            CaptureExit::Terminated(_) => true,
        }
    }

    /// Raw exit status
    pub fn status(&self) -> ExitStatus {
        match self {
            CaptureExit::Exited(status) | CaptureExit::Terminated(status) => *status,
        }
    }
}

/// Running capture process
pub struct CaptureProcess {
    child: Child,
    program: String,
    pid: Option<u32>,
}

impl CaptureProcess {
    /// Split `command` shell-style and start it
    ///
    /// Returns the process and the read end of its stdout pipe. stderr is
    /// forwarded line by line to the log.
    pub fn spawn(command: &str) -> Result<(Self, ChildStdout)> {
        let argv = shlex::split(command)
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| Error::InvalidCommand(command.to_string()))?;

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::InvalidCommand(command.to_string()))?;

        tracing::debug!(program = %program, args = ?args, "Starting capture process");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "capture process stdout was not piped",
            ))
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(program.clone(), stderr));
        }

        let pid = child.id();
        tracing::info!(program = %program, pid = ?pid, "Capture process started");

        Ok((
            Self {
                child,
                program: program.clone(),
                pid,
            },
            stdout,
        ))
    }

    /// Process id, if the process was still running when spawned
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Program name (argv[0])
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Wait for the process to end, then cancel `cancel`
    ///
    /// If `cancel` fires first the process is killed and reaped. Either way
    /// the token is cancelled on return.
    pub async fn supervise(mut self, cancel: CancellationToken) -> Result<CaptureExit> {
        let exited = tokio::select! {
            biased;
            status = self.child.wait() => Some(status.map(CaptureExit::Exited)),
            _ = cancel.cancelled() => None,
        };
        let outcome = match exited {
            Some(outcome) => outcome,
            None => self.stop(EXIT_GRACE).await,
        };

        cancel.cancel();

        match &outcome {
            Ok(CaptureExit::Exited(status)) if status.success() => {
                tracing::info!(pid = ?self.pid, "Capture process exited");
            }
            Ok(CaptureExit::Exited(status)) => {
                tracing::error!(pid = ?self.pid, status = %status, "Capture process failed");
            }
            Ok(CaptureExit::Terminated(_)) => {
                tracing::debug!(pid = ?self.pid, "Capture process terminated");
            }
            Err(e) => {
                tracing::error!(pid = ?self.pid, error = %e, "Failed to wait for capture process");
            }
        }

        outcome.map_err(Error::from)
    }

    /// Give the process `grace` to exit by itself, then kill it
    ///
    /// Cancellation often follows EOF on stdout, which the process closes just
    /// before it exits; the grace period lets its real status be collected.
    pub async fn stop(&mut self, grace: Duration) -> std::io::Result<CaptureExit> {
        if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
            return status.map(CaptureExit::Exited);
        }
        self.terminate().await
    }

    /// Kill the process if still running and reap it
    ///
    /// A process that already exited by itself keeps its own status.
    pub async fn terminate(&mut self) -> std::io::Result<CaptureExit> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(CaptureExit::Exited(status));
        }

        if let Err(e) = self.child.start_kill() {
            tracing::warn!(pid = ?self.pid, error = %e, "Failed to kill capture process");
        }

        let status = self.child.wait().await?;
        // A process that raced us to exit reports a code; a killed one doesn't
        if status.code().is_some() {
            Ok(CaptureExit::Exited(status))
        } else {
            Ok(CaptureExit::Terminated(status))
        }
    }
}

async fn forward_stderr(program: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => tracing::info!(program = %program, "{}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(program = %program, error = %e, "Capture stderr closed");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_spawn_reads_stdout() {
        let (process, mut stdout) = CaptureProcess::spawn("printf 'hello world'").unwrap();
        assert_eq!(process.program(), "printf");
        assert!(process.pid().is_some());

        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");

        let cancel = CancellationToken::new();
        let exit = process.supervise(cancel.clone()).await.unwrap();
        assert!(matches!(exit, CaptureExit::Exited(_)));
        assert!(exit.is_success());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_exit_cancels() {
        let (process, _stdout) = CaptureProcess::spawn("sh -c 'exit 3'").unwrap();

        let cancel = CancellationToken::new();
        let exit = process.supervise(cancel.clone()).await.unwrap();

        assert_eq!(exit.status().code(), Some(3));
        assert!(!exit.is_success());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let (process, _stdout) = CaptureProcess::spawn("sleep 30").unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(process.supervise(cancel.clone()));
        cancel.cancel();

        let exit = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor did not finish")
            .unwrap()
            .unwrap();
        assert!(matches!(exit, CaptureExit::Terminated(_)));
        assert!(exit.is_success());
    }

    #[tokio::test]
    async fn test_stop_keeps_own_exit_status() {
        // Closes stdout first, then exits shortly after
        let (mut process, _stdout) =
            CaptureProcess::spawn("sh -c 'exec >&-; sleep 0.05; exit 4'").unwrap();

        let exit = process.stop(Duration::from_secs(2)).await.unwrap();
        assert_eq!(exit, CaptureExit::Exited(exit.status()));
        assert_eq!(exit.status().code(), Some(4));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            CaptureProcess::spawn("   "),
            Err(Error::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_unbalanced_quotes_rejected() {
        assert!(matches!(
            CaptureProcess::spawn("tcpdump -w 'oops"),
            Err(Error::InvalidCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let result = CaptureProcess::spawn("/nonexistent/capture-tool -i eth0");
        assert!(matches!(result, Err(Error::Spawn { .. })));
    }
}
