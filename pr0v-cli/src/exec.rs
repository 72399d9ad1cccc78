//! Run external package-manager commands under a deadline
//!
//! Children are polled rather than waited on so a timeout or a cancel request
//! can kill the process instead of blocking the run.

use crate::error::{CancelledSnafu, InstallError, ManagerUnavailableSnafu, TimeoutSnafu, UnknownSnafu};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared cancel request; clones observe the same flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first. Returns false when cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.is_cancelled() {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
        !self.is_cancelled()
    }
}

/// Limits applied to every external command of a run
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub timeout: Option<Duration>,
    pub cancel: CancelFlag,
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Most useful diagnostic text: stderr, or stdout when stderr is empty
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

impl From<&std::process::Output> for CommandOutput {
    fn from(output: &std::process::Output) -> Self {
        CommandOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Run `program args..` to completion, honouring the timeout and cancel flag
///
/// A program that cannot be spawned is reported as `ManagerUnavailable`.
/// A non-zero exit is *not* an error here; callers classify the output.
pub fn run(program: &str, args: &[String], control: &RunControl) -> Result<CommandOutput, InstallError> {
    if control.cancel.is_cancelled() {
        return CancelledSnafu.fail();
    }

    tracing::debug!("exec: {} {}", program, args.join(" "));

    // C locale keeps diagnostics in English so they can be classified
    let handle = duct::cmd(program, args)
        .env("LC_ALL", "C")
        .stdin_null()
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .start()
        .map_err(|e| {
            ManagerUnavailableSnafu {
                manager: program,
                reason: e.to_string(),
            }
            .build()
        })?;

    let started = Instant::now();
    loop {
        match handle.try_wait() {
            Ok(Some(output)) => {
                let output = CommandOutput::from(output);
                tracing::debug!(
                    "exec: {} exited with {:?} after {:?}",
                    program,
                    output.code,
                    started.elapsed()
                );
                return Ok(output);
            }
            Ok(None) => {}
            Err(e) => {
                return UnknownSnafu {
                    message: format!("failed waiting on {program}: {e}"),
                }
                .fail();
            }
        }

        if control.cancel.is_cancelled() {
            kill(&handle, program);
            return CancelledSnafu.fail();
        }

        if let Some(limit) = control.timeout {
            if started.elapsed() >= limit {
                kill(&handle, program);
                return TimeoutSnafu { after: limit }.fail();
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Best effort: a child that escalated through sudo may outlive the kill
fn kill(handle: &duct::Handle, program: &str) {
    if let Err(e) = handle.kill() {
        tracing::warn!("failed to kill {}: {}", program, e);
    }
}

/// Check if a command is available in PATH
pub fn is_command_available(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}
