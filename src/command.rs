//! External command execution.
//!
//! Every shell-out in this crate goes through [`run_command`] so that
//! invocation logging, output capture, and exit-code handling stay in
//! one place. Commands are blocking; the engine waits for completion
//! before advancing to the next step.

use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::error::{BackupError, Result};

/// Captured output of a finished external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// Return an error carrying `context` and the command's stderr if
    /// the command did not exit successfully.
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            let code = self.exit_code.unwrap_or(-1);
            Err(BackupError::command(format!(
                "{context} failed (exit code {code}): {}",
                self.stderr.trim()
            )))
        }
    }
}

/// Run `program` with `args`, capturing stdout and stderr.
///
/// A non-zero exit is not an error here; callers decide via
/// [`CommandOutput::ensure_success`]. Spawn failures are errors.
pub fn run_command(program: &str, args: &[&str]) -> Result<CommandOutput> {
    info!("+ {program} {}", args.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| BackupError::command(format!("failed to spawn {program}: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code();
    let success = output.status.success();

    if success {
        debug!("{program} exited successfully");
    } else {
        debug!("{program} exited with code {:?}", exit_code);
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
        success,
    })
}
