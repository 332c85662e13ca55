//! Command execution on the local host or over SSH
//!
//! Output is returned raw, without trimming. A non-zero exit status is an
//! error on both targets.

use crate::error::{AppError, AppResult};
use crate::logging::sanitize;
use crate::ssh::{CommandOutput, ConnectionProfile, SessionManager};
use crate::target::OperationTarget;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

const STDERR_LIMIT: usize = 500;

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Clone)]
pub struct CommandExecutor {
    sessions: Arc<SessionManager>,
}

impl CommandExecutor {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    pub async fn run(&self, target: OperationTarget, command: &str) -> AppResult<CommandResult> {
        match target {
            OperationTarget::Local => run_local(command).await,
            OperationTarget::Remote => {
                let profile = self.sessions.profile()?;
                self.run_with(profile, command).await
            }
        }
    }

    /// Run against an explicit profile instead of the active one.
    pub async fn run_with(
        &self,
        profile: ConnectionProfile,
        command: &str,
    ) -> AppResult<CommandResult> {
        tracing::debug!("Running on {}: {}", profile.target(), sanitize(command));

        let line = command.to_string();
        let output = self
            .sessions
            .with_session_using(profile, move |session| session.exec(&line))
            .await?;

        let CommandOutput {
            stdout,
            stderr,
            exit_status,
        } = output;
        finish(command, stdout, stderr, exit_status)
    }
}

/// Run through the local shell, capturing stdout and stderr separately.
pub async fn run_local(command: &str) -> AppResult<CommandResult> {
    tracing::debug!("Running locally: {}", sanitize(command));

    let output = shell(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            AppError::Execution(format!("Failed to run '{}': {}", sanitize(command), e))
        })?;

    finish(
        command,
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
        // Killed by a signal
        output.status.code().unwrap_or(-1),
    )
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn finish(command: &str, stdout: String, stderr: String, exit_code: i32) -> AppResult<CommandResult> {
    if exit_code != 0 {
        let truncated: String = stderr.chars().take(STDERR_LIMIT).collect();
        return Err(AppError::Execution(format!(
            "Command '{}' exited with status {}: {}",
            sanitize(command),
            exit_code,
            truncated.trim_end()
        )));
    }
    Ok(CommandResult {
        stdout,
        stderr,
        exit_code,
    })
}
