use crate::errors::{OpError, OpErrorKind};
use crate::utils::shell::RemoteCommand;
use crate::utils::text::lossy;
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stdout_text(&self) -> String {
        lossy(&self.stdout)
    }

    pub fn stderr_text(&self) -> String {
        lossy(&self.stderr)
    }

    /// Stderr, or stdout when the command wrote its complaint there.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr_text();
        if stderr.trim().is_empty() {
            self.stdout_text()
        } else {
            stderr
        }
    }

    /// Treats a non-zero exit as a command-level failure of `step`.
    pub fn into_result(self, step: &str) -> Result<CommandOutput, OpError> {
        if self.success() {
            Ok(self)
        } else {
            Err(OpError::command_failed(
                step,
                self.exit_status,
                &self.failure_detail(),
            ))
        }
    }
}

/// Secure-channel collaborator. Non-zero exit statuses are returned, not
/// raised; `Err` is reserved for transport failures (`ChannelDead`,
/// `Timeout`) and unknown hosts.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, host: &str, command: &RemoteCommand) -> Result<CommandOutput, OpError>;

    async fn upload(&self, host: &str, remote_path: &str, data: Bytes) -> Result<(), OpError>;

    async fn download(&self, host: &str, remote_path: &str) -> Result<Bytes, OpError>;
}

/// Runs a command that has no side effects, retrying once on timeout.
pub async fn run_read_only(
    executor: &dyn RemoteExecutor,
    host: &str,
    command: &RemoteCommand,
) -> Result<CommandOutput, OpError> {
    match executor.run(host, command).await {
        Err(err) if err.kind == OpErrorKind::Timeout => executor.run(host, command).await,
        other => other,
    }
}
