use crate::constants::limits::ERROR_DISPLAY_BYTES;
use crate::utils::text::truncate_utf8_prefix;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpErrorKind {
    Validation,
    NotFound,
    Expired,
    ChannelDead,
    Timeout,
    CommandFailed,
    Internal,
}

impl OpErrorKind {
    /// Transport-level failures leave the flow intact and may be retried.
    pub fn is_transport(self) -> bool {
        matches!(self, OpErrorKind::ChannelDead | OpErrorKind::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct OpError {
    pub kind: OpErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
    pub retryable: bool,
}

impl OpError {
    pub fn new(kind: OpErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            exit_status: None,
            retryable: kind.is_transport(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(OpErrorKind::Validation, "VALIDATION", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(OpErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(OpErrorKind::Expired, "EXPIRED", message)
    }

    pub fn channel_dead(message: impl Into<String>) -> Self {
        Self::new(OpErrorKind::ChannelDead, "CHANNEL_DEAD", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(OpErrorKind::Timeout, "TIMEOUT", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(OpErrorKind::Internal, "INTERNAL", message)
    }

    /// Non-zero exit of a remote command; stderr (or stdout when stderr is
    /// empty) is kept verbatim up to the display budget.
    pub fn command_failed(step: &str, exit_status: i32, detail: &str) -> Self {
        let detail = detail.trim();
        let message = if detail.is_empty() {
            format!("{} failed (exit {})", step, exit_status)
        } else {
            format!(
                "{} failed (exit {}): {}",
                step,
                exit_status,
                truncate_utf8_prefix(detail, ERROR_DISPLAY_BYTES)
            )
        };
        let mut err = Self::new(OpErrorKind::CommandFailed, "COMMAND_FAILED", message);
        err.exit_status = Some(exit_status);
        err
    }

    pub fn is_transport(&self) -> bool {
        self.kind.is_transport()
    }

    /// Text shown to the operator for a failed step.
    pub fn operator_text(&self) -> String {
        let mut lines = vec![format!("Error: {}", self.message)];
        if let Some(hint) = &self.hint {
            lines.push(hint.clone());
        }
        if self.is_transport() {
            lines.push("The connection will be re-established; try the last step again.".to_string());
        }
        lines.join("\n")
    }
}

impl From<std::io::Error> for OpError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => OpError::timeout(err.to_string()),
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof => OpError::channel_dead(err.to_string()),
            _ => OpError::internal(err.to_string()),
        }
    }
}
