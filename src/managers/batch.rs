use crate::constants::limits::BATCH_FAILURES_SHOWN;
use crate::errors::OpError;
use crate::managers::files::session::Session;
use crate::services::logger::Logger;
use crate::services::remote::RemoteExecutor;
use crate::utils::archive::add_to_zip;
use crate::utils::remote_path;
use crate::utils::shell::RemoteCommand;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAction {
    Delete,
    CopyTo(String),
    MoveTo(String),
    /// Adds every item to `archive`, a zip file name inside `dir`.
    Archive { dir: String, archive: String },
}

impl BatchAction {
    pub fn label(&self) -> &'static str {
        match self {
            BatchAction::Delete => "Delete",
            BatchAction::CopyTo(_) => "Copy",
            BatchAction::MoveTo(_) => "Move",
            BatchAction::Archive { .. } => "Archive",
        }
    }

    fn destination(&self) -> Option<&str> {
        match self {
            BatchAction::CopyTo(dest) | BatchAction::MoveTo(dest) => Some(dest),
            _ => None,
        }
    }

    fn command_for(&self, item: &str) -> RemoteCommand {
        match self {
            BatchAction::Delete => RemoteCommand::new("rm").arg("-rf").path(item),
            BatchAction::CopyTo(dest) => RemoteCommand::new("cp").arg("-r").paths([item, dest]),
            BatchAction::MoveTo(dest) => RemoteCommand::new("mv").paths([item, dest]),
            BatchAction::Archive { dir, archive } => add_to_zip(dir, archive, item),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub item: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub action: String,
    pub succeeded: usize,
    pub failed: Vec<BatchFailure>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "{}: {} succeeded, {} failed",
            self.action,
            self.succeeded,
            self.failed.len()
        )];
        for failure in self.failed.iter().take(BATCH_FAILURES_SHOWN) {
            lines.push(format!("- {}: {}", failure.item, failure.error));
        }
        if self.failed.len() > BATCH_FAILURES_SHOWN {
            lines.push(format!(
                "...and {} more",
                self.failed.len() - BATCH_FAILURES_SHOWN
            ));
        }
        lines.join("\n")
    }
}

/// Applies one action to every selected item. Per-item failures are
/// collected; the batch never aborts on the first one.
pub struct BatchEngine {
    logger: Logger,
    executor: Arc<dyn RemoteExecutor>,
    concurrency: usize,
}

impl BatchEngine {
    pub fn new(logger: Logger, executor: Arc<dyn RemoteExecutor>, concurrency: usize) -> Self {
        Self {
            logger: logger.child("batch"),
            executor,
            concurrency: concurrency.max(1),
        }
    }

    /// Items of one archive all write the same zip file, so they run one
    /// at a time whatever the configured fan-out.
    fn concurrency_for(&self, action: &BatchAction) -> usize {
        match action {
            BatchAction::Archive { .. } => 1,
            _ => self.concurrency,
        }
    }

    pub fn check(&self, action: &BatchAction, items: &[String]) -> Result<(), OpError> {
        if items.is_empty() {
            return Err(OpError::validation("Nothing is selected"));
        }
        if let BatchAction::Archive { archive, .. } = action {
            if items.len() < 2 {
                return Err(OpError::validation(
                    "Select at least two items to build an archive",
                ));
            }
            remote_path::validate_name(archive)?;
        }
        if let Some(dest) = action.destination() {
            if !dest.starts_with('/') {
                return Err(OpError::validation("Destination must be an absolute path"));
            }
            for item in items {
                if dest == item || dest.starts_with(&format!("{}/", item)) {
                    return Err(OpError::validation(format!(
                        "Destination {} is inside the selected item {}",
                        dest, item
                    )));
                }
            }
        }
        Ok(())
    }

    pub async fn apply(
        &self,
        host: &str,
        action: &BatchAction,
        items: &[String],
    ) -> Result<BatchSummary, OpError> {
        self.check(action, items)?;
        let results: Vec<(String, Result<(), String>)> = stream::iter(items.iter().cloned())
            .map(|item| async move {
                let command = action.command_for(&item);
                let outcome = match self.executor.run(host, &command).await {
                    Ok(output) if output.success() => Ok(()),
                    Ok(output) => Err(OpError::command_failed(
                        action.label(),
                        output.exit_status,
                        &output.failure_detail(),
                    )
                    .message),
                    Err(err) => Err(err.message),
                };
                (item, outcome)
            })
            .buffered(self.concurrency_for(action))
            .collect()
            .await;

        let mut summary = BatchSummary {
            action: action.label().to_string(),
            succeeded: 0,
            failed: Vec::new(),
        };
        for (item, outcome) in results {
            match outcome {
                Ok(()) => summary.succeeded += 1,
                Err(error) => summary.failed.push(BatchFailure { item, error }),
            }
        }
        self.logger.info(
            "Batch finished",
            Some(&serde_json::json!({
                "host": host,
                "action": summary.action,
                "succeeded": summary.succeeded,
                "failed": summary.failed.len(),
            })),
        );
        Ok(summary)
    }

    /// Runs `action` over the session's selection. On success the selection
    /// is cleared and the session is back to browsing; a failed precondition
    /// leaves the session untouched.
    pub async fn run_for_session(
        &self,
        session: &mut Session,
        action: &BatchAction,
    ) -> Result<BatchSummary, OpError> {
        let items = session.selected_paths();
        let summary = self.apply(&session.host, action, &items).await?;
        session.cancel();
        Ok(summary)
    }
}
