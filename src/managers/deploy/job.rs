use super::detect::{Manifest, ProjectDescriptor};
use crate::errors::OpError;
use bytes::Bytes;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Repository,
    Image,
    Archive,
}

impl SourceKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "repo" => Some(SourceKind::Repository),
            "image" => Some(SourceKind::Image),
            "archive" => Some(SourceKind::Archive),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Repository => "repository",
            SourceKind::Image => "container image",
            SourceKind::Archive => "archive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSpec {
    pub kind: SourceKind,
    /// Clone URL, image reference, or uploaded file name.
    pub locator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    NativeService,
    ContainerBuild,
    ContainerPull,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Acquiring,
    Detecting,
    AwaitingDecision,
    Installing,
    Configuring,
    Verifying,
    Complete,
    Failed,
    Cancelled,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed | Stage::Cancelled)
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Acquiring => "acquiring",
            Stage::Detecting => "detecting",
            Stage::AwaitingDecision => "awaiting-decision",
            Stage::Installing => "installing",
            Stage::Configuring => "configuring",
            Stage::Verifying => "verifying",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub manifest: Manifest,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One in-flight deployment. Stages only move forward; `Failed` and
/// `Cancelled` are reachable from every non-terminal stage.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentJob {
    pub id: String,
    pub operator: String,
    pub host: String,
    pub source: SourceSpec,
    pub project: String,
    pub workdir: String,
    pub descriptor: Option<ProjectDescriptor>,
    pub mode: Option<DeployMode>,
    stage: Stage,
    pub install_outcomes: Vec<InstallOutcome>,
    pub error: Option<String>,
    pub unit_name: Option<String>,
    #[serde(skip)]
    pub upload: Option<Bytes>,
}

impl DeploymentJob {
    pub fn new(operator: &str, host: &str, source: SourceSpec, project: &str, workdir: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operator: operator.to_string(),
            host: host.to_string(),
            source,
            project: project.to_string(),
            workdir: workdir.to_string(),
            descriptor: None,
            mode: None,
            stage: Stage::Acquiring,
            install_outcomes: Vec::new(),
            error: None,
            unit_name: None,
            upload: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn install_ok(&self) -> bool {
        !self.install_outcomes.is_empty() && self.install_outcomes.iter().all(|o| o.ok)
    }

    fn allowed(&self, next: Stage) -> bool {
        use Stage::*;
        if self.stage.is_terminal() {
            return false;
        }
        match (self.stage, next) {
            (_, Failed) | (_, Cancelled) => true,
            (Acquiring, Detecting) => true,
            (Detecting, AwaitingDecision) => true,
            (AwaitingDecision, Installing) | (Installing, Installing) => true,
            (AwaitingDecision, Configuring) => true,
            (Installing, Configuring) => self.install_ok(),
            (AwaitingDecision, Complete) | (Installing, Complete) => {
                self.mode == Some(DeployMode::Manual)
            }
            (Configuring, Verifying) => true,
            (Verifying, Complete) => true,
            _ => false,
        }
    }

    pub fn advance(&mut self, next: Stage) -> Result<(), OpError> {
        if !self.allowed(next) {
            return Err(OpError::validation(format!(
                "Deployment cannot go from {} to {}",
                self.stage.label(),
                next.label()
            )));
        }
        self.stage = next;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if !self.stage.is_terminal() {
            self.error = Some(message.into());
            self.stage = Stage::Failed;
        }
    }

    /// No remote cleanup happens; artifacts already created stay on the host.
    pub fn cancel(&mut self) -> Result<(), OpError> {
        self.advance(Stage::Cancelled)
    }
}
