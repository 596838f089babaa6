//! Application deployment: source prelude, job state machine and replies.

pub mod detect;
pub mod job;
pub mod pipeline;
pub mod runtime;
pub mod source;

use crate::errors::OpError;
use crate::services::inventory::HostInventory;
use crate::services::logger::Logger;
use crate::services::registry::OperatorRegistry;
use crate::services::remote::RemoteExecutor;
use crate::services::settings::Settings;
use crate::transport::reply::{Control, Reply};
use crate::utils::remote_path;
use bytes::Bytes;
use detect::ProjectType;
use job::{DeployMode, DeploymentJob, SourceKind, SourceSpec, Stage};
use pipeline::Pipeline;
use std::sync::Arc;

/// Per-operator deployment state, from host pick to a finished job.
#[derive(Debug, Clone)]
pub enum DeployFlow {
    ChoosingSource { host: String },
    AwaitingLocator { host: String, kind: SourceKind },
    Active(DeploymentJob),
}

pub struct DeployManager {
    logger: Logger,
    pipeline: Pipeline,
    inventory: Arc<dyn HostInventory>,
    deploy_root: String,
    flows: OperatorRegistry<DeployFlow>,
}

fn cancel_control() -> Control {
    Control::new("Cancel", "dep:cancel")
}

fn source_menu(host: &str) -> Reply {
    Reply::text(format!("Deploy to {}: choose the source", host))
        .row(vec![
            Control::new("Git repository", "dep:src:repo"),
            Control::new("Docker image", "dep:src:image"),
        ])
        .row(vec![Control::new("Upload archive", "dep:src:archive"), cancel_control()])
}

fn locator_prompt(kind: SourceKind) -> Reply {
    let text = match kind {
        SourceKind::Repository => {
            "Send the repository URL. Append #branch or use a /tree/<branch> link to pick a ref."
        }
        SourceKind::Image => "Send the image reference, e.g. nginx:1.27",
        SourceKind::Archive => "Upload a .zip, .tar, .tar.gz/.tgz or .tar.bz2/.tbz2 archive",
    };
    Reply::text(text).row(vec![cancel_control()])
}

fn decision_controls(job: &DeploymentJob) -> Vec<Vec<Control>> {
    let mut rows = Vec::new();
    match &job.descriptor {
        Some(d) if d.project_type == ProjectType::ContainerImage => {
            rows.push(vec![Control::new("Run container", "dep:pull")]);
        }
        Some(d) => {
            if !d.manifests.is_empty() {
                rows.push(vec![Control::new("Install dependencies and deploy", "dep:install")]);
            }
            if d.can_run_natively() {
                rows.push(vec![Control::new("Deploy without installing", "dep:configure")]);
            }
            if d.has_build_recipe {
                rows.push(vec![Control::new("Build and run container", "dep:docker")]);
            }
        }
        None => {}
    }
    rows.push(vec![Control::new("Manual instructions", "dep:manual"), cancel_control()]);
    rows
}

fn job_header(job: &DeploymentJob) -> String {
    let mut header = format!(
        "Deployment {} on {} ({} {})",
        job.project,
        job.host,
        job.source.kind.label(),
        job.source.locator
    );
    if let Some(git_ref) = &job.source.git_ref {
        header.push_str(&format!(" @ {}", git_ref));
    }
    header.push_str(&format!("\nStage: {}", job.stage().label()));
    header
}

fn install_lines(job: &DeploymentJob) -> Vec<String> {
    job.install_outcomes
        .iter()
        .map(|o| match &o.error {
            None => format!("ok   {}", o.manifest.file_name()),
            Some(err) => format!("FAIL {}: {}", o.manifest.file_name(), err),
        })
        .collect()
}

impl DeployManager {
    pub fn new(
        logger: Logger,
        settings: Arc<Settings>,
        executor: Arc<dyn RemoteExecutor>,
        inventory: Arc<dyn HostInventory>,
    ) -> Self {
        let logger = logger.child("deploy");
        let deploy_root = settings.deploy_root.clone();
        Self {
            pipeline: Pipeline::new(logger.clone(), settings, executor, inventory.clone()),
            logger,
            inventory,
            deploy_root,
            flows: OperatorRegistry::new(),
        }
    }

    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    pub async fn flow(&self, operator: &str) -> Option<DeployFlow> {
        let slot = self.flows.get(operator)?;
        let flow = slot.lock().await;
        Some(flow.clone())
    }

    pub async fn job(&self, operator: &str) -> Option<DeploymentJob> {
        match self.flow(operator).await? {
            DeployFlow::Active(job) => Some(job),
            _ => None,
        }
    }

    /// Handles a `dep:` action with the prefix already stripped.
    pub async fn handle_action(&self, operator: &str, action: &str) -> Reply {
        let (verb, arg) = action.split_once(':').unwrap_or((action, ""));
        if verb == "start" {
            return self.start(operator, arg).await;
        }
        let slot = match self.flows.get(operator) {
            Some(slot) => slot,
            None => {
                return Reply::text("No deployment is in progress.").button("Hosts", "fs:hosts")
            }
        };
        let mut flow = slot.lock().await;

        if verb == "cancel" {
            return self.cancel(operator, &mut flow);
        }

        match &mut *flow {
            DeployFlow::ChoosingSource { host } | DeployFlow::AwaitingLocator { host, .. } => {
                if verb != "src" {
                    return Reply::text("Choose a source first.")
                        .row(vec![cancel_control()]);
                }
                match SourceKind::parse(arg) {
                    Some(kind) => {
                        let host = host.clone();
                        *flow = DeployFlow::AwaitingLocator { host, kind };
                        locator_prompt(kind)
                    }
                    None => Reply::text(format!("Unknown source kind: {}", arg))
                        .row(vec![cancel_control()]),
                }
            }
            DeployFlow::Active(job) => {
                let result = match verb {
                    "status" => Ok(None),
                    "ack" => {
                        if job.stage().is_terminal() {
                            self.flows.remove(operator);
                            return Reply::text("Deployment closed.").button("Hosts", "fs:hosts");
                        }
                        Err(OpError::validation("The deployment is still in progress"))
                    }
                    "install" => self.install_and_run(job).await.map(|_| None),
                    "configure" => self.configure_native(job).await,
                    "docker" => self.run_mode(job, DeployMode::ContainerBuild).await.map(|_| None),
                    "pull" => self.run_mode(job, DeployMode::ContainerPull).await.map(|_| None),
                    "manual" => self.pipeline.finish_manual(job).map(Some),
                    "retry" => self.retry(job).await.map(|_| None),
                    other => Err(OpError::validation(format!("Unknown deployment action: {}", other))),
                };
                self.respond(operator, job, result)
            }
        }
    }

    /// Text input for the source prelude; `None` when no locator is awaited.
    pub async fn handle_text(&self, operator: &str, text: &str) -> Option<Reply> {
        let slot = self.flows.get(operator)?;
        let mut flow = slot.lock().await;
        let (host, kind) = match &*flow {
            DeployFlow::AwaitingLocator { host, kind } => (host.clone(), *kind),
            _ => return None,
        };
        let parsed = match kind {
            SourceKind::Repository => source::parse_repository(text),
            SourceKind::Image => source::parse_image(text),
            SourceKind::Archive => {
                return Some(
                    Reply::text("Upload the archive as a file, not as text.")
                        .row(vec![cancel_control()]),
                )
            }
        };
        let (spec, project) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                return Some(Reply::text(err.operator_text()).row(vec![cancel_control()]))
            }
        };
        Some(self.launch(operator, &mut flow, &host, spec, &project, None).await)
    }

    pub async fn handle_upload(&self, operator: &str, name: &str, data: Bytes) -> Option<Reply> {
        let slot = self.flows.get(operator)?;
        let mut flow = slot.lock().await;
        let host = match &*flow {
            DeployFlow::AwaitingLocator {
                host,
                kind: SourceKind::Archive,
            } => host.clone(),
            _ => return None,
        };
        let (spec, project, _) = match source::parse_archive_name(name) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Some(Reply::text(err.operator_text()).row(vec![cancel_control()]))
            }
        };
        Some(self.launch(operator, &mut flow, &host, spec, &project, Some(data)).await)
    }

    async fn start(&self, operator: &str, host_id: &str) -> Reply {
        let host = match self.inventory.host(host_id).await {
            Ok(host) => host,
            Err(err) => return Reply::text(err.operator_text()).button("Hosts", "fs:hosts"),
        };
        if self.flows.get(operator).is_some() {
            self.logger.info(
                "Replacing pending deployment flow",
                Some(&serde_json::json!({"operator": operator})),
            );
        }
        self.flows.insert(
            operator,
            DeployFlow::ChoosingSource {
                host: host.id.clone(),
            },
        );
        source_menu(host.display_name())
    }

    async fn launch(
        &self,
        operator: &str,
        flow: &mut DeployFlow,
        host: &str,
        spec: SourceSpec,
        project: &str,
        upload: Option<Bytes>,
    ) -> Reply {
        let workdir = remote_path::join(&self.deploy_root, project);
        let mut job = DeploymentJob::new(operator, host, spec, project, &workdir);
        job.upload = upload;
        self.logger.info(
            "Deployment started",
            Some(&serde_json::json!({
                "operator": operator,
                "job": job.id,
                "host": host,
                "source": job.source,
            })),
        );
        *flow = DeployFlow::Active(job);
        let job = match flow {
            DeployFlow::Active(job) => job,
            _ => return Reply::text("Deployment could not be started."),
        };
        let result = self.acquire_and_detect(job).await.map(|_| None);
        self.respond(operator, job, result)
    }

    async fn acquire_and_detect(&self, job: &mut DeploymentJob) -> Result<(), OpError> {
        if job.stage() == Stage::Acquiring {
            self.pipeline.acquire(job).await?;
        }
        self.pipeline.detect(job).await
    }

    async fn run_mode(&self, job: &mut DeploymentJob, mode: DeployMode) -> Result<(), OpError> {
        self.pipeline.configure(job, mode).await?;
        self.pipeline.verify(job).await
    }

    async fn install_and_run(&self, job: &mut DeploymentJob) -> Result<(), OpError> {
        self.pipeline.install(job).await?;
        if !job.install_ok() {
            return Ok(());
        }
        self.run_mode(job, DeployMode::NativeService).await
    }

    /// Native service without installing; projects that cannot run natively
    /// get manual instructions instead.
    async fn configure_native(&self, job: &mut DeploymentJob) -> Result<Option<String>, OpError> {
        let runnable = job
            .descriptor
            .as_ref()
            .map(|d| d.can_run_natively())
            .unwrap_or(false);
        if !runnable && job.stage() == Stage::AwaitingDecision {
            return self.pipeline.finish_manual(job).map(Some);
        }
        self.run_mode(job, DeployMode::NativeService).await.map(|_| None)
    }

    async fn retry(&self, job: &mut DeploymentJob) -> Result<(), OpError> {
        match job.stage() {
            Stage::Acquiring | Stage::Detecting => self.acquire_and_detect(job).await,
            Stage::Installing => self.install_and_run(job).await,
            Stage::Configuring => {
                let mode = job.mode.unwrap_or(DeployMode::NativeService);
                self.run_mode(job, mode).await
            }
            Stage::Verifying => self.pipeline.verify(job).await,
            _ => Err(OpError::validation("Nothing to retry at this stage")),
        }
    }

    fn cancel(&self, operator: &str, flow: &mut DeployFlow) -> Reply {
        let reply = match flow {
            DeployFlow::Active(job) if job.stage() == Stage::Failed => {
                Reply::text("Deployment closed.")
            }
            DeployFlow::Active(job) => {
                let stage = job.stage();
                if let Err(err) = job.cancel() {
                    return Reply::text(err.operator_text());
                }
                self.logger.info(
                    "Deployment cancelled",
                    Some(&serde_json::json!({
                        "operator": operator,
                        "job": job.id,
                        "stage": stage.label(),
                    })),
                );
                let mut text = format!("Deployment cancelled at {}.", stage.label());
                if job.source.kind != SourceKind::Image || stage >= Stage::Configuring {
                    text.push_str(&format!(
                        "\nAnything already created for {} stays on the host.",
                        job.workdir
                    ));
                }
                Reply::text(text)
            }
            _ => Reply::text("Deployment cancelled."),
        };
        self.flows.remove(operator);
        reply.button("Hosts", "fs:hosts")
    }

    /// Renders the job after a step and drops finished jobs from the
    /// registry. Failed jobs stay until acknowledged.
    fn respond(&self, operator: &str, job: &DeploymentJob, result: Result<Option<String>, OpError>) -> Reply {
        let mut lines = vec![job_header(job)];
        let (notice, err) = match result {
            Ok(notice) => (notice, None),
            Err(err) => (None, Some(err)),
        };
        if let Some(err) = &err {
            self.logger.warn(
                "Deployment step did not complete",
                Some(&serde_json::json!({
                    "operator": operator,
                    "job": job.id,
                    "stage": job.stage().label(),
                    "kind": err.kind,
                    "error": err.message,
                })),
            );
        }

        match job.stage() {
            Stage::Complete => {
                self.flows.remove(operator);
                match notice {
                    Some(instructions) => lines.push(instructions),
                    None => lines.push(format!(
                        "{} is running; {}.",
                        job.unit_name.as_deref().unwrap_or(&job.project),
                        match job.mode {
                            Some(DeployMode::NativeService) => format!(
                                "the service listens on port {}",
                                self.pipeline.listening_port(job)
                            ),
                            _ => format!(
                                "port {} on the host is published",
                                self.pipeline.listening_port(job)
                            ),
                        }
                    )),
                }
                Reply::text(lines.join("\n\n")).button("Hosts", "fs:hosts")
            }
            Stage::Failed => {
                lines.push(format!(
                    "Error: {}",
                    job.error.as_deref().unwrap_or("unknown failure")
                ));
                if !job.install_outcomes.is_empty() {
                    lines.push(install_lines(job).join("\n"));
                }
                Reply::text(lines.join("\n\n")).button("OK", "dep:ack")
            }
            Stage::Cancelled => {
                self.flows.remove(operator);
                Reply::text(lines.join("\n\n"))
            }
            Stage::AwaitingDecision => {
                if let Some(d) = &job.descriptor {
                    lines.push(d.summary());
                }
                if let Some(err) = &err {
                    lines.push(err.operator_text());
                }
                let mut reply = Reply::text(lines.join("\n\n"));
                for row in decision_controls(job) {
                    reply = reply.row(row);
                }
                reply
            }
            Stage::Installing => {
                lines.push(install_lines(job).join("\n"));
                if let Some(err) = &err {
                    lines.push(err.operator_text());
                }
                let mut reply = Reply::text(lines.join("\n\n"));
                if job.install_ok() {
                    reply = reply.button("Retry", "dep:retry");
                } else {
                    reply = reply.button("Retry install", "dep:install");
                }
                reply.row(vec![Control::new("Manual instructions", "dep:manual"), cancel_control()])
            }
            Stage::Acquiring | Stage::Detecting | Stage::Configuring | Stage::Verifying => {
                if let Some(err) = &err {
                    lines.push(err.operator_text());
                }
                Reply::text(lines.join("\n\n"))
                    .row(vec![Control::new("Retry", "dep:retry"), cancel_control()])
            }
        }
    }
}
