use super::detect::{self, ProjectDescriptor};
use super::job::{DeployMode, DeploymentJob, InstallOutcome, SourceKind, Stage};
use super::runtime;
use super::source;
use crate::constants::limits::ERROR_DISPLAY_BYTES;
use crate::errors::OpError;
use crate::services::inventory::{DeployedUnit, HostInventory, UnitKind};
use crate::services::logger::Logger;
use crate::services::remote::{run_read_only, CommandOutput, RemoteExecutor};
use crate::services::settings::Settings;
use crate::utils::archive::ArchiveFormat;
use crate::utils::remote_path;
use crate::utils::shell::RemoteCommand;
use crate::utils::text::tail_for_display;
use bytes::Bytes;
use std::sync::Arc;

/// Runs deployment stages against a job. A step that returns `Err` either
/// failed the job (command-level) or left it at its current stage
/// (transport-level, retryable).
pub struct Pipeline {
    logger: Logger,
    settings: Arc<Settings>,
    executor: Arc<dyn RemoteExecutor>,
    inventory: Arc<dyn HostInventory>,
}

impl Pipeline {
    pub fn new(
        logger: Logger,
        settings: Arc<Settings>,
        executor: Arc<dyn RemoteExecutor>,
        inventory: Arc<dyn HostInventory>,
    ) -> Self {
        Self {
            logger: logger.child("pipeline"),
            settings,
            executor,
            inventory,
        }
    }

    /// Transport errors pass through untouched; anything else fails the job.
    fn settle<T>(&self, job: &mut DeploymentJob, result: Result<T, OpError>) -> Result<T, OpError> {
        if let Err(err) = &result {
            if !err.is_transport() {
                job.fail(err.message.clone());
                self.logger.warn(
                    "Deployment failed",
                    Some(&serde_json::json!({
                        "job": job.id,
                        "operator": job.operator,
                        "host": job.host,
                        "error": err.message,
                    })),
                );
            }
        }
        result
    }

    async fn run(&self, job: &DeploymentJob, step: &str, command: RemoteCommand) -> Result<CommandOutput, OpError> {
        self.logger.debug(
            "Deployment step",
            Some(&serde_json::json!({"job": job.id, "step": step})),
        );
        self.executor.run(&job.host, &command).await?.into_result(step)
    }

    pub async fn acquire(&self, job: &mut DeploymentJob) -> Result<(), OpError> {
        if job.stage() != Stage::Acquiring {
            return Err(OpError::validation("Source is already acquired"));
        }
        let result = self.acquire_source(job).await;
        self.settle(job, result)?;
        job.advance(Stage::Detecting)
    }

    async fn acquire_source(&self, job: &mut DeploymentJob) -> Result<(), OpError> {
        let root = self.settings.deploy_root.clone();
        match job.source.kind {
            SourceKind::Image => Ok(()),
            SourceKind::Repository => {
                let probe = source::checkout_probe(&job.workdir);
                let existing = run_read_only(&*self.executor, &job.host, &probe).await?.success();
                let command = if existing {
                    source::refresh_command(&job.workdir, &job.source)
                } else {
                    source::clone_command(&root, &job.workdir, &job.source)
                };
                self.run(job, "Fetch source", command).await?;
                Ok(())
            }
            SourceKind::Archive => {
                let format = ArchiveFormat::require(&job.source.locator)?;
                let data = job
                    .upload
                    .clone()
                    .ok_or_else(|| OpError::internal("Archive content is missing"))?;
                let staged = source::upload_path(&root, &job.source.locator);
                self.executor.upload(&job.host, &staged, data).await?;
                self.run(job, "Extract archive", format.extract_command(&staged, &job.workdir))
                    .await?;
                job.upload = None;
                Ok(())
            }
        }
    }

    pub async fn detect(&self, job: &mut DeploymentJob) -> Result<(), OpError> {
        if job.stage() != Stage::Detecting {
            return Err(OpError::validation("Detection is not due"));
        }
        let result = self.detect_project(job).await;
        let descriptor = self.settle(job, result)?;
        self.logger.info(
            "Project detected",
            Some(&serde_json::json!({"job": job.id, "descriptor": descriptor})),
        );
        job.descriptor = Some(descriptor);
        job.advance(Stage::AwaitingDecision)
    }

    async fn list_names(&self, job: &DeploymentJob, dir: &str) -> Result<Vec<String>, OpError> {
        let output = run_read_only(&*self.executor, &job.host, &detect::listing_command(dir))
            .await?
            .into_result("List project")?;
        Ok(output
            .stdout_text()
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn detect_project(&self, job: &mut DeploymentJob) -> Result<ProjectDescriptor, OpError> {
        if job.source.kind == SourceKind::Image {
            return Ok(ProjectDescriptor::image());
        }
        let mut names = self.list_names(job, &job.workdir).await?;
        // Archives often wrap everything in one top-level directory.
        if job.source.kind == SourceKind::Archive && names.len() == 1 && names[0].ends_with('/') {
            let nested = remote_path::join(&job.workdir, names[0].trim_end_matches('/'));
            names = self.list_names(job, &nested).await?;
            job.workdir = nested;
        }
        Ok(detect::detect_from_names(&names))
    }

    /// Runs every manifest's install command. The job stays at
    /// `installing`; `install_ok()` tells whether configuring may follow.
    pub async fn install(&self, job: &mut DeploymentJob) -> Result<(), OpError> {
        let manifests = match &job.descriptor {
            Some(d) if !d.manifests.is_empty() => d.manifests.clone(),
            _ => return Err(OpError::validation("No dependency manifests were detected")),
        };
        job.advance(Stage::Installing)?;
        job.mode = Some(DeployMode::NativeService);
        let mut outcomes = Vec::with_capacity(manifests.len());
        let mut transport_error = None;
        for manifest in manifests {
            let command = manifest.install_command().in_dir(&job.workdir);
            let outcome = match self.executor.run(&job.host, &command).await {
                Ok(output) if output.success() => InstallOutcome {
                    manifest,
                    ok: true,
                    error: None,
                },
                Ok(output) => InstallOutcome {
                    manifest,
                    ok: false,
                    error: Some(format!(
                        "exit {}: {}",
                        output.exit_status,
                        tail_for_display(output.failure_detail().trim(), ERROR_DISPLAY_BYTES)
                    )),
                },
                Err(err) => {
                    let message = err.message.clone();
                    if err.is_transport() {
                        transport_error.get_or_insert(err);
                    }
                    InstallOutcome {
                        manifest,
                        ok: false,
                        error: Some(message),
                    }
                }
            };
            outcomes.push(outcome);
        }
        job.install_outcomes = outcomes;
        self.logger.info(
            "Dependencies installed",
            Some(&serde_json::json!({"job": job.id, "outcomes": job.install_outcomes})),
        );
        match transport_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Starts the project in `mode`, leaving the job at `configuring`.
    pub async fn configure(&self, job: &mut DeploymentJob, mode: DeployMode) -> Result<(), OpError> {
        let descriptor = job
            .descriptor
            .clone()
            .ok_or_else(|| OpError::validation("Project has not been detected yet"))?;
        let exec = match mode {
            DeployMode::NativeService => Some(exec_or_reject(&descriptor)?),
            DeployMode::ContainerBuild if !descriptor.has_build_recipe => {
                return Err(OpError::validation("No Dockerfile at the project root"))
            }
            DeployMode::ContainerPull if job.source.kind != SourceKind::Image => {
                return Err(OpError::validation("Only image sources can be pulled"))
            }
            DeployMode::Manual => {
                return Err(OpError::internal("Manual mode has no configure step"))
            }
            _ => None,
        };
        if job.stage() != Stage::Configuring {
            job.advance(Stage::Configuring)?;
        }
        job.mode = Some(mode);
        let result = self.configure_mode(job, mode, exec).await;
        self.settle(job, result)
    }

    fn internal_port(&self, job: &DeploymentJob) -> u16 {
        job.descriptor
            .as_ref()
            .and_then(|d| d.suggested_port)
            .unwrap_or(self.settings.deploy_port)
    }

    /// Port the deployed unit answers on from outside: the service's own
    /// port for native units, the published port for containers.
    pub fn listening_port(&self, job: &DeploymentJob) -> u16 {
        match job.mode {
            Some(DeployMode::NativeService) => self.internal_port(job),
            _ => self.settings.deploy_port,
        }
    }

    async fn configure_mode(&self, job: &mut DeploymentJob, mode: DeployMode, exec: Option<String>) -> Result<(), OpError> {
        let external = self.settings.deploy_port;
        let internal_port = self.internal_port(job);
        match mode {
            DeployMode::NativeService => {
                let exec = exec.ok_or_else(|| OpError::internal("Missing exec line"))?;
                let unit = runtime::render_unit(&job.project, &job.workdir, &exec, internal_port);
                self.executor
                    .upload(&job.host, &runtime::unit_path(&job.project), Bytes::from(unit))
                    .await?;
                self.run(job, "Enable service", runtime::enable_service(&job.project))
                    .await?;
                let state = self
                    .executor
                    .run(&job.host, &runtime::service_state(&job.project))
                    .await?;
                self.logger.info(
                    "Service started",
                    Some(&serde_json::json!({"job": job.id, "state": state.stdout_text().trim()})),
                );
            }
            DeployMode::ContainerBuild => {
                self.run(job, "Build image", runtime::build_image(&job.project, &job.workdir))
                    .await?;
                let image = runtime::unit_name(&job.project);
                self.run(
                    job,
                    "Run container",
                    runtime::run_container(&job.project, &image, external, internal_port),
                )
                .await?;
            }
            DeployMode::ContainerPull => {
                self.run(job, "Pull image", runtime::pull_image(&job.source.locator))
                    .await?;
                self.run(
                    job,
                    "Run container",
                    runtime::run_container(&job.project, &job.source.locator, external, internal_port),
                )
                .await?;
            }
            DeployMode::Manual => {}
        }
        job.unit_name = Some(runtime::unit_name(&job.project));
        Ok(())
    }

    /// Re-queries the running state; registers the unit on success.
    pub async fn verify(&self, job: &mut DeploymentJob) -> Result<(), OpError> {
        let mode = job
            .mode
            .ok_or_else(|| OpError::internal("Deployment mode is not set"))?;
        if job.stage() != Stage::Verifying {
            job.advance(Stage::Verifying)?;
        }
        let (command, expected, kind) = match mode {
            DeployMode::NativeService => (runtime::service_state(&job.project), "active", UnitKind::Service),
            DeployMode::ContainerBuild | DeployMode::ContainerPull => {
                (runtime::container_state(&job.project), "true", UnitKind::Container)
            }
            DeployMode::Manual => return Err(OpError::internal("Manual deployments are not verified")),
        };
        let state = run_read_only(&*self.executor, &job.host, &command)
            .await?
            .stdout_text()
            .trim()
            .to_string();
        if state != expected {
            let guidance = match kind {
                UnitKind::Service => format!(
                    "Service is '{}'. Inspect it with: journalctl -u {}.service -n 50",
                    state,
                    runtime::unit_name(&job.project)
                ),
                UnitKind::Container => format!(
                    "Container is not running. Inspect it with: docker logs {}",
                    runtime::unit_name(&job.project)
                ),
            };
            let err = OpError::command_failed("Verify", 1, &guidance);
            return self.settle(job, Err(err));
        }
        job.advance(Stage::Complete)?;

        let unit = DeployedUnit {
            host_id: job.host.clone(),
            name: runtime::unit_name(&job.project),
            kind,
            port: self.listening_port(job),
            source: job.source.locator.clone(),
            deployed_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(err) = self.inventory.register_unit(unit).await {
            self.logger.warn(
                "Failed to register deployed unit",
                Some(&serde_json::json!({"job": job.id, "error": err.message})),
            );
        }
        self.logger.info(
            "Deployment complete",
            Some(&serde_json::json!({"job": job.id, "host": job.host, "project": job.project})),
        );
        Ok(())
    }

    /// Ends the job with instructions instead of remote changes.
    pub fn finish_manual(&self, job: &mut DeploymentJob) -> Result<String, OpError> {
        let previous = job.mode;
        job.mode = Some(DeployMode::Manual);
        if let Err(err) = job.advance(Stage::Complete) {
            job.mode = previous;
            return Err(err);
        }
        let image = match job.source.kind {
            SourceKind::Image => Some(job.source.locator.as_str()),
            _ => None,
        };
        Ok(runtime::manual_instructions(
            job.descriptor.as_ref(),
            &job.workdir,
            image,
            self.settings.deploy_port,
        ))
    }
}

fn exec_or_reject(descriptor: &ProjectDescriptor) -> Result<String, OpError> {
    runtime::exec_line(descriptor).ok_or_else(|| {
        OpError::validation("No entry point to run as a service")
            .with_hint("Choose manual instructions or a container instead.")
    })
}
