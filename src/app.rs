use crate::errors::OpError;
use crate::managers::deploy::DeployManager;
use crate::managers::dispatcher::Dispatcher;
use crate::managers::files::FileFlowManager;
use crate::managers::ssh::SshExecutor;
use crate::services::inventory::{FileInventory, HostInventory};
use crate::services::logger::Logger;
use crate::services::remote::RemoteExecutor;
use crate::services::settings::Settings;
use crate::services::token_cache::TokenCache;
use std::sync::Arc;

pub struct App {
    pub logger: Logger,
    pub settings: Arc<Settings>,
    pub tokens: Arc<TokenCache>,
    pub inventory: Arc<dyn HostInventory>,
    pub dispatcher: Arc<Dispatcher>,
}

impl App {
    /// Production wiring: inventory file plus pooled SSH sessions.
    pub fn initialize(logger: Logger, settings: Settings) -> Result<Self, OpError> {
        let inventory: Arc<dyn HostInventory> = Arc::new(FileInventory::load(
            logger.clone(),
            settings.inventory_path.clone(),
        )?);
        let executor: Arc<dyn RemoteExecutor> =
            Arc::new(SshExecutor::new(logger.clone(), inventory.clone(), &settings));
        Ok(Self::with_parts(logger, settings, inventory, executor))
    }

    pub fn with_parts(
        logger: Logger,
        settings: Settings,
        inventory: Arc<dyn HostInventory>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        let settings = Arc::new(settings);
        let tokens = Arc::new(TokenCache::from_settings(logger.clone(), &settings));
        let files = Arc::new(FileFlowManager::new(
            logger.clone(),
            settings.clone(),
            executor.clone(),
            inventory.clone(),
        ));
        let deploy = Arc::new(DeployManager::new(
            logger.clone(),
            settings.clone(),
            executor,
            inventory.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(logger.clone(), tokens.clone(), files, deploy));
        logger.info(
            "Initialized",
            Some(&serde_json::json!({
                "inventory": settings.inventory_path.display().to_string(),
                "deploy_root": settings.deploy_root,
                "token_budget": settings.token_budget,
                "page_size": settings.page_size,
                "batch_concurrency": settings.batch_concurrency,
            })),
        );
        Self {
            logger,
            settings,
            tokens,
            inventory,
            dispatcher,
        }
    }

    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "log": self.logger.stats(),
            "tokens": self.tokens.stats(),
            "file_sessions": self.dispatcher.files().active_sessions(),
            "deploy_flows": self.dispatcher.deploy().active_flows(),
        })
    }
}
