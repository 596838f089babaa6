use crate::errors::OpError;
use crate::managers::deploy::DeployManager;
use crate::managers::files::FileFlowManager;
use crate::services::logger::Logger;
use crate::services::token_cache::TokenCache;
use crate::transport::reply::Reply;
use bytes::Bytes;
use std::sync::Arc;

/// Routes operator events to the file and deployment flows. Incoming
/// action identifiers are resolved through the token cache; outgoing
/// controls are compacted before a reply leaves.
pub struct Dispatcher {
    logger: Logger,
    tokens: Arc<TokenCache>,
    files: Arc<FileFlowManager>,
    deploy: Arc<DeployManager>,
}

impl Dispatcher {
    pub fn new(
        logger: Logger,
        tokens: Arc<TokenCache>,
        files: Arc<FileFlowManager>,
        deploy: Arc<DeployManager>,
    ) -> Self {
        Self {
            logger: logger.child("dispatch"),
            tokens,
            files,
            deploy,
        }
    }

    pub fn files(&self) -> &FileFlowManager {
        &self.files
    }

    pub fn deploy(&self) -> &DeployManager {
        &self.deploy
    }

    pub async fn on_action(&self, operator: &str, action: &str) -> Reply {
        let resolved = self.tokens.resolve(action.trim());
        if TokenCache::is_token(&resolved) {
            self.logger.info(
                "Stale action token",
                Some(&serde_json::json!({"operator": operator, "token": resolved})),
            );
            let err = OpError::expired("This button has expired or is unknown")
                .with_hint("Start again from the host list.");
            return self.finish(Reply::text(err.operator_text()).button("Hosts", "fs:hosts"));
        }
        self.logger.debug(
            "Action",
            Some(&serde_json::json!({"operator": operator, "action": resolved})),
        );
        let reply = match resolved.split_once(':') {
            Some(("fs", rest)) => self.files.handle_action(operator, rest).await,
            Some(("dep", rest)) => self.deploy.handle_action(operator, rest).await,
            _ if resolved == "menu" || resolved == "start" => self.files.hosts_menu().await,
            _ => Reply::text(format!("Unknown action: {}", resolved)).button("Hosts", "fs:hosts"),
        };
        self.finish(reply)
    }

    /// Free text goes to the file flow first, then to a deployment waiting
    /// for a locator. `None` means nobody asked for text.
    pub async fn on_text(&self, operator: &str, text: &str) -> Option<Reply> {
        if let Some(reply) = self.files.handle_text(operator, text).await {
            return Some(self.finish(reply));
        }
        if let Some(reply) = self.deploy.handle_text(operator, text).await {
            return Some(self.finish(reply));
        }
        self.logger.debug(
            "Ignored text",
            Some(&serde_json::json!({"operator": operator})),
        );
        None
    }

    pub async fn on_upload(&self, operator: &str, name: &str, data: Bytes) -> Option<Reply> {
        if let Some(reply) = self.files.handle_upload(operator, name, data.clone()).await {
            return Some(self.finish(reply));
        }
        if let Some(reply) = self.deploy.handle_upload(operator, name, data).await {
            return Some(self.finish(reply));
        }
        self.logger.debug(
            "Ignored upload",
            Some(&serde_json::json!({"operator": operator, "name": name})),
        );
        None
    }

    fn finish(&self, reply: Reply) -> Reply {
        reply.compact(&self.tokens)
    }
}
