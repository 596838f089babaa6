use crate::constants::{deploy, limits, network, tokens};
use crate::utils::paths::resolve_inventory_path;
use std::path::PathBuf;

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

fn env_usize(key: &str) -> Option<usize> {
    env_u64(key).map(|v| v as usize)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Process-wide knobs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub inventory_path: PathBuf,
    pub exec_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub token_budget: usize,
    pub token_capacity: usize,
    pub token_ttl_ms: u64,
    pub page_size: usize,
    pub batch_concurrency: usize,
    pub deploy_root: String,
    pub deploy_port: u16,
    pub max_download_bytes: u64,
    pub search_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            inventory_path: resolve_inventory_path(),
            exec_timeout_ms: network::TIMEOUT_SSH_EXEC_DEFAULT_MS,
            connect_timeout_ms: network::TIMEOUT_SSH_CONNECT_MS,
            token_budget: tokens::PAYLOAD_BUDGET_BYTES,
            token_capacity: tokens::DEFAULT_CAPACITY,
            token_ttl_ms: tokens::DEFAULT_TTL_MS,
            page_size: limits::PAGE_SIZE,
            batch_concurrency: 1,
            deploy_root: deploy::DEFAULT_ROOT.to_string(),
            deploy_port: deploy::EXTERNAL_PORT,
            max_download_bytes: limits::MAX_DOWNLOAD_BYTES,
            search_limit: limits::SEARCH_LIMIT,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            inventory_path: defaults.inventory_path,
            exec_timeout_ms: env_u64("HOSTDECK_EXEC_TIMEOUT_MS").unwrap_or(defaults.exec_timeout_ms),
            connect_timeout_ms: env_u64("HOSTDECK_CONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.connect_timeout_ms),
            token_budget: env_usize("HOSTDECK_TOKEN_BUDGET").unwrap_or(defaults.token_budget),
            token_capacity: env_usize("HOSTDECK_TOKEN_CAPACITY").unwrap_or(defaults.token_capacity),
            token_ttl_ms: env_u64("HOSTDECK_TOKEN_TTL_MS").unwrap_or(defaults.token_ttl_ms),
            page_size: env_usize("HOSTDECK_PAGE_SIZE").unwrap_or(defaults.page_size),
            batch_concurrency: env_usize("HOSTDECK_BATCH_CONCURRENCY")
                .unwrap_or(defaults.batch_concurrency),
            deploy_root: env_string("HOSTDECK_DEPLOY_ROOT")
                .map(|v| v.trim_end_matches('/').to_string())
                .filter(|v| v.starts_with('/'))
                .unwrap_or(defaults.deploy_root),
            deploy_port: env_u64("HOSTDECK_DEPLOY_PORT")
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(defaults.deploy_port),
            max_download_bytes: env_u64("HOSTDECK_MAX_DOWNLOAD_BYTES")
                .unwrap_or(defaults.max_download_bytes),
            search_limit: env_usize("HOSTDECK_SEARCH_LIMIT").unwrap_or(defaults.search_limit),
        }
    }
}

