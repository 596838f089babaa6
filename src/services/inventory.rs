use crate::constants::network::SSH_DEFAULT_PORT;
use crate::errors::OpError;
use crate::services::logger::Logger;
use crate::utils::fs_atomic::{read_json, write_json};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;

fn default_port() -> u16 {
    SSH_DEFAULT_PORT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostAuth {
    Password { password: String },
    PrivateKey {
        key_path: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub auth: HostAuth,
    #[serde(default)]
    pub host_key_sha256: Option<String>,
}

impl HostRecord {
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Service,
    Container,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedUnit {
    pub host_id: String,
    pub name: String,
    pub kind: UnitKind,
    pub port: u16,
    pub source: String,
    pub deployed_at: String,
}

/// Host inventory and credential store. Read-only apart from registering
/// units after a successful deployment.
#[async_trait]
pub trait HostInventory: Send + Sync {
    async fn hosts(&self) -> Result<Vec<HostRecord>, OpError>;

    async fn host(&self, id: &str) -> Result<HostRecord, OpError> {
        self.hosts()
            .await?
            .into_iter()
            .find(|host| host.id == id)
            .ok_or_else(|| OpError::not_found(format!("Unknown host: {}", id)))
    }

    async fn register_unit(&self, unit: DeployedUnit) -> Result<(), OpError>;

    async fn units(&self, host_id: &str) -> Result<Vec<DeployedUnit>, OpError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct InventoryDocument {
    #[serde(default)]
    hosts: Vec<HostRecord>,
    #[serde(default)]
    units: Vec<DeployedUnit>,
}

impl InventoryDocument {
    fn upsert_unit(&mut self, unit: DeployedUnit) {
        self.units
            .retain(|u| !(u.host_id == unit.host_id && u.name == unit.name));
        self.units.push(unit);
    }
}

pub struct MemoryInventory {
    doc: RwLock<InventoryDocument>,
}

impl MemoryInventory {
    pub fn new(hosts: Vec<HostRecord>) -> Self {
        Self {
            doc: RwLock::new(InventoryDocument {
                hosts,
                units: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl HostInventory for MemoryInventory {
    async fn hosts(&self) -> Result<Vec<HostRecord>, OpError> {
        Ok(self.doc.read().unwrap_or_else(|e| e.into_inner()).hosts.clone())
    }

    async fn register_unit(&self, unit: DeployedUnit) -> Result<(), OpError> {
        self.doc
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .upsert_unit(unit);
        Ok(())
    }

    async fn units(&self, host_id: &str) -> Result<Vec<DeployedUnit>, OpError> {
        Ok(self
            .doc
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .units
            .iter()
            .filter(|u| u.host_id == host_id)
            .cloned()
            .collect())
    }
}

/// JSON document on disk: `{"hosts": [...], "units": [...]}`.
pub struct FileInventory {
    logger: Logger,
    path: PathBuf,
    doc: RwLock<InventoryDocument>,
}

impl FileInventory {
    pub fn load(logger: Logger, path: PathBuf) -> Result<Self, OpError> {
        let logger = logger.child("inventory");
        let doc = match read_json::<InventoryDocument>(&path)? {
            Some(doc) => doc,
            None => {
                logger.warn(
                    "Inventory file not found, starting empty",
                    Some(&serde_json::json!({"path": path.display().to_string()})),
                );
                InventoryDocument::default()
            }
        };
        logger.info(
            "Inventory loaded",
            Some(&serde_json::json!({"hosts": doc.hosts.len(), "units": doc.units.len()})),
        );
        Ok(Self {
            logger,
            path,
            doc: RwLock::new(doc),
        })
    }

    fn persist(&self, doc: &InventoryDocument) -> Result<(), OpError> {
        write_json(&self.path, doc, 0o600)
    }
}

#[async_trait]
impl HostInventory for FileInventory {
    async fn hosts(&self) -> Result<Vec<HostRecord>, OpError> {
        Ok(self.doc.read().unwrap_or_else(|e| e.into_inner()).hosts.clone())
    }

    async fn register_unit(&self, unit: DeployedUnit) -> Result<(), OpError> {
        let snapshot = {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            doc.upsert_unit(unit.clone());
            doc.clone()
        };
        self.persist(&snapshot)?;
        self.logger.info(
            "Registered deployed unit",
            Some(&serde_json::json!({"host": unit.host_id, "name": unit.name})),
        );
        Ok(())
    }

    async fn units(&self, host_id: &str) -> Result<Vec<DeployedUnit>, OpError> {
        Ok(self
            .doc
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .units
            .iter()
            .filter(|u| u.host_id == host_id)
            .cloned()
            .collect())
    }
}
