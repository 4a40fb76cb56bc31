use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::read_to_string;

use crate::{
    agent::admin::{AdminApi, DeviceInfo, DomainInfo},
    error::ApiError,
    model::{DeviceClass, Pool},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDump {
    #[serde(default)]
    pub domains: Vec<DomainDump>,
    #[serde(default)]
    pub pools: Vec<Pool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainDump {
    #[serde(flatten)]
    pub info: DomainInfo,
    /// Exposed devices, keyed by device class.
    #[serde(default)]
    pub devices: BTreeMap<String, Vec<ExposedDevice>>,
    /// Devices attached to this domain, keyed by device class.
    #[serde(default)]
    pub attached: BTreeMap<String, Vec<DeviceInfo>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposedDevice {
    pub ident: String,
    #[serde(default)]
    pub description: String,
}

/// Admin api backed by a JSON state dump that a bridge process keeps
/// current. The file is re-read on every query.
pub struct FileAdmin {
    path: PathBuf,
}

impl FileAdmin {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<StateDump, ApiError> {
        let content = read_to_string(&self.path)
            .await
            .map_err(|e| ApiError::Unavailable(format!("{}: {}", self.path.display(), e)))?;

        serde_json::from_str(&content).map_err(|e| ApiError::Malformed(e.to_string()))
    }

    async fn find(&self, name: &str) -> Result<DomainDump, ApiError> {
        self.load()
            .await?
            .domains
            .into_iter()
            .find(|d| d.info.name == name)
            .ok_or_else(|| ApiError::NoSuchDomain(name.to_string()))
    }
}

#[async_trait]
impl AdminApi for FileAdmin {
    async fn list_domains(&self) -> Result<Vec<DomainInfo>, ApiError> {
        let dump = self.load().await?;
        Ok(dump.domains.into_iter().map(|d| d.info).collect())
    }

    async fn domain(&self, name: &str) -> Result<DomainInfo, ApiError> {
        Ok(self.find(name).await?.info)
    }

    async fn devices(&self, domain: &str, class: DeviceClass) -> Result<Vec<DeviceInfo>, ApiError> {
        let dump = self.find(domain).await?;
        let exposed = dump.devices.get(class.as_str()).cloned().unwrap_or_default();

        Ok(exposed
            .into_iter()
            .map(|d| DeviceInfo {
                backend: domain.to_string(),
                ident: d.ident,
                description: d.description,
            })
            .collect())
    }

    async fn attached_devices(
        &self,
        domain: &str,
        class: DeviceClass,
    ) -> Result<Vec<DeviceInfo>, ApiError> {
        let dump = self.find(domain).await?;
        Ok(dump.attached.get(class.as_str()).cloned().unwrap_or_default())
    }

    async fn pools(&self) -> Result<Vec<Pool>, ApiError> {
        Ok(self.load().await?.pools)
    }
}
