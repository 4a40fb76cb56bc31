pub mod file;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    constants::UPDATES_AVAILABLE_FEATURE,
    error::ApiError,
    model::{DeviceClass, DeviceKey, DomainClass, Pool, PowerState, StorageUsage},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub name: String,
    #[serde(default)]
    pub class: Option<DomainClass>,
    pub state: PowerState,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub netvm: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub updateable: bool,
    #[serde(default)]
    pub features: BTreeMap<String, String>,
    #[serde(default)]
    pub storage: StorageUsage,
}

impl DomainInfo {
    pub fn new(name: impl AsRef<str>, class: DomainClass, state: PowerState) -> Self {
        Self {
            name: name.as_ref().to_string(),
            class: Some(class),
            state,
            template: None,
            netvm: None,
            label: None,
            updateable: false,
            features: BTreeMap::new(),
            storage: StorageUsage::default(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.class == Some(DomainClass::AdminVM)
    }

    pub fn updates_available(&self) -> bool {
        self.features
            .get(UPDATES_AVAILABLE_FEATURE)
            .is_some_and(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub backend: String,
    pub ident: String,
    #[serde(default)]
    pub description: String,
}

impl DeviceInfo {
    pub fn key(&self, class: DeviceClass) -> DeviceKey {
        DeviceKey::new(&self.backend, class, &self.ident)
    }
}

/// Read side of the management api: point-in-time queries over domains,
/// their devices and the storage pools.
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn list_domains(&self) -> Result<Vec<DomainInfo>, ApiError>;

    async fn domain(&self, name: &str) -> Result<DomainInfo, ApiError>;

    async fn power_state(&self, name: &str) -> Result<PowerState, ApiError> {
        Ok(self.domain(name).await?.state)
    }

    /// Devices of `class` exposed by the backend domain `domain`.
    async fn devices(&self, domain: &str, class: DeviceClass) -> Result<Vec<DeviceInfo>, ApiError>;

    /// Devices of `class` currently attached to the frontend domain `domain`.
    async fn attached_devices(
        &self,
        domain: &str,
        class: DeviceClass,
    ) -> Result<Vec<DeviceInfo>, ApiError>;

    async fn pools(&self) -> Result<Vec<Pool>, ApiError>;
}
