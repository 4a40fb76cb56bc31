pub mod shell;

use std::{fmt, time::Duration};

use async_trait::async_trait;

use crate::{
    constants::DEFAULT_SETTLE_DELAY_MS,
    error::ApiError,
    model::{DeviceAssignment, DeviceClass, DeviceKey},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainCommand {
    Start,
    Shutdown,
    Kill,
    Pause,
    Unpause,
    RunService(String),
}

impl DomainCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            DomainCommand::Start => "start",
            DomainCommand::Shutdown => "shutdown",
            DomainCommand::Kill => "kill",
            DomainCommand::Pause => "pause",
            DomainCommand::Unpause => "unpause",
            DomainCommand::RunService(_) => "run-service",
        }
    }
}

impl fmt::Display for DomainCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainCommand::RunService(service) => write!(f, "run-service {}", service),
            _ => f.write_str(self.verb()),
        }
    }
}

/// Write side of the management api.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn domain(&self, vm: &str, command: &DomainCommand) -> Result<(), ApiError>;

    async fn attach(
        &self,
        vm: &str,
        class: DeviceClass,
        assignment: &DeviceAssignment,
    ) -> Result<(), ApiError>;

    async fn detach(
        &self,
        vm: &str,
        class: DeviceClass,
        assignment: &DeviceAssignment,
    ) -> Result<(), ApiError>;

    /// Waits until a detached device can be attached elsewhere. Backends
    /// that acknowledge detaches should override the fixed delay.
    async fn settle(&self, _device: &DeviceKey) {
        tokio::time::sleep(Duration::from_millis(DEFAULT_SETTLE_DELAY_MS)).await;
    }

    /// Launches a helper tool (updater, manager) as an opaque process,
    /// optionally about one domain.
    async fn launch(&self, tool: &str, vm: Option<&str>) -> Result<(), ApiError>;
}
