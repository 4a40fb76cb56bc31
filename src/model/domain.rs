use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    Transient,
    Running,
    Paused,
    Halted,
    Crashed,
    Unknown,
}

impl PowerState {
    /// The backend reports these as "running" for listing purposes.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            PowerState::Running | PowerState::Paused | PowerState::Transient
        )
    }
}

impl FromStr for PowerState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Transient" => PowerState::Transient,
            "Running" => PowerState::Running,
            "Paused" => PowerState::Paused,
            "Halted" => PowerState::Halted,
            "Crashed" => PowerState::Crashed,
            _ => PowerState::Unknown,
        })
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainClass {
    AdminVM,
    TemplateVM,
    AppVM,
    DispVM,
    StandaloneVM,
}

impl DomainClass {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AdminVM" => Some(DomainClass::AdminVM),
            "TemplateVM" => Some(DomainClass::TemplateVM),
            "AppVM" => Some(DomainClass::AppVM),
            "DispVM" => Some(DomainClass::DispVM),
            "StandaloneVM" => Some(DomainClass::StandaloneVM),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageUsage {
    /// Private volume usage in bytes.
    pub current: u64,
    /// Private volume capacity in bytes.
    pub max: u64,
}

impl StorageUsage {
    pub fn ratio(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        self.current as f64 / self.max as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    pub name: String,
    pub state: PowerState,
    /// `None` for a disposable that has not finished being created.
    pub class: Option<DomainClass>,
    pub template: Option<String>,
    pub netvm: Option<String>,
    pub label: Option<String>,
    pub memory_kb: u64,
    pub cpu_usage: u8,
    pub storage: StorageUsage,
    pub updateable: bool,
    pub updates_available: bool,
    pub outdated: bool,
    pub last_failure: Option<String>,
    pub display_stale: bool,
}

impl Domain {
    pub fn new(name: impl AsRef<str>, state: PowerState) -> Self {
        Self {
            name: name.as_ref().to_string(),
            state,
            class: None,
            template: None,
            netvm: None,
            label: None,
            memory_kb: 0,
            cpu_usage: 0,
            storage: StorageUsage::default(),
            updateable: false,
            updates_available: false,
            outdated: false,
            last_failure: None,
            display_stale: false,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.class == Some(DomainClass::AdminVM)
    }

    pub fn is_template(&self) -> bool {
        self.class == Some(DomainClass::TemplateVM)
    }

    /// Whether the domain shows up in listings.
    pub fn is_visible(&self) -> bool {
        self.is_admin() || self.state != PowerState::Halted
    }
}

/// Lightweight, owned copy of a domain used in cross listings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VmRef {
    pub name: String,
    pub label: Option<String>,
}

impl VmRef {
    pub fn new(name: impl AsRef<str>, label: Option<String>) -> Self {
        Self {
            name: name.as_ref().to_string(),
            label,
        }
    }
}

impl fmt::Display for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
