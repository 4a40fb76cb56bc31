use std::{collections::BTreeSet, fmt, str::FromStr};

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Block,
    Mic,
    Usb,
    Pci,
}

impl DeviceClass {
    pub const TRACKED: [DeviceClass; 3] = [DeviceClass::Block, DeviceClass::Mic, DeviceClass::Usb];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Block => "block",
            DeviceClass::Mic => "mic",
            DeviceClass::Usb => "usb",
            DeviceClass::Pci => "pci",
        }
    }
}

impl FromStr for DeviceClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "block" => Ok(DeviceClass::Block),
            "mic" => Ok(DeviceClass::Mic),
            "usb" => Ok(DeviceClass::Usb),
            "pci" => Ok(DeviceClass::Pci),
            _ => bail!("unknown device class: {}", s),
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub backend: String,
    pub class: DeviceClass,
    pub ident: String,
}

impl DeviceKey {
    pub fn new(backend: impl AsRef<str>, class: DeviceClass, ident: impl AsRef<str>) -> Self {
        Self {
            backend: backend.as_ref().to_string(),
            class,
            ident: ident.as_ref().to_string(),
        }
    }

    /// Parses the `backend:ident` form used on the event stream.
    pub fn parse(class: DeviceClass, value: &str) -> Result<Self> {
        let Some((backend, ident)) = value.split_once(':') else {
            return Err(anyhow!("invalid device reference: {}", value));
        };

        if backend.is_empty() || ident.is_empty() {
            bail!("invalid device reference: {}", value);
        }

        Ok(Self::new(backend, class, ident))
    }

    pub fn assignment(&self, persistent: bool) -> DeviceAssignment {
        DeviceAssignment {
            backend: self.backend.clone(),
            ident: self.ident.clone(),
            persistent,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.ident)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAssignment {
    pub backend: String,
    pub ident: String,
    pub persistent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub key: DeviceKey,
    pub description: String,
    pub attachments: BTreeSet<String>,
    pub backend_label: Option<String>,
}

impl Device {
    pub fn new(key: DeviceKey, description: impl AsRef<str>, backend_label: Option<String>) -> Self {
        Self {
            key,
            description: description.as_ref().to_string(),
            attachments: BTreeSet::new(),
            backend_label,
        }
    }

    pub fn is_attached_to(&self, vm: &str) -> bool {
        self.attachments.contains(vm)
    }
}
