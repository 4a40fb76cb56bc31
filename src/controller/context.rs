use std::{fmt, sync::Arc};

use anyhow::{Result, bail};

use crate::{
    agent::{
        admin::AdminApi,
        command::DomainCommand,
        job::{CommandWorker, Job},
        notify::{Notification, Notifier},
    },
    constants::UNPAUSE_ALL_ACTION,
    model::{DeviceClass, DeviceKey},
};

#[derive(Clone)]
pub struct TrayContext {
    pub api: Arc<dyn AdminApi>,
    pub notifier: Arc<dyn Notifier>,
    pub worker: CommandWorker,
}

impl TrayContext {
    pub fn new(api: Arc<dyn AdminApi>, notifier: Arc<dyn Notifier>, worker: CommandWorker) -> Self {
        Self {
            api,
            notifier,
            worker,
        }
    }

    pub fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    pub fn withdraw(&self, tag: &str) {
        self.notifier.withdraw(tag);
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        self.worker.submit(job)
    }
}

/// A user request coming from the control channel or a notification action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Domain { vm: String, command: DomainCommand },
    UnpauseAll,
    Attach { device: DeviceKey, vm: String },
    Detach { device: DeviceKey },
    Toggle { device: DeviceKey, vm: String },
    LaunchUpdater,
    /// A configured helper tool, optionally about one domain.
    Launch { tool: String, vm: Option<String> },
    Status,
}

fn device_arg(class: Option<&str>, reference: Option<&str>) -> Result<DeviceKey> {
    let (Some(class), Some(reference)) = (class, reference) else {
        bail!("expected <class> <backend:ident>");
    };
    DeviceKey::parse(class.parse::<DeviceClass>()?, reference)
}

impl Intent {
    /// Parses one control line, e.g. `start work`, `attach usb sys-usb:2-1 work`.
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            bail!("empty intent");
        };

        let intent = match verb {
            "start" | "shutdown" | "kill" | "pause" | "unpause" => {
                let Some(vm) = words.next() else {
                    bail!("{} needs a domain name", verb);
                };
                let command = match verb {
                    "start" => DomainCommand::Start,
                    "shutdown" => DomainCommand::Shutdown,
                    "kill" => DomainCommand::Kill,
                    "pause" => DomainCommand::Pause,
                    _ => DomainCommand::Unpause,
                };
                Intent::Domain {
                    vm: vm.to_string(),
                    command,
                }
            }
            "run-service" => {
                let (Some(vm), Some(service)) = (words.next(), words.next()) else {
                    bail!("run-service needs a domain name and a service");
                };
                Intent::Domain {
                    vm: vm.to_string(),
                    command: DomainCommand::RunService(service.to_string()),
                }
            }
            UNPAUSE_ALL_ACTION => Intent::UnpauseAll,
            "attach" | "toggle" => {
                let device = device_arg(words.next(), words.next())?;
                let Some(vm) = words.next() else {
                    bail!("{} needs a target domain", verb);
                };
                let vm = vm.to_string();
                if verb == "attach" {
                    Intent::Attach { device, vm }
                } else {
                    Intent::Toggle { device, vm }
                }
            }
            "detach" => Intent::Detach {
                device: device_arg(words.next(), words.next())?,
            },
            "update" => Intent::LaunchUpdater,
            "launch" => {
                let Some(tool) = words.next() else {
                    bail!("launch needs a tool name");
                };
                Intent::Launch {
                    tool: tool.to_string(),
                    vm: words.next().map(|vm| vm.to_string()),
                }
            }
            "status" => Intent::Status,
            _ => bail!("unknown intent: {}", verb),
        };

        if let Some(extra) = words.next() {
            bail!("unexpected argument: {}", extra);
        }

        Ok(intent)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Domain { vm, command } => write!(f, "{} {}", command, vm),
            Intent::UnpauseAll => f.write_str(UNPAUSE_ALL_ACTION),
            Intent::Attach { device, vm } => write!(f, "attach {} {} {}", device.class, device, vm),
            Intent::Detach { device } => write!(f, "detach {} {}", device.class, device),
            Intent::Toggle { device, vm } => write!(f, "toggle {} {} {}", device.class, device, vm),
            Intent::LaunchUpdater => f.write_str("update"),
            Intent::Launch { tool, vm: Some(vm) } => write!(f, "launch {} {}", tool, vm),
            Intent::Launch { tool, vm: None } => write!(f, "launch {}", tool),
            Intent::Status => f.write_str("status"),
        }
    }
}
