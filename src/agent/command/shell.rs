use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{
    agent::command::{CommandExecutor, DomainCommand},
    config::CommandsConfig,
    error::ApiError,
    model::{DeviceAssignment, DeviceClass, DeviceKey},
};

/// Runs the admin command line tools configured in `[commands]`.
pub struct ShellCommandExecutor {
    commands: CommandsConfig,
    settle_delay: Duration,
}

impl ShellCommandExecutor {
    pub fn new(commands: CommandsConfig, settle_delay: Duration) -> Self {
        Self {
            commands,
            settle_delay,
        }
    }

    fn domain_template(&self, command: &DomainCommand) -> &[String] {
        match command {
            DomainCommand::Start => &self.commands.start,
            DomainCommand::Shutdown => &self.commands.shutdown,
            DomainCommand::Kill => &self.commands.kill,
            DomainCommand::Pause => &self.commands.pause,
            DomainCommand::Unpause => &self.commands.unpause,
            DomainCommand::RunService(_) => &self.commands.run_service,
        }
    }
}

/// Substitutes `{name}` placeholders. An argument that is exactly
/// `{persistent}` expands to `--persistent` or disappears.
pub fn expand(template: &[String], vars: &[(&str, &str)], persistent: bool) -> Vec<String> {
    template
        .iter()
        .filter_map(|arg| {
            if arg == "{persistent}" {
                return persistent.then(|| "--persistent".to_string());
            }

            let mut arg = arg.clone();
            for (name, value) in vars {
                arg = arg.replace(&format!("{{{}}}", name), value);
            }
            Some(arg)
        })
        .collect()
}

async fn run(args: Vec<String>) -> Result<(), ApiError> {
    let Some((program, rest)) = args.split_first() else {
        return Err(ApiError::Unavailable("empty command template".to_string()));
    };

    debug!("running {:?}", args);

    let output = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ApiError::Unavailable(format!("{}: {}", program, e)))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        return Err(ApiError::Rejected(format!("{} exited with {}", program, output.status)));
    }

    Err(ApiError::Rejected(stderr))
}

fn tool_args(commands: &CommandsConfig, tool: &str, vm: Option<&str>) -> Result<Vec<String>, ApiError> {
    let Some(template) = commands.tools.get(tool) else {
        return Err(ApiError::Unavailable(format!("no command configured for {}", tool)));
    };

    match vm {
        Some(vm) => Ok(expand(template, &[("vm", vm)], false)),
        None if template.iter().any(|arg| arg.contains("{vm}")) => {
            Err(ApiError::Rejected(format!("{} needs a domain", tool)))
        }
        None => Ok(template.clone()),
    }
}

fn device_vars<'a>(
    vm: &'a str,
    class: &'a str,
    assignment: &'a DeviceAssignment,
) -> [(&'a str, &'a str); 4] {
    [
        ("vm", vm),
        ("class", class),
        ("backend", assignment.backend.as_str()),
        ("ident", assignment.ident.as_str()),
    ]
}

#[async_trait]
impl CommandExecutor for ShellCommandExecutor {
    async fn domain(&self, vm: &str, command: &DomainCommand) -> Result<(), ApiError> {
        let service = match command {
            DomainCommand::RunService(service) => service.as_str(),
            _ => "",
        };

        let args = expand(
            self.domain_template(command),
            &[("vm", vm), ("service", service)],
            false,
        );
        run(args).await
    }

    async fn attach(
        &self,
        vm: &str,
        class: DeviceClass,
        assignment: &DeviceAssignment,
    ) -> Result<(), ApiError> {
        let vars = device_vars(vm, class.as_str(), assignment);
        run(expand(&self.commands.attach, &vars, assignment.persistent)).await
    }

    async fn detach(
        &self,
        vm: &str,
        class: DeviceClass,
        assignment: &DeviceAssignment,
    ) -> Result<(), ApiError> {
        let vars = device_vars(vm, class.as_str(), assignment);
        run(expand(&self.commands.detach, &vars, assignment.persistent)).await
    }

    async fn settle(&self, _device: &DeviceKey) {
        tokio::time::sleep(self.settle_delay).await;
    }

    async fn launch(&self, tool: &str, vm: Option<&str>) -> Result<(), ApiError> {
        let args = tool_args(&self.commands, tool, vm)?;
        let Some((program, rest)) = args.split_first() else {
            return Err(ApiError::Unavailable(format!("empty command for {}", tool)));
        };

        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| ApiError::Unavailable(format!("{}: {}", program, e)))?;

        let tool = tool.to_string();
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                warn!("failed to wait for {}: {}", tool, e);
            }
        });

        Ok(())
    }
}
