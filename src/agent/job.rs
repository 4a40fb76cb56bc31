use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    agent::{
        command::{CommandExecutor, DomainCommand},
        notify::{Notification, Notifier},
    },
    error::ApiError,
    model::DeviceKey,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachPlan {
    pub device: DeviceKey,
    pub description: String,
    /// Every domain holding the device when the plan was made.
    pub holders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachPlan {
    pub detach: DetachPlan,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Domain { vm: String, command: DomainCommand },
    UnpauseAll { vms: Vec<String> },
    Attach(AttachPlan),
    Detach(DetachPlan),
    Launch { tool: String, vm: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOutcome {
    pub device: DeviceKey,
    /// Domains the device was confirmed detached from, in order.
    pub detached: Vec<String>,
    /// The step that aborted the remaining detaches.
    pub failed_detach: Option<(String, ApiError)>,
    /// Attach target and result, when an attach was attempted.
    pub attach: Option<(String, Result<(), ApiError>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Domain {
        vm: String,
        command: DomainCommand,
        result: Result<(), ApiError>,
    },
    UnpauseAll {
        failed: Vec<String>,
    },
    Device(DeviceOutcome),
    Launch {
        tool: String,
        result: Result<(), ApiError>,
    },
}

/// Handle to the single background task running user-initiated commands.
#[derive(Clone)]
pub struct CommandWorker {
    tx: Sender<Job>,
}

impl CommandWorker {
    /// A worker handle whose jobs are consumed by the caller.
    pub fn channel() -> (Self, Receiver<Job>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }

    pub fn spawn(
        executor: Arc<dyn CommandExecutor>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, mpsc::UnboundedReceiver<JobOutcome>, JoinHandle<()>) {
        let (worker, rx) = Self::channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            info!("command worker started");
            while let Ok(job) = rx.recv().await {
                let outcome = execute(executor.as_ref(), notifier.as_ref(), job).await;
                if outcome_tx.send(outcome).is_err() {
                    break;
                }
            }
            info!("command worker stopped");
        });

        (worker, outcome_rx, handle)
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        self.tx
            .try_send(job)
            .map_err(|e| anyhow!("command worker is gone: {}", e))
    }
}

pub async fn execute(executor: &dyn CommandExecutor, notifier: &dyn Notifier, job: Job) -> JobOutcome {
    match job {
        Job::Domain { vm, command } => {
            let result = run_domain(executor, notifier, &vm, &command).await;
            JobOutcome::Domain {
                vm,
                command,
                result,
            }
        }
        Job::UnpauseAll { vms } => {
            let mut failed = vec![];
            for vm in vms {
                if run_domain(executor, notifier, &vm, &DomainCommand::Unpause)
                    .await
                    .is_err()
                {
                    failed.push(vm);
                }
            }
            JobOutcome::UnpauseAll { failed }
        }
        Job::Attach(plan) => JobOutcome::Device(attach(executor, notifier, plan).await),
        Job::Detach(plan) => JobOutcome::Device(detach(executor, notifier, &plan).await),
        Job::Launch { tool, vm } => {
            let result = executor.launch(&tool, vm.as_deref()).await;
            if let Err(e) = &result {
                notifier.notify(Notification::error(
                    "Error",
                    format!("Failed to launch {}: {}", tool, e),
                ));
            }
            JobOutcome::Launch { tool, result }
        }
    }
}

async fn run_domain(
    executor: &dyn CommandExecutor,
    notifier: &dyn Notifier,
    vm: &str,
    command: &DomainCommand,
) -> Result<(), ApiError> {
    let result = executor.domain(vm, command).await;
    if let Err(e) = &result {
        warn!("{} {} failed: {}", command, vm, e);
        notifier.notify(Notification::error(
            "Error",
            format!("The following error occurred on an attempt to {} qube {}:\n{}", command, vm, e),
        ));
    }
    result
}

/// Detaches the device from every holder in order. The first failure stops
/// the remaining detaches; completed ones are not rolled back.
pub async fn detach(
    executor: &dyn CommandExecutor,
    notifier: &dyn Notifier,
    plan: &DetachPlan,
) -> DeviceOutcome {
    let assignment = plan.device.assignment(false);
    let mut outcome = DeviceOutcome {
        device: plan.device.clone(),
        detached: vec![],
        failed_detach: None,
        attach: None,
    };

    for vm in &plan.holders {
        notifier.notify(Notification::new(
            "Detaching device",
            format!("Detaching {} from {}", plan.description, vm),
        ));

        match executor.detach(vm, plan.device.class, &assignment).await {
            Ok(()) => outcome.detached.push(vm.clone()),
            Err(e) => {
                notifier.notify(Notification::error(
                    "Error",
                    format!(
                        "Detaching device {} from {} failed. Error: {}",
                        plan.description, vm, e
                    ),
                ));
                outcome.failed_detach = Some((vm.clone(), e));
                break;
            }
        }
    }

    outcome
}

/// Moves the device to `plan.target`: detach from all holders, settle, attach.
/// Nothing is retried.
pub async fn attach(
    executor: &dyn CommandExecutor,
    notifier: &dyn Notifier,
    plan: AttachPlan,
) -> DeviceOutcome {
    let mut outcome = detach(executor, notifier, &plan.detach).await;
    if outcome.failed_detach.is_some() {
        return outcome;
    }

    if !outcome.detached.is_empty() {
        executor.settle(&plan.detach.device).await;
    }

    let device = &plan.detach.device;
    let result = executor
        .attach(&plan.target, device.class, &device.assignment(false))
        .await;

    match &result {
        Ok(()) => notifier.notify(Notification::new(
            "Attaching device",
            format!("Attaching {} to {}", plan.detach.description, plan.target),
        )),
        Err(e) => notifier.notify(Notification::error(
            "Error",
            format!(
                "Attaching device {} to {} failed. Error: {}",
                plan.detach.description, plan.target, e
            ),
        )),
    }

    outcome.attach = Some((plan.target, result));
    outcome
}
