use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    agent::{
        admin::DomainInfo,
        job::{Job, JobOutcome},
        notify::Notification,
    },
    constants::{UPDATER_TOOL, UPDATES_AVAILABLE_FEATURE},
    controller::{
        Reconciler,
        context::{Intent, TrayContext},
    },
    error::TrayError,
    event::{Event, EventKind, EventPattern, pattern::patterns},
};

/// Only templates, standalones and the admin domain install updates.
fn eligible(info: &DomainInfo) -> bool {
    info.updateable || info.is_admin()
}

/// Set of domains with pending updates.
#[derive(Debug, Default, PartialEq)]
pub struct UpdateTracker {
    members: BTreeSet<String>,
    updateable: BTreeSet<String>,
}

impl UpdateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|s| s.as_str())
    }

    pub fn contains(&self, vm: &str) -> bool {
        self.members.contains(vm)
    }

    fn set(&mut self, ctx: &TrayContext, vm: &str) {
        if !self.updateable.contains(vm) {
            debug!("ignoring update flag on {}", vm);
            return;
        }
        if self.members.insert(vm.to_string()) {
            ctx.notify(Notification::new(
                format!("New updates are available for {}", vm),
                "",
            ));
        }
    }

    async fn add(&mut self, ctx: &TrayContext, vm: &str) {
        let info = match ctx.api.domain(vm).await {
            Ok(info) => info,
            Err(e) => {
                debug!("skipping {}: {}", vm, e);
                return;
            }
        };
        if !eligible(&info) {
            return;
        }
        self.updateable.insert(vm.to_string());
        if info.updates_available() {
            self.members.insert(vm.to_string());
        }
    }
}

#[async_trait]
impl Reconciler for UpdateTracker {
    fn name(&self) -> &'static str {
        "updates"
    }

    fn subscriptions(&self) -> Vec<EventPattern> {
        patterns(&[
            "domain-feature-set:*",
            "domain-feature-delete:*",
            "feature-set:*",
            "feature-delete:*",
            "domain-add",
            "domain-delete",
        ])
    }

    async fn seed(&mut self, ctx: &TrayContext) -> Result<(), TrayError> {
        let infos = ctx.api.list_domains().await.map_err(TrayError::provider)?;

        self.updateable = infos
            .iter()
            .filter(|i| eligible(i))
            .map(|i| i.name.clone())
            .collect();
        self.members = infos
            .iter()
            .filter(|i| eligible(i) && i.updates_available())
            .map(|i| i.name.clone())
            .collect();

        info!("{} domains have updates available", self.members.len());
        Ok(())
    }

    async fn apply_event(&mut self, ctx: &TrayContext, event: &Event) -> Result<()> {
        let Some(vm) = event.vm() else {
            return Ok(());
        };
        let vm = vm.to_string();

        match &event.kind {
            EventKind::FeatureSet(feature) if feature == UPDATES_AVAILABLE_FEATURE => {
                if event.attr_truthy("value") {
                    self.set(ctx, &vm);
                } else {
                    self.members.remove(&vm);
                }
            }
            EventKind::FeatureDelete(feature) if feature == UPDATES_AVAILABLE_FEATURE => {
                self.members.remove(&vm);
            }
            EventKind::DomainAdd => self.add(ctx, &vm).await,
            EventKind::DomainDelete => {
                self.members.remove(&vm);
                self.updateable.remove(&vm);
            }
            _ => {}
        }

        Ok(())
    }

    async fn handle_intent(&mut self, ctx: &TrayContext, intent: Intent) -> Result<()> {
        match intent {
            Intent::LaunchUpdater => ctx.submit(Job::Launch {
                tool: UPDATER_TOOL.to_string(),
                vm: None,
            }),
            intent => anyhow::bail!("updates widget does not handle {}", intent),
        }
    }

    fn apply_outcome(&mut self, _ctx: &TrayContext, outcome: JobOutcome) {
        if let JobOutcome::Launch { tool, result: Err(e) } = outcome {
            warn!("failed to launch {}: {}", tool, e);
        }
    }

    async fn view(&mut self, _ctx: &TrayContext) -> Vec<String> {
        if self.members.is_empty() {
            return vec!["No updates available".to_string()];
        }

        let mut lines = vec![format!(
            "Updates available for {} qubes",
            self.members.len()
        )];
        lines.extend(self.members.iter().map(|vm| format!("  {}", vm)));
        lines
    }
}
