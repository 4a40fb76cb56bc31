use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::{
    agent::{
        admin::DomainInfo,
        command::DomainCommand,
        job::{Job, JobOutcome},
        notify::{Notification, Priority},
    },
    constants::{PAUSED_NOTIFICATION_TAG, UNPAUSE_ALL_ACTION, UPDATES_AVAILABLE_FEATURE},
    controller::{
        Reconciler,
        context::{Intent, TrayContext},
    },
    error::TrayError,
    event::{Event, EventKind, EventPattern, pattern::patterns},
    model::{Domain, PowerState},
    utils::size::{format_human_readable_size, format_kb},
};

/// State a lifecycle event moves its domain to.
fn implied_state(kind: &EventKind) -> Option<PowerState> {
    match kind {
        EventKind::PreStart | EventKind::PreShutdown => Some(PowerState::Transient),
        EventKind::Start | EventKind::Unpaused | EventKind::ShutdownFailed => {
            Some(PowerState::Running)
        }
        EventKind::StartFailed | EventKind::Shutdown => Some(PowerState::Halted),
        EventKind::Paused => Some(PowerState::Paused),
        _ => None,
    }
}

fn lifecycle_notification(name: &str, event: &Event) -> Option<Notification> {
    let reason = event.attr_str("reason").unwrap_or("unknown reason");
    let (body, priority) = match event.kind {
        EventKind::PreStart => (format!("Domain {} is starting.", name), Priority::Normal),
        EventKind::Start => (format!("Domain {} has started.", name), Priority::Normal),
        EventKind::StartFailed => (
            format!("Domain {} has failed to start: {}", name, reason),
            Priority::High,
        ),
        EventKind::Paused => (format!("Domain {} has been paused.", name), Priority::Normal),
        EventKind::Unpaused => (format!("Domain {} has been unpaused.", name), Priority::Normal),
        EventKind::PreShutdown => (
            format!("Domain {} is attempting to shutdown.", name),
            Priority::Normal,
        ),
        EventKind::Shutdown => (format!("Domain {} has halted.", name), Priority::Normal),
        EventKind::ShutdownFailed => (
            format!("Domain {} has failed to shutdown: {}", name, reason),
            Priority::High,
        ),
        _ => return None,
    };

    Some(Notification::new(format!("Qube Status: {}", name), body).with_priority(priority))
}

/// Display attributes that can go stale without a lifecycle event.
fn merge_display(domain: &mut Domain, info: &DomainInfo) {
    domain.template = info.template.clone();
    domain.netvm = info.netvm.clone();
    domain.label = info.label.clone();
    domain.storage = info.storage;
    domain.updateable = info.updateable;
    domain.display_stale = false;
}

fn merge_info(domain: &mut Domain, info: DomainInfo) {
    merge_display(domain, &info);
    domain.state = info.state;
    domain.class = info.class;
    domain.updates_available = info.updates_available();
}

fn from_info(info: DomainInfo) -> Domain {
    let mut domain = Domain::new(&info.name, info.state);
    merge_info(&mut domain, info);
    domain
}

/// Mirror of every domain's power state and display attributes.
#[derive(Debug, Default, PartialEq)]
pub struct DomainRegistry {
    domains: BTreeMap<String, Domain>,
    paused_notice: bool,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Domain> {
        self.domains.get(name)
    }

    /// Listed domains: admin domains first, then the others that are not
    /// halted, each group by name.
    pub fn all(&self) -> Vec<&Domain> {
        let admins = self.domains.values().filter(|d| d.is_admin());
        let others = self
            .domains
            .values()
            .filter(|d| !d.is_admin() && d.is_visible());
        admins.chain(others).collect()
    }

    pub fn paused_notice_raised(&self) -> bool {
        self.paused_notice
    }

    fn check_paused(&mut self, ctx: &TrayContext) {
        let mut found_paused = false;
        let mut all_paused = true;
        for domain in self.domains.values() {
            if domain.is_admin() || !domain.state.is_running() {
                continue;
            }
            if domain.state == PowerState::Paused {
                found_paused = true;
            } else {
                all_paused = false;
            }
        }

        let condition = found_paused && all_paused;
        if condition && !self.paused_notice {
            ctx.notify(
                Notification::new(
                    "Your VMs have been paused!",
                    "All your VMs are currently paused. If this was an accident, \
                     unpause them all from this notification, or unpause \
                     individual VMs from the domains widget.",
                )
                .with_priority(Priority::High)
                .with_tag(PAUSED_NOTIFICATION_TAG)
                .with_action(UNPAUSE_ALL_ACTION),
            );
            self.paused_notice = true;
        } else if !condition && self.paused_notice {
            ctx.withdraw(PAUSED_NOTIFICATION_TAG);
            self.paused_notice = false;
        }
    }

    fn remove(&mut self, ctx: &TrayContext, name: &str) {
        if self.domains.remove(name).is_some() {
            debug!("removed domain {}", name);
            self.check_paused(ctx);
        }
    }

    /// Looks a domain up for the first time. `None` means it no longer exists.
    async fn fetch(&self, ctx: &TrayContext, name: &str) -> Option<Domain> {
        match ctx.api.domain(name).await {
            Ok(info) => Some(from_info(info)),
            Err(e) if e.is_stale() => {
                warn!("domain {} vanished before it could be read: {}", name, e);
                None
            }
            Err(e) => {
                debug!("treating {} as a fragile disposable: {}", name, e);
                Some(Domain::new(name, PowerState::Transient))
            }
        }
    }

    /// Power state of a domain whose class is not known yet.
    async fn poll_state(&self, ctx: &TrayContext, name: &str) -> Option<PowerState> {
        match ctx.api.power_state(name).await {
            Ok(state) => Some(state),
            Err(e) if e.is_stale() => None,
            Err(e) => {
                debug!("power state of {} unavailable: {}", name, e);
                Some(PowerState::Transient)
            }
        }
    }

    async fn add(&mut self, ctx: &TrayContext, name: &str) {
        if self.domains.contains_key(name) {
            return;
        }

        let Some(mut domain) = self.fetch(ctx, name).await else {
            return;
        };
        if domain.class.is_none() {
            let Some(state) = self.poll_state(ctx, name).await else {
                warn!("domain {} vanished before it could be read", name);
                return;
            };
            domain.state = state;
        }

        info!("domain {} added", name);
        self.domains.insert(name.to_string(), domain);
        self.check_paused(ctx);
    }

    async fn lifecycle(&mut self, ctx: &TrayContext, name: &str, event: &Event) {
        let Some(mut state) = implied_state(&event.kind) else {
            return;
        };

        let inserted = !self.domains.contains_key(name);
        if inserted {
            let Some(domain) = self.fetch(ctx, name).await else {
                return;
            };
            self.domains.insert(name.to_string(), domain);
        }

        let fragile = self.domains.get(name).is_some_and(|d| d.class.is_none());
        if fragile {
            match self.poll_state(ctx, name).await {
                Some(polled) => state = polled,
                None => {
                    warn!("domain {} no longer exists, dropping it", name);
                    self.remove(ctx, name);
                    return;
                }
            }
        }

        let Some(domain) = self.domains.get_mut(name) else {
            return;
        };
        if domain.is_admin() {
            return;
        }

        let previous = domain.state;
        domain.state = state;

        match event.kind {
            EventKind::PreStart => {
                domain.outdated = false;
                domain.last_failure = None;
            }
            EventKind::StartFailed => {
                domain.last_failure = event.attr_str("reason").map(|r| r.to_string());
            }
            EventKind::Shutdown => domain.outdated = false,
            _ => {}
        }

        let is_template = domain.is_template();
        if event.kind == EventKind::Shutdown && is_template {
            for dependent in self.domains.values_mut() {
                if dependent.template.as_deref() == Some(name) {
                    dependent.outdated = true;
                }
            }
        }

        if inserted || previous != state {
            debug!("domain {}: {} -> {}", name, previous, state);
            if let Some(notification) = lifecycle_notification(name, event) {
                ctx.notify(notification);
            }
        }

        self.check_paused(ctx);
    }

    /// Re-reads the entries whose netvm or label changed since the last view.
    pub async fn refresh_display(&mut self, ctx: &TrayContext) {
        let stale: Vec<String> = self
            .domains
            .values()
            .filter(|d| d.display_stale)
            .map(|d| d.name.clone())
            .collect();
        self.reload_display(ctx, stale).await;
    }

    /// Periodic storage refresh of the listed domains.
    pub async fn refresh_storage(&mut self, ctx: &TrayContext) {
        let listed: Vec<String> = self
            .domains
            .values()
            .filter(|d| d.state.is_running())
            .map(|d| d.name.clone())
            .collect();
        self.reload_display(ctx, listed).await;
    }

    async fn reload_display(&mut self, ctx: &TrayContext, names: Vec<String>) {
        if names.is_empty() {
            return;
        }

        let results = join_all(names.iter().map(|name| ctx.api.domain(name))).await;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(info) => {
                    if let Some(domain) = self.domains.get_mut(name) {
                        merge_display(domain, &info);
                    }
                }
                Err(e) if e.is_stale() => {
                    warn!("domain {} no longer exists, dropping it", name);
                    self.remove(ctx, name);
                }
                Err(e) => debug!("failed to refresh {}: {}", name, e),
            }
        }
    }

    fn check_command(&self, vm: &str, command: &DomainCommand) -> Result<(), TrayError> {
        let Some(domain) = self.domains.get(vm) else {
            return Err(TrayError::InvalidTarget {
                target: vm.to_string(),
                reason: "unknown domain".to_string(),
            });
        };
        if domain.is_admin() {
            return Err(TrayError::InvalidTarget {
                target: vm.to_string(),
                reason: "the admin domain cannot be controlled".to_string(),
            });
        }
        if *command != DomainCommand::Start && !domain.state.is_running() {
            return Err(TrayError::DomainNotRunning(vm.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for DomainRegistry {
    fn name(&self) -> &'static str {
        "domains"
    }

    fn subscriptions(&self) -> Vec<EventPattern> {
        patterns(&[
            "domain-*",
            "feature-set:*",
            "feature-delete:*",
            "property-set:netvm",
            "property-set:label",
            "vm-stats",
        ])
    }

    async fn seed(&mut self, ctx: &TrayContext) -> Result<(), TrayError> {
        let infos = ctx.api.list_domains().await.map_err(TrayError::provider)?;

        let mut domains = BTreeMap::new();
        for info in infos {
            let domain = match self.domains.remove(&info.name) {
                Some(mut domain) => {
                    merge_info(&mut domain, info);
                    domain
                }
                None => from_info(info),
            };
            domains.insert(domain.name.clone(), domain);
        }
        self.domains = domains;
        info!("tracking {} domains", self.domains.len());

        self.check_paused(ctx);
        Ok(())
    }

    async fn apply_event(&mut self, ctx: &TrayContext, event: &Event) -> Result<()> {
        let Some(name) = event.vm() else {
            return Ok(());
        };
        let name = name.to_string();

        match &event.kind {
            EventKind::DomainAdd => self.add(ctx, &name).await,
            EventKind::DomainDelete => self.remove(ctx, &name),
            EventKind::FeatureSet(feature) if feature == UPDATES_AVAILABLE_FEATURE => {
                if let Some(domain) = self.domains.get_mut(&name) {
                    domain.updates_available = event.attr_truthy("value");
                }
            }
            EventKind::FeatureDelete(feature) if feature == UPDATES_AVAILABLE_FEATURE => {
                if let Some(domain) = self.domains.get_mut(&name) {
                    domain.updates_available = false;
                }
            }
            EventKind::PropertySet(property) if property == "netvm" || property == "label" => {
                if let Some(domain) = self.domains.get_mut(&name) {
                    domain.display_stale = true;
                }
            }
            EventKind::Stats => {
                if let Some(domain) = self.domains.get_mut(&name) {
                    if let Some(memory_kb) = event.attr_u64("memory_kb") {
                        domain.memory_kb = memory_kb;
                    }
                    if let Some(cpu_usage) = event.attr_u64("cpu_usage") {
                        domain.cpu_usage = cpu_usage.min(100) as u8;
                    }
                }
            }
            kind if implied_state(kind).is_some() => self.lifecycle(ctx, &name, event).await,
            _ => {}
        }

        Ok(())
    }

    async fn refresh(&mut self, ctx: &TrayContext) -> Result<()> {
        self.refresh_storage(ctx).await;
        Ok(())
    }

    async fn handle_intent(&mut self, ctx: &TrayContext, intent: Intent) -> Result<()> {
        match intent {
            Intent::Domain { vm, command } => {
                self.check_command(&vm, &command)?;
                ctx.submit(Job::Domain { vm, command })
            }
            Intent::UnpauseAll => {
                let vms: Vec<String> = self
                    .domains
                    .values()
                    .filter(|d| !d.is_admin() && d.state == PowerState::Paused)
                    .map(|d| d.name.clone())
                    .collect();
                if vms.is_empty() {
                    info!("no paused domains");
                    return Ok(());
                }
                ctx.submit(Job::UnpauseAll { vms })
            }
            Intent::Launch { tool, vm } => {
                if let Some(vm) = vm.as_deref().filter(|vm| !self.domains.contains_key(*vm)) {
                    return Err(TrayError::InvalidTarget {
                        target: vm.to_string(),
                        reason: "unknown domain".to_string(),
                    }
                    .into());
                }
                ctx.submit(Job::Launch { tool, vm })
            }
            intent => anyhow::bail!("domains widget does not handle {}", intent),
        }
    }

    fn apply_outcome(&mut self, _ctx: &TrayContext, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Domain { vm, command, result } => {
                if !self.domains.contains_key(&vm) {
                    debug!("dropping result of {} for removed domain {}", command, vm);
                    return;
                }
                if let Err(e) = result {
                    debug!("{} {} was rejected: {}", command, vm, e);
                }
            }
            JobOutcome::UnpauseAll { failed } if !failed.is_empty() => {
                warn!("failed to unpause: {}", failed.join(", "));
            }
            JobOutcome::Launch { tool, result: Err(e) } => {
                warn!("failed to launch {}: {}", tool, e);
            }
            _ => {}
        }
    }

    async fn view(&mut self, ctx: &TrayContext) -> Vec<String> {
        self.refresh_display(ctx).await;

        self.all()
            .into_iter()
            .map(|d| {
                let mut line = format!("{} [{}]", d.name, d.state);
                if d.memory_kb > 0 {
                    line.push_str(&format!(" mem {} cpu {}%", format_kb(d.memory_kb), d.cpu_usage));
                }
                if d.storage.max > 0 {
                    line.push_str(&format!(
                        " disk {}/{}",
                        format_human_readable_size(d.storage.current),
                        format_human_readable_size(d.storage.max)
                    ));
                }
                if let Some(netvm) = &d.netvm {
                    line.push_str(&format!(" net {}", netvm));
                }
                if d.outdated {
                    line.push_str(" (outdated)");
                }
                if d.updates_available {
                    line.push_str(" (updates)");
                }
                line
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::DomainClass,
        testing::{FakeAdmin, Harness, app_vm, dom0, domain},
    };

    fn names(registry: &DomainRegistry) -> Vec<String> {
        registry.all().into_iter().map(|d| d.name.clone()).collect()
    }

    async fn seeded(admin: FakeAdmin) -> (Harness, DomainRegistry) {
        let harness = Harness::new(admin);
        let mut registry = DomainRegistry::new();
        registry.seed(&harness.ctx).await.unwrap();
        (harness, registry)
    }

    #[tokio::test]
    async fn test_seed_fails_when_provider_is_unavailable() {
        let admin = FakeAdmin::new();
        admin.set_unavailable(true);
        let harness = Harness::new(admin);

        let err = DomainRegistry::new().seed(&harness.ctx).await.unwrap_err();
        assert!(matches!(err, TrayError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_start_lists_domain_in_name_order() {
        let (harness, mut registry) = seeded(FakeAdmin::with_domains([
            app_vm("sys-net", PowerState::Running),
            app_vm("work", PowerState::Halted),
        ]))
        .await;
        assert_eq!(names(&registry), vec!["sys-net"]);

        harness.admin.set_state("work", PowerState::Running);
        registry
            .apply_event(&harness.ctx, &Event::on("work", "domain-start"))
            .await
            .unwrap();

        assert_eq!(names(&registry), vec!["sys-net", "work"]);
        assert_eq!(registry.get("work").unwrap().state, PowerState::Running);
    }

    #[tokio::test]
    async fn test_admin_domains_come_first() {
        let (_, registry) = seeded(FakeAdmin::with_domains([
            app_vm("anon-whonix", PowerState::Running),
            dom0(),
            app_vm("work", PowerState::Running),
        ]))
        .await;
        assert_eq!(names(&registry), vec!["dom0", "anon-whonix", "work"]);
    }

    #[tokio::test]
    async fn test_shutdown_and_delete_remove_from_listing() {
        let (harness, mut registry) = seeded(FakeAdmin::with_domains([
            app_vm("personal", PowerState::Running),
            app_vm("work", PowerState::Running),
        ]))
        .await;

        registry
            .apply_event(&harness.ctx, &Event::on("work", "domain-shutdown"))
            .await
            .unwrap();
        registry
            .apply_event(
                &harness.ctx,
                &Event::new(None, "domain-delete").with_attr("vm", "personal"),
            )
            .await
            .unwrap();

        assert!(names(&registry).is_empty());
        assert_eq!(registry.get("work").unwrap().state, PowerState::Halted);
        assert!(registry.get("personal").is_none());
    }

    #[tokio::test]
    async fn test_admin_domain_ignores_lifecycle() {
        let (harness, mut registry) = seeded(FakeAdmin::with_domains([dom0()])).await;

        registry
            .apply_event(&harness.ctx, &Event::on("dom0", "domain-shutdown"))
            .await
            .unwrap();

        assert_eq!(names(&registry), vec!["dom0"]);
        assert_eq!(registry.get("dom0").unwrap().state, PowerState::Running);
        assert!(harness.notifier.all().is_empty());
    }

    #[tokio::test]
    async fn test_replaying_events_is_idempotent() {
        let (harness, mut registry) = seeded(FakeAdmin::with_domains([
            domain("fedora-40", DomainClass::TemplateVM, PowerState::Running),
            app_vm("work", PowerState::Halted),
            app_vm("personal", PowerState::Running),
        ]))
        .await;

        let events = vec![
            Event::on("work", "domain-pre-start"),
            Event::on("work", "domain-start"),
            Event::on("personal", "domain-paused"),
            Event::on("fedora-40", "domain-shutdown"),
            Event::on("work", "domain-feature-set:updates-available").with_attr("value", "1"),
            Event::on("personal", "vm-stats")
                .with_attr("memory_kb", 409600)
                .with_attr("cpu_usage", 7),
            Event::on("personal", "domain-pre-shutdown"),
            Event::on("personal", "domain-shutdown-failed").with_attr("reason", "timeout"),
        ];

        for event in &events {
            registry.apply_event(&harness.ctx, event).await.unwrap();
        }
        let first: Vec<Domain> = registry.all().into_iter().cloned().collect();

        for event in &events {
            registry.apply_event(&harness.ctx, event).await.unwrap();
        }
        let second: Vec<Domain> = registry.all().into_iter().cloned().collect();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_duplicate_transition_notifies_once() {
        let (harness, mut registry) =
            seeded(FakeAdmin::with_domains([app_vm("work", PowerState::Halted)])).await;

        let start = Event::on("work", "domain-start");
        registry.apply_event(&harness.ctx, &start).await.unwrap();
        registry.apply_event(&harness.ctx, &start).await.unwrap();

        assert_eq!(harness.notifier.bodies(), vec!["Domain work has started."]);
    }

    #[tokio::test]
    async fn test_start_failed_keeps_reason() {
        let (harness, mut registry) =
            seeded(FakeAdmin::with_domains([app_vm("work", PowerState::Halted)])).await;

        registry
            .apply_event(&harness.ctx, &Event::on("work", "domain-pre-start"))
            .await
            .unwrap();
        registry
            .apply_event(
                &harness.ctx,
                &Event::on("work", "domain-start-failed").with_attr("reason", "out of memory"),
            )
            .await
            .unwrap();

        let work = registry.get("work").unwrap();
        assert_eq!(work.state, PowerState::Halted);
        assert_eq!(work.last_failure.as_deref(), Some("out of memory"));
        assert!(names(&registry).is_empty());

        let last = harness.notifier.all().pop().unwrap();
        assert_eq!(last.priority, Priority::High);
        assert!(last.body.contains("out of memory"));
    }

    #[tokio::test]
    async fn test_template_shutdown_marks_dependents_outdated() {
        let mut running = app_vm("work", PowerState::Running);
        running.template = Some("fedora-40".to_string());
        let mut halted = app_vm("vault", PowerState::Halted);
        halted.template = Some("fedora-40".to_string());

        let (harness, mut registry) = seeded(FakeAdmin::with_domains([
            domain("fedora-40", DomainClass::TemplateVM, PowerState::Running),
            running,
            halted,
        ]))
        .await;

        registry
            .apply_event(&harness.ctx, &Event::on("fedora-40", "domain-shutdown"))
            .await
            .unwrap();
        assert!(registry.get("work").unwrap().outdated);
        assert!(registry.get("vault").unwrap().outdated);
        assert!(!registry.get("fedora-40").unwrap().outdated);

        registry
            .apply_event(&harness.ctx, &Event::on("work", "domain-shutdown"))
            .await
            .unwrap();
        assert!(!registry.get("work").unwrap().outdated);

        registry
            .apply_event(&harness.ctx, &Event::on("vault", "domain-pre-start"))
            .await
            .unwrap();
        assert!(!registry.get("vault").unwrap().outdated);
    }

    #[tokio::test]
    async fn test_unknown_domain_is_fetched_on_event() {
        let (harness, mut registry) = seeded(FakeAdmin::new()).await;
        harness
            .admin
            .add_domain(app_vm("disp1234", PowerState::Transient));

        registry
            .apply_event(&harness.ctx, &Event::on("disp1234", "domain-pre-start"))
            .await
            .unwrap();

        assert_eq!(
            registry.get("disp1234").unwrap().state,
            PowerState::Transient
        );
        assert_eq!(
            harness.notifier.bodies(),
            vec!["Domain disp1234 is starting."]
        );
    }

    #[tokio::test]
    async fn test_start_of_unknown_domain_notifies() {
        let (harness, mut registry) = seeded(FakeAdmin::new()).await;
        harness
            .admin
            .add_domain(app_vm("disp5678", PowerState::Running));

        registry
            .apply_event(&harness.ctx, &Event::on("disp5678", "domain-start"))
            .await
            .unwrap();
        registry
            .apply_event(&harness.ctx, &Event::on("disp5678", "domain-start"))
            .await
            .unwrap();

        assert_eq!(names(&registry), vec!["disp5678"]);
        assert_eq!(
            harness.notifier.bodies(),
            vec!["Domain disp5678 has started."]
        );
    }

    #[tokio::test]
    async fn test_vanished_domain_is_not_inserted() {
        let (harness, mut registry) = seeded(FakeAdmin::new()).await;

        registry
            .apply_event(&harness.ctx, &Event::on("disp9", "domain-start"))
            .await
            .unwrap();
        registry
            .apply_event(
                &harness.ctx,
                &Event::new(None, "domain-add").with_attr("vm", "disp9"),
            )
            .await
            .unwrap();

        assert!(registry.get("disp9").is_none());
        assert!(harness.notifier.all().is_empty());
    }

    #[tokio::test]
    async fn test_fragile_domain_polls_power_state() {
        let mut fragile = app_vm("disp7", PowerState::Transient);
        fragile.class = None;
        let (harness, mut registry) = seeded(FakeAdmin::with_domains([fragile])).await;

        harness.admin.set_state("disp7", PowerState::Paused);
        registry
            .apply_event(&harness.ctx, &Event::on("disp7", "domain-start"))
            .await
            .unwrap();
        assert_eq!(registry.get("disp7").unwrap().state, PowerState::Paused);

        harness.admin.remove_domain("disp7");
        registry
            .apply_event(&harness.ctx, &Event::on("disp7", "domain-unpaused"))
            .await
            .unwrap();
        assert!(registry.get("disp7").is_none());
    }

    #[tokio::test]
    async fn test_fragile_domain_falls_back_to_transient() {
        let mut fragile = app_vm("disp7", PowerState::Running);
        fragile.class = None;
        let (harness, mut registry) = seeded(FakeAdmin::with_domains([fragile])).await;

        harness.admin.set_unavailable(true);
        registry
            .apply_event(&harness.ctx, &Event::on("disp7", "domain-start"))
            .await
            .unwrap();
        assert_eq!(registry.get("disp7").unwrap().state, PowerState::Transient);
    }

    #[tokio::test]
    async fn test_paused_notice_raised_and_withdrawn() {
        let (harness, mut registry) = seeded(FakeAdmin::with_domains([
            dom0(),
            app_vm("personal", PowerState::Running),
            app_vm("work", PowerState::Running),
        ]))
        .await;

        registry
            .apply_event(&harness.ctx, &Event::on("work", "domain-paused"))
            .await
            .unwrap();
        assert!(!registry.paused_notice_raised());

        registry
            .apply_event(&harness.ctx, &Event::on("personal", "domain-paused"))
            .await
            .unwrap();
        assert!(registry.paused_notice_raised());
        let tagged = harness.notifier.tagged(PAUSED_NOTIFICATION_TAG);
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].action.as_deref(), Some(UNPAUSE_ALL_ACTION));

        registry
            .apply_event(&harness.ctx, &Event::on("personal", "domain-paused"))
            .await
            .unwrap();
        assert_eq!(harness.notifier.tagged(PAUSED_NOTIFICATION_TAG).len(), 1);

        registry
            .apply_event(&harness.ctx, &Event::on("work", "domain-unpaused"))
            .await
            .unwrap();
        assert!(!registry.paused_notice_raised());
        assert_eq!(harness.notifier.withdrawn(), vec![PAUSED_NOTIFICATION_TAG]);
    }

    #[tokio::test]
    async fn test_unpause_all_submits_paused_domains() {
        let (harness, mut registry) = seeded(FakeAdmin::with_domains([
            app_vm("banking", PowerState::Paused),
            app_vm("personal", PowerState::Paused),
            app_vm("work", PowerState::Running),
        ]))
        .await;

        registry
            .handle_intent(&harness.ctx, Intent::UnpauseAll)
            .await
            .unwrap();

        assert_eq!(
            harness.submitted(),
            vec![Job::UnpauseAll {
                vms: vec!["banking".to_string(), "personal".to_string()]
            }]
        );
    }

    #[tokio::test]
    async fn test_domain_intent_validation() {
        let (harness, mut registry) = seeded(FakeAdmin::with_domains([
            dom0(),
            app_vm("work", PowerState::Halted),
        ]))
        .await;

        let intent = |vm: &str, command| Intent::Domain {
            vm: vm.to_string(),
            command,
        };

        assert!(
            registry
                .handle_intent(&harness.ctx, intent("work", DomainCommand::Pause))
                .await
                .is_err()
        );
        assert!(
            registry
                .handle_intent(&harness.ctx, intent("dom0", DomainCommand::Shutdown))
                .await
                .is_err()
        );
        assert!(
            registry
                .handle_intent(&harness.ctx, intent("ghost", DomainCommand::Start))
                .await
                .is_err()
        );
        registry
            .handle_intent(&harness.ctx, intent("work", DomainCommand::Start))
            .await
            .unwrap();

        assert_eq!(
            harness.submitted(),
            vec![Job::Domain {
                vm: "work".to_string(),
                command: DomainCommand::Start
            }]
        );
    }

    #[tokio::test]
    async fn test_launch_intent_targets_known_domains() {
        let (harness, mut registry) =
            seeded(FakeAdmin::with_domains([app_vm("work", PowerState::Running)])).await;

        registry
            .handle_intent(
                &harness.ctx,
                Intent::Launch {
                    tool: "settings".to_string(),
                    vm: Some("work".to_string()),
                },
            )
            .await
            .unwrap();
        registry
            .handle_intent(
                &harness.ctx,
                Intent::Launch {
                    tool: "qube-manager".to_string(),
                    vm: None,
                },
            )
            .await
            .unwrap();
        assert!(
            registry
                .handle_intent(
                    &harness.ctx,
                    Intent::Launch {
                        tool: "settings".to_string(),
                        vm: Some("ghost".to_string()),
                    },
                )
                .await
                .is_err()
        );

        assert_eq!(
            harness.submitted(),
            vec![
                Job::Launch {
                    tool: "settings".to_string(),
                    vm: Some("work".to_string()),
                },
                Job::Launch {
                    tool: "qube-manager".to_string(),
                    vm: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_property_change_is_resolved_lazily() {
        let (harness, mut registry) =
            seeded(FakeAdmin::with_domains([app_vm("work", PowerState::Running)])).await;

        harness.admin.set_label("work", "red");
        registry
            .apply_event(&harness.ctx, &Event::on("work", "property-set:label"))
            .await
            .unwrap();
        assert!(registry.get("work").unwrap().display_stale);
        assert_eq!(registry.get("work").unwrap().label, None);

        let calls = harness.admin.calls();
        registry.view(&harness.ctx).await;
        assert_eq!(harness.admin.calls(), calls + 1);

        let work = registry.get("work").unwrap();
        assert!(!work.display_stale);
        assert_eq!(work.label.as_deref(), Some("red"));
    }

    #[tokio::test]
    async fn test_refresh_updates_storage_and_drops_stale() {
        let (harness, mut registry) = seeded(FakeAdmin::with_domains([
            app_vm("personal", PowerState::Running),
            app_vm("work", PowerState::Running),
        ]))
        .await;

        harness.admin.set_storage("work", 512, 2048);
        harness.admin.remove_domain("personal");
        registry.refresh(&harness.ctx).await.unwrap();

        assert_eq!(registry.get("work").unwrap().storage.ratio(), 0.25);
        assert!(registry.get("personal").is_none());
    }

    #[tokio::test]
    async fn test_unknown_events_are_ignored() {
        let (harness, mut registry) =
            seeded(FakeAdmin::with_domains([app_vm("work", PowerState::Running)])).await;
        let before: Vec<Domain> = registry.all().into_iter().cloned().collect();

        registry
            .apply_event(&harness.ctx, &Event::on("work", "domain-hibernate"))
            .await
            .unwrap();

        let after: Vec<Domain> = registry.all().into_iter().cloned().collect();
        assert_eq!(before, after);
    }
}
