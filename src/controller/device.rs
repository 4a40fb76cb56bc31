use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    agent::{
        admin::DeviceInfo,
        job::{AttachPlan, DetachPlan, Job, JobOutcome},
        notify::Notification,
    },
    controller::{
        Reconciler,
        context::{Intent, TrayContext},
    },
    error::{ApiError, TrayError},
    event::{Event, EventKind, EventPattern, pattern::patterns},
    model::{Device, DeviceClass, DeviceKey, VmRef},
};

fn device_from(info: &DeviceInfo, class: DeviceClass, backend_label: Option<String>) -> Device {
    let key = info.key(class);
    let description = if info.description.is_empty() {
        key.to_string()
    } else {
        info.description.clone()
    };
    Device::new(key, description, backend_label)
}

/// Emits one notification per device that disappeared or appeared.
fn notify_diff(
    ctx: &TrayContext,
    previous: &BTreeMap<DeviceKey, Device>,
    current: &BTreeMap<DeviceKey, Device>,
) {
    for (key, device) in previous {
        if !current.contains_key(key) {
            ctx.notify(Notification::new(
                "Device removed",
                format!("Device {} was removed", device.description),
            ));
        }
    }
    for (key, device) in current {
        if !previous.contains_key(key) {
            ctx.notify(Notification::new(
                "Device available",
                format!("Device {} is available", device.description),
            ));
        }
    }
}

/// Mirror of the devices exposed by every domain and the running domains
/// they are attached to.
#[derive(Debug, PartialEq)]
pub struct DeviceRegistry {
    classes: Vec<DeviceClass>,
    devices: BTreeMap<DeviceKey, Device>,
    /// Running non-admin domains: the only valid attach targets.
    vms: BTreeMap<String, VmRef>,
    seeded: bool,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DeviceClass::TRACKED.to_vec())
    }
}

impl DeviceRegistry {
    pub fn new(classes: Vec<DeviceClass>) -> Self {
        Self {
            classes,
            devices: BTreeMap::new(),
            vms: BTreeMap::new(),
            seeded: false,
        }
    }

    pub fn tracks(&self, class: DeviceClass) -> bool {
        self.classes.contains(&class)
    }

    pub fn device(&self, key: &DeviceKey) -> Option<&Device> {
        self.devices.get(key)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn attachments(&self, key: &DeviceKey) -> Option<&BTreeSet<String>> {
        self.devices.get(key).map(|d| &d.attachments)
    }

    pub fn live_vms(&self) -> impl Iterator<Item = &VmRef> {
        self.vms.values()
    }

    pub fn is_live(&self, vm: &str) -> bool {
        self.vms.contains_key(vm)
    }

    fn label_of(&self, backend: &str) -> Option<String> {
        if let Some(vm) = self.vms.get(backend) {
            return vm.label.clone();
        }
        self.devices
            .values()
            .find(|d| d.key.backend == backend)
            .and_then(|d| d.backend_label.clone())
    }

    /// Drops `vm` from the live set and from every attachment set.
    fn purge(&mut self, vm: &str) {
        self.vms.remove(vm);
        for device in self.devices.values_mut() {
            device.attachments.remove(vm);
        }
    }

    fn take_backend(&mut self, backend: &str, class: Option<DeviceClass>) -> BTreeMap<DeviceKey, Device> {
        let keys: Vec<DeviceKey> = self
            .devices
            .keys()
            .filter(|k| k.backend == backend && class.is_none_or(|c| k.class == c))
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| self.devices.remove_entry(&k))
            .collect()
    }

    fn attach_seen(&mut self, vm: &str, info: &DeviceInfo, class: DeviceClass) {
        let key = info.key(class);
        match self.devices.get_mut(&key) {
            Some(device) => {
                device.attachments.insert(vm.to_string());
            }
            None => debug!("ignoring ghost attachment of {} to {}", key, vm),
        }
    }

    /// Re-enumerates the devices of one class exposed by `backend`.
    async fn rescan(&mut self, ctx: &TrayContext, backend: &str, class: DeviceClass) -> Result<()> {
        if !self.tracks(class) {
            return Ok(());
        }

        let exposed = match ctx.api.devices(backend, class).await {
            Ok(list) => list,
            Err(e) if e.is_stale() => {
                warn!("backend {} vanished, dropping its {} devices", backend, class);
                vec![]
            }
            Err(e) => return Err(e.into()),
        };

        let label = self.label_of(backend);
        let previous = self.take_backend(backend, Some(class));

        let mut current = BTreeMap::new();
        let mut added = vec![];
        for info in &exposed {
            let key = info.key(class);
            let device = match previous.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    added.push(key.clone());
                    device_from(info, class, label.clone())
                }
            };
            current.insert(key, device);
        }
        self.devices.extend(current.clone());

        if !added.is_empty() {
            let vms: Vec<String> = self.vms.keys().cloned().collect();
            for vm in vms {
                match ctx.api.attached_devices(&vm, class).await {
                    Ok(list) => {
                        for info in list.iter().filter(|i| added.contains(&i.key(class))) {
                            self.attach_seen(&vm, info, class);
                        }
                    }
                    Err(e) if e.is_stale() => self.purge(&vm),
                    Err(e) => warn!("failed to list devices attached to {}: {}", vm, e),
                }
            }
        }

        notify_diff(ctx, &previous, &current);
        Ok(())
    }

    async fn start(&mut self, ctx: &TrayContext, vm: &str) -> Result<()> {
        let info = match ctx.api.domain(vm).await {
            Ok(info) => info,
            Err(e) if e.is_stale() => {
                warn!("domain {} vanished after starting: {}", vm, e);
                self.purge(vm);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if info.is_admin() {
            return Ok(());
        }

        self.vms
            .insert(vm.to_string(), VmRef::new(vm, info.label.clone()));

        for class in self.classes.clone() {
            match ctx.api.attached_devices(vm, class).await {
                Ok(list) => {
                    for info in &list {
                        self.attach_seen(vm, info, class);
                    }
                }
                Err(e) if e.is_stale() => {
                    self.purge(vm);
                    return Ok(());
                }
                Err(e) => warn!("failed to list devices attached to {}: {}", vm, e),
            }
        }
        Ok(())
    }

    /// A deleted domain takes the devices it exposed with it.
    fn delete(&mut self, ctx: &TrayContext, vm: &str) {
        self.purge(vm);
        let removed = self.take_backend(vm, None);
        notify_diff(ctx, &removed, &BTreeMap::new());
    }

    async fn relabel(&mut self, ctx: &TrayContext, vm: &str, event: &Event) {
        let label = match event.attr_str("newvalue") {
            Some(label) => Some(label.to_string()),
            None => match ctx.api.domain(vm).await {
                Ok(info) => info.label,
                Err(e) => {
                    debug!("label of {} unavailable: {}", vm, e);
                    return;
                }
            },
        };

        if let Some(entry) = self.vms.get_mut(vm) {
            entry.label = label.clone();
        }
        for device in self.devices.values_mut() {
            if device.key.backend == vm {
                device.backend_label = label.clone();
            }
        }
    }

    fn detach_plan(&self, key: &DeviceKey) -> Result<DetachPlan, TrayError> {
        let Some(device) = self.devices.get(key) else {
            return Err(TrayError::UnknownDevice(key.to_string()));
        };
        Ok(DetachPlan {
            device: key.clone(),
            description: device.description.clone(),
            holders: device.attachments.iter().cloned().collect(),
        })
    }

    /// Plans moving `key` to `target`: every current holder is detached first.
    pub fn attach_plan(&self, key: &DeviceKey, target: &str) -> Result<AttachPlan, TrayError> {
        let detach = self.detach_plan(key)?;
        if key.backend == target {
            return Err(TrayError::InvalidTarget {
                target: target.to_string(),
                reason: format!("it is the backend of {}", key),
            });
        }
        if !self.vms.contains_key(target) {
            return Err(TrayError::DomainNotRunning(target.to_string()));
        }
        Ok(AttachPlan {
            detach,
            target: target.to_string(),
        })
    }

    fn submit_detach(&self, ctx: &TrayContext, plan: DetachPlan) -> Result<()> {
        if plan.holders.is_empty() {
            info!("{} is not attached anywhere", plan.device);
            return Ok(());
        }
        ctx.submit(Job::Detach(plan))
    }
}

#[async_trait]
impl Reconciler for DeviceRegistry {
    fn name(&self) -> &'static str {
        "devices"
    }

    fn subscriptions(&self) -> Vec<EventPattern> {
        patterns(&[
            "device-attach:*",
            "device-detach:*",
            "device-list-change:*",
            "domain-start",
            "domain-start-failed",
            "domain-shutdown",
            "domain-delete",
            "property-set:label",
        ])
    }

    async fn seed(&mut self, ctx: &TrayContext) -> Result<(), TrayError> {
        let domains = ctx.api.list_domains().await.map_err(TrayError::provider)?;

        let vms: BTreeMap<String, VmRef> = domains
            .iter()
            .filter(|d| !d.is_admin() && d.state.is_running())
            .map(|d| (d.name.clone(), VmRef::new(&d.name, d.label.clone())))
            .collect();

        let mut updated = BTreeMap::new();
        for domain in &domains {
            for class in &self.classes {
                match ctx.api.devices(&domain.name, *class).await {
                    Ok(list) => {
                        for info in &list {
                            let device = device_from(info, *class, domain.label.clone());
                            updated.insert(device.key.clone(), device);
                        }
                    }
                    Err(ApiError::NoSuchDomain(name)) => {
                        warn!("domain {} vanished during device enumeration", name);
                    }
                    Err(e) => return Err(TrayError::provider(e)),
                }
            }
        }

        let previous = std::mem::replace(&mut self.devices, updated);
        self.vms = vms;

        let live: Vec<String> = self.vms.keys().cloned().collect();
        for vm in live {
            for class in self.classes.clone() {
                match ctx.api.attached_devices(&vm, class).await {
                    Ok(list) => {
                        for info in &list {
                            self.attach_seen(&vm, info, class);
                        }
                    }
                    Err(ApiError::NoSuchDomain(name)) => {
                        warn!("domain {} vanished during device enumeration", name);
                        self.purge(&name);
                        break;
                    }
                    Err(e) => return Err(TrayError::provider(e)),
                }
            }
        }

        if self.seeded {
            notify_diff(ctx, &previous, &self.devices);
        }
        self.seeded = true;
        info!(
            "tracking {} devices across {} running domains",
            self.devices.len(),
            self.vms.len()
        );
        Ok(())
    }

    async fn apply_event(&mut self, ctx: &TrayContext, event: &Event) -> Result<()> {
        let Some(vm) = event.vm() else {
            return Ok(());
        };
        let vm = vm.to_string();

        match &event.kind {
            EventKind::DeviceAttach(class) => {
                if !self.tracks(*class) || !self.vms.contains_key(&vm) {
                    return Ok(());
                }
                let Some(key) = event.device_key(*class) else {
                    warn!("{} without a usable device reference", event.name);
                    return Ok(());
                };
                let label = self.label_of(&key.backend);
                let device = self.devices.entry(key.clone()).or_insert_with(|| {
                    let description = event
                        .attr_str("description")
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| key.to_string());
                    Device::new(key.clone(), description, label)
                });
                device.attachments.insert(vm);
            }
            EventKind::DeviceDetach(class) => {
                if !self.vms.contains_key(&vm) {
                    return Ok(());
                }
                let Some(key) = event.device_key(*class) else {
                    return Ok(());
                };
                if let Some(device) = self.devices.get_mut(&key) {
                    device.attachments.remove(&vm);
                }
            }
            EventKind::DeviceListChange(class) => self.rescan(ctx, &vm, *class).await?,
            EventKind::Shutdown | EventKind::StartFailed => self.purge(&vm),
            EventKind::DomainDelete => self.delete(ctx, &vm),
            EventKind::Start => self.start(ctx, &vm).await?,
            EventKind::PropertySet(property) if property == "label" => {
                self.relabel(ctx, &vm, event).await
            }
            _ => {}
        }

        Ok(())
    }

    async fn handle_intent(&mut self, ctx: &TrayContext, intent: Intent) -> Result<()> {
        match intent {
            Intent::Attach { device, vm } => {
                let plan = self.attach_plan(&device, &vm)?;
                ctx.submit(Job::Attach(plan))
            }
            Intent::Detach { device } => {
                let plan = self.detach_plan(&device)?;
                self.submit_detach(ctx, plan)
            }
            Intent::Toggle { device, vm } => {
                let held = self
                    .devices
                    .get(&device)
                    .is_some_and(|d| d.is_attached_to(&vm));
                if held {
                    let mut plan = self.detach_plan(&device)?;
                    plan.holders = vec![vm];
                    return self.submit_detach(ctx, plan);
                }
                let plan = self.attach_plan(&device, &vm)?;
                ctx.submit(Job::Attach(plan))
            }
            intent => anyhow::bail!("devices widget does not handle {}", intent),
        }
    }

    fn apply_outcome(&mut self, _ctx: &TrayContext, outcome: JobOutcome) {
        let JobOutcome::Device(outcome) = outcome else {
            return;
        };
        let Some(device) = self.devices.get_mut(&outcome.device) else {
            debug!("dropping outcome for removed device {}", outcome.device);
            return;
        };

        for vm in &outcome.detached {
            device.attachments.remove(vm);
        }
        if let Some((vm, e)) = &outcome.failed_detach {
            warn!("{} is still attached to {}: {}", outcome.device, vm, e);
        }
        if let Some((target, Ok(()))) = &outcome.attach {
            if self.vms.contains_key(target) {
                device.attachments.insert(target.clone());
            }
        }
    }

    async fn view(&mut self, _ctx: &TrayContext) -> Vec<String> {
        let mut lines = vec![];
        let mut classes = self.classes.clone();
        classes.sort();

        for class in classes {
            let mut devices: Vec<&Device> =
                self.devices.values().filter(|d| d.key.class == class).collect();
            if devices.is_empty() {
                continue;
            }
            devices.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));

            lines.push(class.as_str().to_uppercase());
            for device in devices {
                let mut line = format!("  {} {}", device.key, device.description);
                if !device.attachments.is_empty() {
                    let holders: Vec<&str> = device.attachments.iter().map(|s| s.as_str()).collect();
                    line.push_str(&format!(" -> {}", holders.join(", ")));
                }
                lines.push(line);
            }
        }

        lines
    }
}
