//! In-memory collaborators shared by the unit tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    agent::{
        admin::{AdminApi, DeviceInfo, DomainInfo},
        command::{CommandExecutor, DomainCommand},
        job::{CommandWorker, Job},
        notify::{Notification, Notifier},
    },
    constants::UPDATES_AVAILABLE_FEATURE,
    controller::context::TrayContext,
    error::ApiError,
    model::{DeviceAssignment, DeviceClass, DeviceKey, DomainClass, Pool, PowerState},
};

pub fn domain(name: &str, class: DomainClass, state: PowerState) -> DomainInfo {
    DomainInfo::new(name, class, state)
}

pub fn app_vm(name: &str, state: PowerState) -> DomainInfo {
    domain(name, DomainClass::AppVM, state)
}

pub fn dom0() -> DomainInfo {
    domain("dom0", DomainClass::AdminVM, PowerState::Running)
}

#[derive(Default)]
struct AdminState {
    domains: BTreeMap<String, DomainInfo>,
    devices: BTreeMap<(String, DeviceClass), Vec<DeviceInfo>>,
    attached: BTreeMap<(String, DeviceClass), Vec<DeviceInfo>>,
    pools: Vec<Pool>,
    unavailable: bool,
    calls: usize,
}

#[derive(Default)]
pub struct FakeAdmin {
    state: Mutex<AdminState>,
}

impl FakeAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domains(domains: impl IntoIterator<Item = DomainInfo>) -> Self {
        let admin = Self::new();
        for info in domains {
            admin.add_domain(info);
        }
        admin
    }

    fn with<T>(&self, f: impl FnOnce(&mut AdminState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_domain(&self, info: DomainInfo) {
        self.with(|s| s.domains.insert(info.name.clone(), info));
    }

    pub fn remove_domain(&self, name: &str) {
        self.with(|s| {
            s.domains.remove(name);
            s.devices.retain(|(domain, _), _| domain != name);
            s.attached.retain(|(domain, _), _| domain != name);
        });
    }

    pub fn set_state(&self, name: &str, state: PowerState) {
        self.with(|s| {
            if let Some(info) = s.domains.get_mut(name) {
                info.state = state;
            }
        });
    }

    pub fn set_label(&self, name: &str, label: &str) {
        self.with(|s| {
            if let Some(info) = s.domains.get_mut(name) {
                info.label = Some(label.to_string());
            }
        });
    }

    pub fn set_updates_available(&self, name: &str, value: bool) {
        self.with(|s| {
            if let Some(info) = s.domains.get_mut(name) {
                if value {
                    info.features
                        .insert(UPDATES_AVAILABLE_FEATURE.to_string(), "1".to_string());
                } else {
                    info.features.remove(UPDATES_AVAILABLE_FEATURE);
                }
            }
        });
    }

    pub fn set_storage(&self, name: &str, current: u64, max: u64) {
        self.with(|s| {
            if let Some(info) = s.domains.get_mut(name) {
                info.storage.current = current;
                info.storage.max = max;
            }
        });
    }

    pub fn expose(&self, backend: &str, class: DeviceClass, ident: &str, description: &str) {
        self.with(|s| {
            s.devices
                .entry((backend.to_string(), class))
                .or_default()
                .push(DeviceInfo {
                    backend: backend.to_string(),
                    ident: ident.to_string(),
                    description: description.to_string(),
                })
        });
    }

    pub fn unexpose(&self, backend: &str, class: DeviceClass, ident: &str) {
        self.with(|s| {
            if let Some(list) = s.devices.get_mut(&(backend.to_string(), class)) {
                list.retain(|d| d.ident != ident);
            }
        });
    }

    /// Records `key` as attached to `vm`, whether or not the backend exposes it.
    pub fn attach(&self, vm: &str, key: &DeviceKey) {
        self.with(|s| {
            s.attached
                .entry((vm.to_string(), key.class))
                .or_default()
                .push(DeviceInfo {
                    backend: key.backend.clone(),
                    ident: key.ident.clone(),
                    description: String::new(),
                })
        });
    }

    pub fn detach_all(&self, vm: &str) {
        self.with(|s| s.attached.retain(|(domain, _), _| domain != vm));
    }

    pub fn set_pools(&self, pools: Vec<Pool>) {
        self.with(|s| s.pools = pools);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.with(|s| s.unavailable = unavailable);
    }

    /// Number of queries answered so far.
    pub fn calls(&self) -> usize {
        self.with(|s| s.calls)
    }

    fn query<T>(&self, f: impl FnOnce(&AdminState) -> Result<T, ApiError>) -> Result<T, ApiError> {
        self.with(|s| {
            s.calls += 1;
            if s.unavailable {
                return Err(ApiError::Unavailable("connection refused".to_string()));
            }
            f(s)
        })
    }
}

fn known(state: &AdminState, name: &str) -> Result<(), ApiError> {
    if state.domains.contains_key(name) {
        Ok(())
    } else {
        Err(ApiError::NoSuchDomain(name.to_string()))
    }
}

#[async_trait]
impl AdminApi for FakeAdmin {
    async fn list_domains(&self) -> Result<Vec<DomainInfo>, ApiError> {
        self.query(|s| Ok(s.domains.values().cloned().collect()))
    }

    async fn domain(&self, name: &str) -> Result<DomainInfo, ApiError> {
        self.query(|s| {
            s.domains
                .get(name)
                .cloned()
                .ok_or_else(|| ApiError::NoSuchDomain(name.to_string()))
        })
    }

    async fn devices(&self, domain: &str, class: DeviceClass) -> Result<Vec<DeviceInfo>, ApiError> {
        self.query(|s| {
            known(s, domain)?;
            Ok(s.devices
                .get(&(domain.to_string(), class))
                .cloned()
                .unwrap_or_default())
        })
    }

    async fn attached_devices(
        &self,
        domain: &str,
        class: DeviceClass,
    ) -> Result<Vec<DeviceInfo>, ApiError> {
        self.query(|s| {
            known(s, domain)?;
            Ok(s.attached
                .get(&(domain.to_string(), class))
                .cloned()
                .unwrap_or_default())
        })
    }

    async fn pools(&self) -> Result<Vec<Pool>, ApiError> {
        self.query(|s| Ok(s.pools.clone()))
    }
}

/// Records every call; selected domains fail their commands.
#[derive(Default)]
pub struct FakeExecutor {
    calls: Mutex<Vec<String>>,
    failing_domain: BTreeSet<String>,
    failing_attach: BTreeSet<String>,
    failing_detach: BTreeSet<String>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_domain(mut self, vm: &str) -> Self {
        self.failing_domain.insert(vm.to_string());
        self
    }

    pub fn fail_attach(mut self, vm: &str) -> Self {
        self.failing_attach.insert(vm.to_string());
        self
    }

    pub fn fail_detach(mut self, vm: &str) -> Self {
        self.failing_detach.insert(vm.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn domain(&self, vm: &str, command: &DomainCommand) -> Result<(), ApiError> {
        self.record(format!("{} {}", command, vm));
        if self.failing_domain.contains(vm) {
            return Err(ApiError::Rejected(format!(
                "qube {} refused to {}",
                vm,
                command.verb()
            )));
        }
        Ok(())
    }

    async fn attach(
        &self,
        vm: &str,
        _class: DeviceClass,
        assignment: &DeviceAssignment,
    ) -> Result<(), ApiError> {
        self.record(format!(
            "attach {} {}:{}",
            vm, assignment.backend, assignment.ident
        ));
        if self.failing_attach.contains(vm) {
            return Err(ApiError::Rejected("device already attached".to_string()));
        }
        Ok(())
    }

    async fn detach(
        &self,
        vm: &str,
        _class: DeviceClass,
        assignment: &DeviceAssignment,
    ) -> Result<(), ApiError> {
        self.record(format!(
            "detach {} {}:{}",
            vm, assignment.backend, assignment.ident
        ));
        if self.failing_detach.contains(vm) {
            return Err(ApiError::Rejected("device is busy".to_string()));
        }
        Ok(())
    }

    async fn settle(&self, device: &DeviceKey) {
        self.record(format!("settle {}", device));
    }

    async fn launch(&self, tool: &str, vm: Option<&str>) -> Result<(), ApiError> {
        match vm {
            Some(vm) => self.record(format!("launch {} {}", tool, vm)),
            None => self.record(format!("launch {}", tool)),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    withdrawn: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<Notification> {
        self.all().into_iter().filter(|n| n.is_error).collect()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.all().into_iter().map(|n| n.body).collect()
    }

    pub fn tagged(&self, tag: &str) -> Vec<Notification> {
        self.all()
            .into_iter()
            .filter(|n| n.tag.as_deref() == Some(tag))
            .collect()
    }

    pub fn withdrawn(&self) -> Vec<String> {
        self.withdrawn.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
        self.withdrawn.lock().unwrap().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }

    fn withdraw(&self, tag: &str) {
        self.withdrawn.lock().unwrap().push(tag.to_string());
    }
}

/// A context whose submitted jobs are left in the returned queue.
pub struct Harness {
    pub ctx: TrayContext,
    pub admin: Arc<FakeAdmin>,
    pub notifier: Arc<RecordingNotifier>,
    pub jobs: async_channel::Receiver<Job>,
}

impl Harness {
    pub fn new(admin: FakeAdmin) -> Self {
        let admin = Arc::new(admin);
        let notifier = Arc::new(RecordingNotifier::new());
        let (worker, jobs) = CommandWorker::channel();
        let ctx = TrayContext::new(admin.clone(), notifier.clone(), worker);
        Self {
            ctx,
            admin,
            notifier,
            jobs,
        }
    }

    pub fn submitted(&self) -> Vec<Job> {
        let mut jobs = vec![];
        while let Ok(job) = self.jobs.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}
