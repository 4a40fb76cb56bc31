use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tokio::fs::read_to_string;
use tracing::warn;

use crate::{
    constants::{
        DEFAULT_RECONNECT_INITIAL_DELAY_MS, DEFAULT_RECONNECT_MAX_DELAY_MS,
        DEFAULT_REFRESH_INTERVAL_SECS, DEFAULT_SETTLE_DELAY_MS, DEFAULT_URGENT_WARN_LEVEL,
        DEFAULT_WARN_LEVEL, UPDATER_TOOL,
    },
    event::pump::ReconnectConfig,
    model::DeviceClass,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(skip_serializing, skip_deserializing)]
    pub config_path: PathBuf,
    #[serde(skip_serializing, skip_deserializing)]
    pub config_dir: PathBuf,

    #[serde(rename = "snapshot-path")]
    pub snapshot_path: PathBuf,

    #[serde(rename = "event-socket")]
    pub event_socket: PathBuf,

    #[serde(rename = "refresh-interval-secs", default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    #[serde(rename = "notify-command", default)]
    pub notify_command: Option<Vec<String>>,

    #[serde(rename = "reconnect", default)]
    pub reconnect: ReconnectSection,

    #[serde(rename = "devices", default)]
    pub devices: DevicesConfig,

    #[serde(rename = "disk-space", default)]
    pub disk_space: DiskSpaceConfig,

    #[serde(rename = "commands", default)]
    pub commands: CommandsConfig,
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSection {
    #[serde(rename = "initial-delay-ms")]
    pub initial_delay_ms: u64,
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_RECONNECT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        ReconnectConfig {
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms.max(section.initial_delay_ms)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DevicesConfig {
    #[serde(rename = "classes")]
    pub classes: Vec<DeviceClass>,
    #[serde(rename = "settle-delay-ms")]
    pub settle_delay_ms: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            classes: DeviceClass::TRACKED.to_vec(),
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
        }
    }
}

impl DevicesConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiskSpaceConfig {
    #[serde(rename = "warn-level")]
    pub warn_level: f64,
    #[serde(rename = "urgent-level")]
    pub urgent_level: f64,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            warn_level: DEFAULT_WARN_LEVEL,
            urgent_level: DEFAULT_URGENT_WARN_LEVEL,
        }
    }
}

/// Command templates for the executor. Placeholders: `{vm}`, `{service}`,
/// `{class}`, `{backend}`, `{ident}` and the bare `{persistent}` flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandsConfig {
    pub start: Vec<String>,
    pub shutdown: Vec<String>,
    pub kill: Vec<String>,
    pub pause: Vec<String>,
    pub unpause: Vec<String>,
    #[serde(rename = "run-service")]
    pub run_service: Vec<String>,
    pub attach: Vec<String>,
    pub detach: Vec<String>,
    /// Helper tools launched as opaque processes, by name.
    pub tools: BTreeMap<String, Vec<String>>,
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            start: args(&["qvm-start", "{vm}"]),
            shutdown: args(&["qvm-shutdown", "{vm}"]),
            kill: args(&["qvm-kill", "{vm}"]),
            pause: args(&["qvm-pause", "{vm}"]),
            unpause: args(&["qvm-unpause", "{vm}"]),
            run_service: args(&["qvm-run", "--service", "{vm}", "{service}"]),
            attach: args(&[
                "qvm-device",
                "{class}",
                "attach",
                "{persistent}",
                "{vm}",
                "{backend}:{ident}",
            ]),
            detach: args(&["qvm-device", "{class}", "detach", "{vm}", "{backend}:{ident}"]),
            tools: BTreeMap::from([
                (UPDATER_TOOL.to_string(), args(&["qubes-update-gui"])),
                ("settings".to_string(), args(&["qubes-vm-settings", "{vm}"])),
                (
                    "console-log".to_string(),
                    args(&["qubes-log-viewer", "/var/log/xen/console/guest-{vm}.log"]),
                ),
                (
                    "device-model-log".to_string(),
                    args(&["qubes-log-viewer", "/var/log/xen/console/guest-{vm}-dm.log"]),
                ),
                ("qube-manager".to_string(), args(&["qubes-qube-manager"])),
            ]),
        }
    }
}

async fn resolve_config_path(path_override: Option<PathBuf>) -> Result<PathBuf> {
    let config_path =
        path_override.or_else(|| std::env::var("QTRAY_CONFIG").ok().map(PathBuf::from));

    if let Some(path) = config_path {
        return Ok(path);
    }

    warn!("No config path override found, looking for config in default locations");

    let cwd = std::env::current_dir()?;
    let path = cwd.join("qtray.toml");
    if path.exists() {
        return Ok(path);
    }
    warn!("No config found in current directory ({})", path.display());

    let Some(project_dirs) = directories::ProjectDirs::from("org", "qtray", "qtray") else {
        bail!("Failed to get config dir");
    };

    let path = project_dirs.config_dir().join("config.toml");
    if path.exists() {
        return Ok(path);
    }
    warn!("No config found in home config dir ({})", path.display());

    let path = PathBuf::from("/etc/qtray/config.toml");
    if path.exists() {
        return Ok(path);
    }
    warn!("No config found in global config dir ({})", path.display());

    bail!("Couldn't load config file.");
}

impl Config {
    pub async fn load(path_override: Option<PathBuf>) -> Result<Self> {
        let config_path = resolve_config_path(path_override).await?;

        let config_str = read_to_string(&config_path).await?;
        let mut config = Self::parse(&config_str)?;
        config.config_path = config_path.clone();

        let Some(config_dir) = config_path.parent().map(|p| p.to_path_buf()) else {
            bail!("Couldn't determine config dir");
        };
        config.config_dir = config_dir;

        Ok(config)
    }

    pub fn parse(config_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(config_str)?;

        let levels = &config.disk_space;
        if !(0.0..=1.0).contains(&levels.warn_level)
            || !(0.0..=1.0).contains(&levels.urgent_level)
            || levels.warn_level > levels.urgent_level
        {
            bail!(
                "invalid disk-space levels: warn-level {} / urgent-level {}",
                levels.warn_level,
                levels.urgent_level
            );
        }

        Ok(config)
    }

    /// Relative paths are taken relative to the config file.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.config_dir.join(path)
    }

    pub fn absolute_snapshot_path(&self) -> PathBuf {
        self.resolve(&self.snapshot_path)
    }

    pub fn absolute_event_socket(&self) -> PathBuf {
        self.resolve(&self.event_socket)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}
