pub const UPDATES_AVAILABLE_FEATURE: &str = "updates-available";

pub const PAUSED_NOTIFICATION_TAG: &str = "vms-paused";
pub const UNPAUSE_ALL_ACTION: &str = "unpause-all";
pub const UPDATER_TOOL: &str = "updater";

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 120;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1000;
pub const DEFAULT_RECONNECT_INITIAL_DELAY_MS: u64 = 500;
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_EVENT_BUFFER: usize = 256;

pub const DEFAULT_WARN_LEVEL: f64 = 0.9;
pub const DEFAULT_URGENT_WARN_LEVEL: f64 = 0.95;
