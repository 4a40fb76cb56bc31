use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "qtray")]
#[command(about = "tray widgets for the admin console", long_about = None)]
pub struct Cli {
    /// Path to the config file. If not provided, qtray looks for qtray.toml in the current
    /// working directory, then in the home config dir ($HOME/.config/qtray/config.toml) and
    /// the system config dir (/etc/qtray/config.toml)
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<PathBuf>,

    /// Stop once the control input (stdin) is closed
    #[arg(long = "exit-on-eof")]
    pub exit_on_eof: bool,

    #[command(subcommand)]
    pub widget: Widget,
}

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Widget {
    /// Running domains and their lifecycle
    Domains,

    /// Attachable devices
    Devices,

    /// Domains with pending updates
    Updates,

    /// Storage pool usage
    #[command(name = "disk-space")]
    DiskSpace,
}
