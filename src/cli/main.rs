mod cmd;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use qtray::{
    agent::{
        admin::{AdminApi, file::FileAdmin},
        command::shell::ShellCommandExecutor,
        job::{CommandWorker, JobOutcome},
        notify::{CommandNotifier, LogNotifier, Notifier},
    },
    config::Config,
    constants::DEFAULT_EVENT_BUFFER,
    controller::{
        Reconciler,
        context::{Intent, TrayContext},
        device::DeviceRegistry,
        domain::DomainRegistry,
        pool::PoolRegistry,
        update::UpdateTracker,
    },
    event::source::{EventSource, UnixSocketSource},
    tray::{Tray, TrayConfig},
    utils::tracing::init_tracing,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{mpsc, oneshot},
};
use tracing::{error, info, warn};

use crate::cmd::{Cli, Widget};

/// Reads control intents line by line until stdin is closed.
async fn read_intents(tx: mpsc::Sender<Intent>, eof: oneshot::Sender<()>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match Intent::parse(line) {
                    Ok(intent) => {
                        if tx.send(intent).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("ignoring {:?}: {}", line, e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("failed to read control input: {}", e);
                break;
            }
        }
    }

    let _ = eof.send(());
}

async fn print_views(mut rx: mpsc::UnboundedReceiver<Vec<String>>) {
    while let Some(lines) = rx.recv().await {
        for line in lines {
            println!("{}", line);
        }
    }
}

async fn serve<R: Reconciler>(
    reconciler: R,
    ctx: TrayContext,
    outcomes: mpsc::UnboundedReceiver<JobOutcome>,
    source: Option<Arc<dyn EventSource>>,
    config: TrayConfig,
    exit_on_eof: bool,
) -> Result<()> {
    let (intents, intents_rx) = mpsc::channel(16);
    let (views, views_rx) = mpsc::unbounded_channel();
    let (eof_tx, eof_rx) = oneshot::channel();

    tokio::spawn(read_intents(intents, eof_tx));
    tokio::spawn(print_views(views_rx));

    let shutdown = async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("failed to listen for ctrl-c: {}", e);
                }
            }
            _ = eof_rx, if exit_on_eof => {
                info!("control input closed");
            }
        }
    };

    Tray::new(reconciler, ctx, outcomes, source, config)
        .run(intents_rx, views, shutdown)
        .await
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config_path).await?;
    info!("loaded config from {}", config.config_path.display());

    let api: Arc<dyn AdminApi> = Arc::new(FileAdmin::new(config.absolute_snapshot_path()));
    let notifier: Arc<dyn Notifier> = match &config.notify_command {
        Some(template) => Arc::new(CommandNotifier::new(template.clone())),
        None => Arc::new(LogNotifier),
    };
    let executor = Arc::new(ShellCommandExecutor::new(
        config.commands.clone(),
        config.devices.settle_delay(),
    ));

    let (worker, outcomes, worker_handle) = CommandWorker::spawn(executor, notifier.clone());
    let ctx = TrayContext::new(api, notifier, worker);

    let source: Arc<dyn EventSource> =
        Arc::new(UnixSocketSource::new(config.absolute_event_socket()));
    let tray_config = TrayConfig {
        refresh_interval: config.refresh_interval(),
        reconnect: (&config.reconnect).into(),
        event_buffer: DEFAULT_EVENT_BUFFER,
    };

    let exit_on_eof = cli.exit_on_eof;
    let result = match cli.widget {
        Widget::Domains => {
            let registry = DomainRegistry::new();
            serve(registry, ctx, outcomes, Some(source), tray_config, exit_on_eof).await
        }
        Widget::Devices => {
            let registry = DeviceRegistry::new(config.devices.classes.clone());
            serve(registry, ctx, outcomes, Some(source), tray_config, exit_on_eof).await
        }
        Widget::Updates => {
            let tracker = UpdateTracker::new();
            serve(tracker, ctx, outcomes, Some(source), tray_config, exit_on_eof).await
        }
        Widget::DiskSpace => {
            let registry = PoolRegistry::new(config.disk_space.clone());
            serve(registry, ctx, outcomes, None, tray_config, exit_on_eof).await
        }
    };

    worker_handle.abort();
    result
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
