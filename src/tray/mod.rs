use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use crate::{
    agent::{job::JobOutcome, notify::Notification},
    constants::{DEFAULT_EVENT_BUFFER, DEFAULT_REFRESH_INTERVAL_SECS},
    controller::{
        Reconciler,
        context::{Intent, TrayContext},
    },
    event::{
        Event, EventKind, EventPattern,
        pump::{EventPump, ReconnectConfig},
        source::EventSource,
    },
};

pub struct TrayConfig {
    pub refresh_interval: Duration,
    pub reconnect: ReconnectConfig,
    pub event_buffer: usize,
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            reconnect: ReconnectConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Composition root of one widget: owns the reconciler and feeds it events,
/// worker outcomes, control intents and refresh ticks from a single task.
pub struct Tray<R: Reconciler> {
    reconciler: R,
    ctx: TrayContext,
    outcomes: mpsc::UnboundedReceiver<JobOutcome>,
    source: Option<Arc<dyn EventSource>>,
    config: TrayConfig,
}

impl<R: Reconciler> Tray<R> {
    pub fn new(
        reconciler: R,
        ctx: TrayContext,
        outcomes: mpsc::UnboundedReceiver<JobOutcome>,
        source: Option<Arc<dyn EventSource>>,
        config: TrayConfig,
    ) -> Self {
        Self {
            reconciler,
            ctx,
            outcomes,
            source,
            config,
        }
    }

    /// Seeds the reconciler, then processes input until `shutdown` resolves.
    /// Status listings are sent to `views`.
    pub async fn run(
        self,
        mut intents: mpsc::Receiver<Intent>,
        views: mpsc::UnboundedSender<Vec<String>>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let Tray {
            mut reconciler,
            ctx,
            mut outcomes,
            source,
            config,
        } = self;

        reconciler.seed(&ctx).await?;
        info!("{} widget seeded", reconciler.name());

        let subscriptions = reconciler.subscriptions();

        // Without a source the receiver must stay pending rather than close.
        let (_idle, mut events, pump) = match source {
            Some(source) => {
                let (rx, handle) =
                    EventPump::spawn(source, config.reconnect, config.event_buffer);
                (None, rx, Some(handle))
            }
            None => {
                let (tx, rx) = mpsc::channel(1);
                (Some(tx), rx, None)
            }
        };

        let period = config.refresh_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        let mut intents_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down {} widget", reconciler.name());
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        warn!("event pump stopped");
                        break;
                    };
                    dispatch(&mut reconciler, &ctx, &subscriptions, event).await;
                }
                Some(outcome) = outcomes.recv() => {
                    reconciler.apply_outcome(&ctx, outcome);
                }
                intent = intents.recv(), if intents_open => {
                    match intent {
                        Some(Intent::Status) => {
                            let lines = reconciler.view(&ctx).await;
                            if views.send(lines).is_err() {
                                debug!("status output closed");
                            }
                        }
                        Some(intent) => {
                            let description = intent.to_string();
                            if let Err(e) = reconciler.handle_intent(&ctx, intent).await {
                                warn!("{} rejected: {}", description, e);
                                ctx.notify(Notification::error("Error", e.to_string()));
                            }
                        }
                        None => {
                            debug!("control channel closed");
                            intents_open = false;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = reconciler.refresh(&ctx).await {
                        warn!("periodic refresh failed: {}", e);
                    }
                }
            }
        }

        if let Some(pump) = pump {
            pump.abort();
        }

        Ok(())
    }
}

async fn dispatch<R: Reconciler>(
    reconciler: &mut R,
    ctx: &TrayContext,
    subscriptions: &[EventPattern],
    event: Event,
) {
    if event.kind == EventKind::ConnectionEstablished {
        info!("event stream connected, resynchronising {}", reconciler.name());
        if let Err(e) = reconciler.resync(ctx).await {
            warn!("resync failed: {}", e);
        }
        return;
    }

    if !EventPattern::any_matches(subscriptions, &event.name) {
        return;
    }

    debug!("applying {} on {:?}", event.name, event.subject);
    if let Err(e) = reconciler.apply_event(ctx, &event).await {
        warn!("failed to apply {}: {}", event.name, e);
    }
}
