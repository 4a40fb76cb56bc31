pub mod context;

pub mod device;
pub mod domain;
pub mod pool;
pub mod update;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::{
    agent::job::JobOutcome,
    controller::context::{Intent, TrayContext},
    error::TrayError,
    event::{Event, EventPattern},
};

/// One widget's in-memory mirror of backend state.
///
/// A reconciler is owned by a single processing task: every method takes
/// `&mut self` and is called strictly sequentially, so implementations keep
/// plain collections without locks. Commands are never run inline; they are
/// handed to the context's worker and the result comes back through
/// [`Reconciler::apply_outcome`].
#[async_trait]
pub trait Reconciler: Send {
    fn name(&self) -> &'static str;

    /// Event names this reconciler wants to see. Other events are not routed.
    fn subscriptions(&self) -> Vec<EventPattern>;

    /// Builds the mirror from a full snapshot.
    async fn seed(&mut self, ctx: &TrayContext) -> Result<(), TrayError>;

    /// Called after the event stream reconnects.
    async fn resync(&mut self, ctx: &TrayContext) -> Result<(), TrayError> {
        self.seed(ctx).await
    }

    async fn apply_event(&mut self, ctx: &TrayContext, event: &Event) -> Result<()>;

    /// Periodic re-read of data the event stream does not carry.
    async fn refresh(&mut self, _ctx: &TrayContext) -> Result<()> {
        Ok(())
    }

    async fn handle_intent(&mut self, _ctx: &TrayContext, intent: Intent) -> Result<()> {
        bail!("{} widget does not handle {}", self.name(), intent)
    }

    fn apply_outcome(&mut self, _ctx: &TrayContext, _outcome: JobOutcome) {}

    /// Human readable listing of the current state.
    async fn view(&mut self, ctx: &TrayContext) -> Vec<String>;
}
