use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    agent::notify::{Notification, Priority},
    config::DiskSpaceConfig,
    controller::{Reconciler, context::TrayContext},
    error::TrayError,
    event::{Event, EventPattern},
    model::Pool,
    utils::size::format_human_readable_size,
};

/// Storage pool usage. The event stream carries nothing about pools, so the
/// mirror is only refreshed by the periodic timer.
#[derive(Debug, PartialEq)]
pub struct PoolRegistry {
    levels: DiskSpaceConfig,
    pools: Vec<Pool>,
    warned: bool,
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new(DiskSpaceConfig::default())
    }
}

impl PoolRegistry {
    pub fn new(levels: DiskSpaceConfig) -> Self {
        Self {
            levels,
            pools: vec![],
            warned: false,
        }
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    /// Used and total bytes over the pools that count towards totals.
    pub fn totals(&self) -> (u64, u64) {
        self.pools
            .iter()
            .filter(|p| p.is_accounted())
            .fold((0, 0), |(used, total), p| (used + p.usage, total + p.size))
    }

    pub fn usage(&self) -> f64 {
        let (used, total) = self.totals();
        if total == 0 {
            return 0.0;
        }
        used as f64 / total as f64
    }

    pub fn warnings(&self) -> Vec<String> {
        self.pools
            .iter()
            .filter(|p| p.is_accounted() && p.ratio() >= self.levels.urgent_level)
            .map(|p| {
                format!(
                    "{:.1}% space left in pool {}",
                    (1.0 - p.ratio()) * 100.0,
                    p.name
                )
            })
            .collect()
    }

    fn level(&self, ratio: f64) -> &'static str {
        if ratio >= self.levels.urgent_level {
            "urgent"
        } else if ratio >= self.levels.warn_level {
            "warning"
        } else {
            "ok"
        }
    }

    async fn reload(&mut self, ctx: &TrayContext) -> Result<(), TrayError> {
        let mut pools = ctx.api.pools().await.map_err(TrayError::provider)?;
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        self.pools = pools;

        let warnings = self.warnings();
        if warnings.is_empty() {
            self.warned = false;
            return Ok(());
        }

        if !self.warned {
            warn!("running out of disk space: {}", warnings.join("; "));
            ctx.notify(
                Notification::new(
                    "Disk usage warning!",
                    format!("You are running out of disk space.\n{}", warnings.join("\n")),
                )
                .with_priority(Priority::High),
            );
            self.warned = true;
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for PoolRegistry {
    fn name(&self) -> &'static str {
        "disk-space"
    }

    fn subscriptions(&self) -> Vec<EventPattern> {
        vec![]
    }

    async fn seed(&mut self, ctx: &TrayContext) -> Result<(), TrayError> {
        self.reload(ctx).await?;
        info!("tracking {} storage pools", self.pools.len());
        Ok(())
    }

    async fn apply_event(&mut self, _ctx: &TrayContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    async fn refresh(&mut self, ctx: &TrayContext) -> Result<()> {
        self.reload(ctx).await?;
        Ok(())
    }

    async fn view(&mut self, _ctx: &TrayContext) -> Vec<String> {
        let (used, total) = self.totals();
        let mut lines = vec![format!(
            "Total disk usage {:.1}% ({}/{})",
            self.usage() * 100.0,
            format_human_readable_size(used),
            format_human_readable_size(total)
        )];

        for pool in &self.pools {
            if pool.is_accounted() {
                lines.push(format!(
                    "  {} {:.1}% [{}] {}/{}",
                    pool.name,
                    pool.ratio() * 100.0,
                    self.level(pool.ratio()),
                    format_human_readable_size(pool.usage),
                    format_human_readable_size(pool.size)
                ));
            } else {
                lines.push(format!("  {}", pool.name));
            }
        }

        lines.extend(self.warnings().into_iter().map(|w| format!("WARNING: {}", w)));
        lines
    }
}
