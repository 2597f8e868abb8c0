//! Bucketed round-robin — spread tasks over the active tier, grow the tier
//! under sustained pressure.

use tracing::debug;

use wattgrid_core::TaskInfo;
use wattgrid_placement::Choice;

use super::{Context, Policy, Pressure};
use crate::error::SchedulerResult;
use crate::migration::Migration;

#[derive(Debug, Default)]
pub struct BucketedRoundRobin;

impl BucketedRoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl Policy for BucketedRoundRobin {
    fn name(&self) -> &'static str {
        "bucketed_round_robin"
    }

    fn init(&mut self, ctx: &mut Context<'_>) -> SchedulerResult<()> {
        ctx.capacity.bootstrap_tiered(ctx.cluster, ctx.fleet)?;
        Ok(())
    }

    /// Fewest tasks inside the frontier; capacity is not checked.
    fn place(&mut self, ctx: &mut Context<'_>, task: &TaskInfo) -> SchedulerResult<Choice> {
        let pool = ctx.pool(task.required_arch)?;
        let limit = ctx.capacity.frontier_limit(task.required_arch, pool.len());
        Ok(ctx.engine.fewest_tasks(ctx.cluster, ctx.fleet, &pool, limit, task)?)
    }

    /// Never migrates; every signal counts toward widening the frontier.
    fn rebalance(&mut self, ctx: &mut Context<'_>, pressure: Pressure) -> SchedulerResult<Vec<Migration>> {
        let woken = ctx.record_pressure(pressure.machine())?;
        if !woken.is_empty() {
            debug!(?pressure, woken = woken.len(), "frontier widened");
        }
        Ok(Vec::new())
    }

    fn scale_capacity(&mut self, ctx: &mut Context<'_>) -> SchedulerResult<()> {
        // SLA warnings were already counted as pressure.
        ctx.capacity.take_sla_latch();
        Ok(())
    }
}
