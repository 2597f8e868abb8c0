//! Frequency scaling — every machine on, one cluster-wide P-state.

use tracing::info;

use wattgrid_autoscale::FrequencyScaler;
use wattgrid_core::{FrequencyConfig, MachineId, SState, TaskInfo};
use wattgrid_placement::Choice;

use super::{Context, Policy, Pressure};
use crate::error::SchedulerResult;
use crate::migration::Migration;

#[derive(Debug)]
pub struct FrequencyScaling {
    scaler: FrequencyScaler,
}

impl FrequencyScaling {
    pub fn new(config: &FrequencyConfig) -> Self {
        Self {
            scaler: FrequencyScaler::new(config),
        }
    }
}

impl Policy for FrequencyScaling {
    fn name(&self) -> &'static str {
        "frequency_scaling"
    }

    fn init(&mut self, ctx: &mut Context<'_>) -> SchedulerResult<()> {
        let mut woken = 0;
        for id in 0..ctx.cluster.machine_total() {
            let info = ctx.cluster.machine_info(id as MachineId)?;
            if ctx.fleet.request_state(ctx.cluster, &info, SState::S0)? {
                woken += 1;
            }
        }
        let pushed = self.scaler.push_all(ctx.cluster, ctx.fleet)?;
        info!(woken, pushed, level = ?self.scaler.current(), "all machines powered");
        Ok(())
    }

    fn place(&mut self, ctx: &mut Context<'_>, task: &TaskInfo) -> SchedulerResult<Choice> {
        let pool = ctx.pool(task.required_arch)?;
        Ok(ctx.engine.first_fit(ctx.cluster, ctx.fleet, &pool, task)?)
    }

    /// Warnings only matter through the SLA latch.
    fn rebalance(&mut self, _ctx: &mut Context<'_>, _pressure: Pressure) -> SchedulerResult<Vec<Migration>> {
        Ok(Vec::new())
    }

    fn scale_capacity(&mut self, ctx: &mut Context<'_>) -> SchedulerResult<()> {
        let latched = ctx.capacity.take_sla_latch();
        if self.scaler.apply(ctx.cluster, ctx.fleet, latched)?.is_some() {
            ctx.stats.pstate_changes += 1;
        }
        Ok(())
    }

    fn on_state_change(
        &mut self,
        ctx: &mut Context<'_>,
        machine: MachineId,
        target: Option<SState>,
    ) -> SchedulerResult<()> {
        if target == Some(SState::S0) {
            let info = ctx.cluster.machine_info(machine)?;
            self.scaler.push_to(ctx.cluster, ctx.fleet, &info)?;
        }
        Ok(())
    }
}
