//! Best-fit-decreasing by estimated power, with pressure migration.

use tracing::debug;

use wattgrid_core::{MachineId, SState, TaskInfo};
use wattgrid_placement::{Choice, Reservation};

use super::{Context, Policy, Pressure};
use crate::error::SchedulerResult;
use crate::migration::Migration;

/// The default policy.
///
/// Places on the machine with the lowest estimated draw after placement,
/// migrates VMs off pressured machines, widens the pool's activation
/// frontier when migration alone does not help, and re-evaluates warm
/// spares whenever a machine gains its first task or loses its last.
#[derive(Debug, Default)]
pub struct BestFitDecreasing;

impl BestFitDecreasing {
    pub fn new() -> Self {
        Self
    }

    fn settle(&self, ctx: &mut Context<'_>, migration: &Migration) -> SchedulerResult<()> {
        if migration.source_idle {
            ctx.rebalance_spares(migration.from)?;
        }
        if migration.destination_first {
            ctx.rebalance_spares(migration.to)?;
        }
        ctx.tune(migration.from)?;
        ctx.tune(migration.to)
    }
}

impl Policy for BestFitDecreasing {
    fn name(&self) -> &'static str {
        "best_fit_decreasing"
    }

    fn init(&mut self, ctx: &mut Context<'_>) -> SchedulerResult<()> {
        ctx.capacity.bootstrap(ctx.cluster, ctx.fleet)?;
        Ok(())
    }

    fn place(&mut self, ctx: &mut Context<'_>, task: &TaskInfo) -> SchedulerResult<Choice> {
        let pool = ctx.pool(task.required_arch)?;
        Ok(ctx.engine.best_fit(ctx.cluster, ctx.fleet, &pool, task)?)
    }

    fn rebalance(&mut self, ctx: &mut Context<'_>, pressure: Pressure) -> SchedulerResult<Vec<Migration>> {
        let machine = pressure.machine();
        let issued = ctx.relieve_pressure(machine)?;
        for migration in &issued {
            self.settle(ctx, migration)?;
        }
        if issued.is_empty() {
            let woken = ctx.record_pressure(machine)?;
            debug!(machine, ?pressure, woken = woken.len(), "pressure not relieved by migration");
        }
        Ok(issued)
    }

    fn scale_capacity(&mut self, ctx: &mut Context<'_>) -> SchedulerResult<()> {
        ctx.capacity.periodic_check(ctx.cluster, ctx.fleet)?;
        Ok(())
    }

    fn on_state_change(
        &mut self,
        ctx: &mut Context<'_>,
        machine: MachineId,
        target: Option<SState>,
    ) -> SchedulerResult<()> {
        if target == Some(SState::S0) {
            ctx.tune(machine)?;
        }
        Ok(())
    }

    fn after_placement(
        &mut self,
        ctx: &mut Context<'_>,
        machine: MachineId,
        reservation: Reservation,
    ) -> SchedulerResult<()> {
        if reservation.first_task {
            ctx.rebalance_spares(machine)?;
        }
        ctx.tune(machine)
    }

    fn after_completion(&mut self, ctx: &mut Context<'_>, machine: MachineId, idle: bool) -> SchedulerResult<()> {
        ctx.tune(machine)?;
        if idle {
            ctx.rebalance_spares(machine)?;
        }
        if ctx.migration.consolidates()
            && let Some(migration) = ctx.consolidate()?
        {
            self.settle(ctx, &migration)?;
        }
        Ok(())
    }
}
