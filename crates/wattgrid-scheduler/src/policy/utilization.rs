//! Utilization balance — first fit over powered machines, idle timeout
//! sleep, consolidation on completion.
//!
//! Each pool is split into an on and an off half, both kept in efficiency
//! order. A machine joins the on half when its wake completes and leaves it
//! as soon as it is sent to sleep.

use std::collections::BTreeMap;

use tracing::debug;

use wattgrid_core::{CpuArch, MachineId, SState, TaskInfo};
use wattgrid_placement::{Choice, Fleet, Pool};

use super::{Context, Policy, Pressure};
use crate::error::SchedulerResult;
use crate::migration::Migration;

#[derive(Debug, Default)]
pub struct UtilizationBalance {
    on: BTreeMap<CpuArch, Pool>,
    off: BTreeMap<CpuArch, Pool>,
}

impl UtilizationBalance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `machine` into the on or off half of its pool.
    fn classify(&mut self, fleet: &Fleet, machine: MachineId, on: bool) -> SchedulerResult<()> {
        let arch = fleet.registry.arch_of(machine)?;
        let score = fleet.registry.efficiency(machine).unwrap_or(0.0);
        let (to, from) = if on {
            (&mut self.on, &mut self.off)
        } else {
            (&mut self.off, &mut self.on)
        };
        if let Some(pool) = from.get_mut(&arch) {
            pool.remove(machine);
        }
        let pool = to.entry(arch).or_insert_with(|| Pool::new(arch));
        if !pool.contains(machine) {
            pool.insert(machine, score);
        }
        Ok(())
    }

    pub fn powered(&self, arch: CpuArch) -> Vec<MachineId> {
        self.on.get(&arch).map(Pool::to_vec).unwrap_or_default()
    }
}

impl Policy for UtilizationBalance {
    fn name(&self) -> &'static str {
        "utilization_balance"
    }

    fn init(&mut self, ctx: &mut Context<'_>) -> SchedulerResult<()> {
        ctx.capacity.bootstrap(ctx.cluster, ctx.fleet)?;
        for id in 0..ctx.cluster.machine_total() {
            let info = ctx.cluster.machine_info(id as MachineId)?;
            let on = ctx
                .fleet
                .transitions
                .target(info.id)
                .map_or(info.is_active(), |target| target == SState::S0);
            self.classify(ctx.fleet, info.id, on)?;
        }
        Ok(())
    }

    /// First fit over the on half; the whole pool when nothing is on.
    fn place(&mut self, ctx: &mut Context<'_>, task: &TaskInfo) -> SchedulerResult<Choice> {
        let mut candidates = self.powered(task.required_arch);
        if candidates.is_empty() {
            candidates = ctx.pool(task.required_arch)?;
        }
        Ok(ctx.engine.first_fit(ctx.cluster, ctx.fleet, &candidates, task)?)
    }

    fn rebalance(&mut self, ctx: &mut Context<'_>, pressure: Pressure) -> SchedulerResult<Vec<Migration>> {
        match pressure {
            Pressure::Memory { machine } => ctx.relieve_pressure(machine),
            // Latched by the scheduler; the next check wakes machines.
            Pressure::Sla { .. } => Ok(Vec::new()),
        }
    }

    fn scale_capacity(&mut self, ctx: &mut Context<'_>) -> SchedulerResult<()> {
        let outcome = ctx.capacity.periodic_check(ctx.cluster, ctx.fleet)?;
        for machine in outcome.slept {
            self.classify(ctx.fleet, machine, false)?;
        }
        Ok(())
    }

    fn on_state_change(
        &mut self,
        ctx: &mut Context<'_>,
        machine: MachineId,
        target: Option<SState>,
    ) -> SchedulerResult<()> {
        if let Some(target) = target {
            debug!(machine, state = ?target, "sub-pool membership updated");
            self.classify(ctx.fleet, machine, target == SState::S0)?;
        }
        Ok(())
    }

    fn after_completion(&mut self, ctx: &mut Context<'_>, _machine: MachineId, _idle: bool) -> SchedulerResult<()> {
        if ctx.migration.consolidates() {
            ctx.consolidate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scheduler;
    use crate::testing::{make_config, make_spec, make_task, settle};
    use wattgrid_core::{Command, Event, InMemoryCluster, PolicyKind};

    fn make_scheduler(n: usize, idle_checks: u32) -> Scheduler<InMemoryCluster> {
        let cluster = InMemoryCluster::new(vec![make_spec(4096); n]);
        let mut config = make_config(PolicyKind::UtilizationBalance);
        config.capacity.idle_check_threshold = idle_checks;
        config.capacity.startup_active_fraction = 0.5;
        let mut scheduler = Scheduler::new(cluster, config).unwrap();
        settle(&mut scheduler, 0);
        scheduler
    }

    #[test]
    fn first_fit_fills_the_first_powered_machine() {
        let mut scheduler = make_scheduler(4, 100);
        for task in 1..=3 {
            scheduler.cluster_mut().submit_task(make_task(task, 1024));
            scheduler.handle(0, Event::TaskArrival { task }).unwrap();
        }
        // 3891 MB reservable: three tasks fit on machine 0.
        for task in 1..=3 {
            assert_eq!(scheduler.ledger().task(task).unwrap().machine, 0);
        }

        scheduler.cluster_mut().submit_task(make_task(4, 1024));
        scheduler.handle(0, Event::TaskArrival { task: 4 }).unwrap();
        assert_eq!(scheduler.ledger().task(4).unwrap().machine, 1);
    }

    #[test]
    fn idle_machines_leave_the_on_pool_when_slept() {
        let mut scheduler = make_scheduler(4, 1);

        // Two of four active, floor one: machine 0 stays busy, machine 1
        // sleeps after one idle check.
        scheduler.cluster_mut().submit_task(make_task(1, 256));
        scheduler.handle(0, Event::TaskArrival { task: 1 }).unwrap();
        scheduler.handle(0, Event::PeriodicCheck).unwrap();

        assert!(scheduler.cluster().commands().contains(&Command::SetState {
            machine: 1,
            state: SState::S2
        }));
        settle(&mut scheduler, 1);
        scheduler.cluster_mut().submit_task(make_task(2, 256));
        scheduler.handle(1, Event::TaskArrival { task: 2 }).unwrap();
        assert_eq!(scheduler.ledger().task(2).unwrap().machine, 0);
    }
}
