//! Placement and rebalancing policies.
//!
//! The [`Scheduler`](crate::Scheduler) owns the shared state and hands each
//! policy a [`Context`] borrowing all of it. A policy only decides; VM
//! bookkeeping around a placement or completion stays in the scheduler.

mod best_fit;
mod frequency;
mod round_robin;
mod utilization;

pub use best_fit::BestFitDecreasing;
pub use frequency::FrequencyScaling;
pub use round_robin::BucketedRoundRobin;
pub use utilization::UtilizationBalance;

use wattgrid_autoscale::{CapacityController, tune_performance};
use wattgrid_core::{Cluster, CpuArch, FrequencyConfig, MachineId, PolicyKind, SState, TaskId, TaskInfo};
use wattgrid_placement::{Choice, Fleet, PlacementEngine, Reservation};

use crate::error::SchedulerResult;
use crate::ledger::Ledger;
use crate::migration::{Migration, MigrationController};
use crate::report::SchedulerStats;

/// A signal that a machine is short of capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    /// The engine reported memory overcommit.
    Memory { machine: MachineId },
    /// A task on `machine` is about to miss its SLA.
    Sla { task: TaskId, machine: MachineId },
}

impl Pressure {
    pub fn machine(&self) -> MachineId {
        match *self {
            Pressure::Memory { machine } | Pressure::Sla { machine, .. } => machine,
        }
    }
}

/// Everything a policy may read or change while handling one event.
pub struct Context<'a> {
    pub cluster: &'a mut dyn Cluster,
    pub fleet: &'a mut Fleet,
    pub ledger: &'a mut Ledger,
    pub capacity: &'a mut CapacityController,
    pub migration: &'a MigrationController,
    pub engine: &'a mut PlacementEngine,
    pub stats: &'a mut SchedulerStats,
}

impl Context<'_> {
    /// Migrate VMs off a pressured machine and count what was issued.
    pub fn relieve_pressure(&mut self, machine: MachineId) -> SchedulerResult<Vec<Migration>> {
        let issued = self
            .migration
            .relieve_pressure(self.cluster, self.fleet, self.ledger, machine)?;
        self.stats.migrations += issued.len() as u64;
        Ok(issued)
    }

    pub fn consolidate(&mut self) -> SchedulerResult<Option<Migration>> {
        let issued = self.migration.consolidate(self.cluster, self.fleet, self.ledger)?;
        if issued.is_some() {
            self.stats.migrations += 1;
        }
        Ok(issued)
    }

    /// Match `machine`'s cores to what is reserved on it.
    pub fn tune(&mut self, machine: MachineId) -> SchedulerResult<()> {
        let info = self.cluster.machine_info(machine)?;
        let capacity = *self.fleet.accountant.get(machine)?;
        if tune_performance(self.cluster, &info, &capacity)?.is_some() {
            self.stats.pstate_changes += 1;
        }
        Ok(())
    }

    /// Re-evaluate warm spares in `machine`'s pool.
    pub fn rebalance_spares(&mut self, machine: MachineId) -> SchedulerResult<()> {
        let arch = self.fleet.registry.arch_of(machine)?;
        self.capacity.rebalance_spares(self.cluster, self.fleet, arch)?;
        Ok(())
    }

    /// Count a pressure signal against `machine`'s pool.
    pub fn record_pressure(&mut self, machine: MachineId) -> SchedulerResult<Vec<MachineId>> {
        let arch = self.fleet.registry.arch_of(machine)?;
        Ok(self.capacity.record_pressure(self.cluster, self.fleet, arch)?)
    }

    /// Machines of `arch` in efficiency order.
    pub fn pool(&self, arch: CpuArch) -> SchedulerResult<Vec<MachineId>> {
        Ok(self.fleet.registry.pool(arch)?.to_vec())
    }
}

/// One placement and rebalancing strategy.
///
/// Hooks with default bodies are optional; the scheduler calls them after
/// its own bookkeeping for the event is done.
pub trait Policy {
    fn name(&self) -> &'static str;

    /// Power up the initial active set.
    fn init(&mut self, ctx: &mut Context<'_>) -> SchedulerResult<()>;

    /// Pick the machine for a new task.
    fn place(&mut self, ctx: &mut Context<'_>, task: &TaskInfo) -> SchedulerResult<Choice>;

    /// React to a memory or SLA warning.
    fn rebalance(&mut self, ctx: &mut Context<'_>, pressure: Pressure) -> SchedulerResult<Vec<Migration>>;

    /// Periodic capacity evaluation.
    fn scale_capacity(&mut self, ctx: &mut Context<'_>) -> SchedulerResult<()>;

    /// A power transition finished; `target` is where the machine was headed.
    fn on_state_change(
        &mut self,
        _ctx: &mut Context<'_>,
        _machine: MachineId,
        _target: Option<SState>,
    ) -> SchedulerResult<()> {
        Ok(())
    }

    /// A task was booked on `machine`.
    fn after_placement(
        &mut self,
        _ctx: &mut Context<'_>,
        _machine: MachineId,
        _reservation: Reservation,
    ) -> SchedulerResult<()> {
        Ok(())
    }

    /// A task on `machine` completed; `idle` when it was the last one.
    fn after_completion(&mut self, _ctx: &mut Context<'_>, _machine: MachineId, _idle: bool) -> SchedulerResult<()> {
        Ok(())
    }
}

/// Build the policy selected in the configuration.
pub fn create_policy(kind: PolicyKind, frequency: &FrequencyConfig) -> Box<dyn Policy> {
    match kind {
        PolicyKind::BestFitDecreasing => Box::new(BestFitDecreasing::new()),
        PolicyKind::BucketedRoundRobin => Box::new(BucketedRoundRobin::new()),
        PolicyKind::UtilizationBalance => Box::new(UtilizationBalance::new()),
        PolicyKind::FrequencyScaling => Box::new(FrequencyScaling::new(frequency)),
    }
}
