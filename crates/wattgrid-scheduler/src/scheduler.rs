//! The event-driven scheduler.
//!
//! Owns every piece of scheduler state and the cluster handle. Events are
//! handled one at a time and each runs to completion, so the accounting a
//! handler sees is always consistent with every command issued so far.

use tracing::{debug, info, warn};

use wattgrid_autoscale::{CapacityController, ScalingStats};
use wattgrid_core::{Cluster, Event, MachineId, SchedulerConfig, SlaClass, TaskId, Time, VmId};
use wattgrid_placement::{ChoiceKind, Fleet, PlacementEngine};

use crate::error::{SchedulerError, SchedulerResult};
use crate::ledger::Ledger;
use crate::migration::MigrationController;
use crate::policy::{Context, Policy, Pressure, create_policy};
use crate::report::{SchedulerStats, ShutdownReport, SlaSummary};

pub struct Scheduler<C: Cluster> {
    cluster: C,
    fleet: Fleet,
    ledger: Ledger,
    capacity: CapacityController,
    migration: MigrationController,
    engine: PlacementEngine,
    policy: Box<dyn Policy>,
    stats: SchedulerStats,
    now: Time,
}

impl<C: Cluster> Scheduler<C> {
    /// Build the scheduler over `cluster` and power up the initial active
    /// set. The fallback generator is seeded from `config.seed`.
    pub fn new(cluster: C, config: SchedulerConfig) -> SchedulerResult<Self> {
        let engine = PlacementEngine::from_seed(config.seed);
        Self::with_engine(cluster, config, engine)
    }

    pub fn with_engine(cluster: C, config: SchedulerConfig, engine: PlacementEngine) -> SchedulerResult<Self> {
        let fleet = Fleet::build(&cluster, &config.placement)?;
        let policy = create_policy(config.policy, &config.frequency);
        let mut scheduler = Self {
            cluster,
            fleet,
            ledger: Ledger::new(),
            capacity: CapacityController::new(&config.capacity, config.placement.initial_pstate),
            migration: MigrationController::new(&config.migration),
            engine,
            policy,
            stats: SchedulerStats::default(),
            now: 0,
        };

        let (policy, mut ctx) = scheduler.split();
        policy.init(&mut ctx)?;
        info!(
            policy = scheduler.policy.name(),
            machines = scheduler.fleet.registry.machine_count(),
            "scheduler initialized"
        );
        Ok(scheduler)
    }

    fn split(&mut self) -> (&mut dyn Policy, Context<'_>) {
        let ctx = Context {
            cluster: &mut self.cluster,
            fleet: &mut self.fleet,
            ledger: &mut self.ledger,
            capacity: &mut self.capacity,
            migration: &self.migration,
            engine: &mut self.engine,
            stats: &mut self.stats,
        };
        (self.policy.as_mut(), ctx)
    }

    // ── Events ────────────────────────────────────────────────────────

    pub fn handle(&mut self, now: Time, event: Event) -> SchedulerResult<()> {
        self.now = now;
        debug!(now, ?event, "event");
        match event {
            Event::TaskArrival { task } => self.on_new_task(task),
            Event::TaskComplete { task } => self.on_task_complete(task),
            Event::MemoryWarning { machine } => self.on_memory_warning(machine),
            Event::SlaWarning { task } => self.on_sla_warning(task),
            Event::MigrationComplete { vm } => self.on_migration_complete(vm),
            Event::StateChangeComplete { machine } => self.on_state_change_complete(machine),
            Event::PeriodicCheck => self.on_periodic_check(),
        }
    }

    /// Place a new task: pick a machine, wake it if needed, reuse or create
    /// a VM of the task's type there, and book the task.
    pub fn on_new_task(&mut self, task: TaskId) -> SchedulerResult<()> {
        if self.ledger.contains_task(task) {
            return Err(SchedulerError::DuplicateTask(task));
        }
        let info = self.cluster.task_info(task)?;

        let (policy, mut ctx) = self.split();
        let choice = policy.place(&mut ctx, &info)?;
        let machine = choice.machine;
        match choice.kind {
            ChoiceKind::Fit => {}
            ChoiceKind::Random => ctx.stats.random_placements += 1,
            ChoiceKind::Dormant => {
                let target = ctx.cluster.machine_info(machine)?;
                ctx.capacity.power_on(ctx.cluster, ctx.fleet, &target)?;
                ctx.stats.dormant_placements += 1;
            }
        }

        let vm = match ctx.ledger.find_reusable_vm(machine, info.required_vm) {
            Some(vm) => {
                ctx.stats.vms_reused += 1;
                vm
            }
            None => {
                let vm = ctx.cluster.vm_create(info.required_vm, info.required_arch)?;
                ctx.cluster.vm_attach(vm, machine)?;
                ctx.ledger.record_vm(vm, info.required_vm, info.required_arch, machine);
                ctx.stats.vms_created += 1;
                vm
            }
        };
        ctx.cluster.vm_add_task(vm, task, info.priority)?;
        ctx.ledger.assign(task, vm, info.required_memory)?;
        let reservation = ctx.fleet.accountant.reserve(machine, info.required_memory)?;
        ctx.stats.placements += 1;
        debug!(task, machine, vm, kind = ?choice.kind, memory = info.required_memory, "task placed");

        policy.after_placement(&mut ctx, machine, reservation)
    }

    /// Release the task's reservation and retire its VM if it was the last
    /// task there.
    pub fn on_task_complete(&mut self, task: TaskId) -> SchedulerResult<()> {
        let (record, vm_empty) = self.ledger.complete(task)?;
        let idle = self.fleet.accountant.release(record.machine, record.memory)?;
        debug!(task, machine = record.machine, vm = record.vm, idle, "task complete");
        if vm_empty {
            self.retire_vm(record.vm)?;
        }

        let (policy, mut ctx) = self.split();
        policy.after_completion(&mut ctx, record.machine, idle)
    }

    pub fn on_memory_warning(&mut self, machine: MachineId) -> SchedulerResult<()> {
        warn!(machine, "memory overcommitted");
        let (policy, mut ctx) = self.split();
        let issued = policy.rebalance(&mut ctx, Pressure::Memory { machine })?;
        debug!(machine, migrations = issued.len(), "memory pressure handled");
        Ok(())
    }

    /// Latch the warning for the next capacity check and let the policy
    /// relieve the task's machine.
    pub fn on_sla_warning(&mut self, task: TaskId) -> SchedulerResult<()> {
        let machine = self.ledger.task(task)?.machine;
        warn!(task, machine, "sla at risk");
        self.capacity.latch_sla();
        let (policy, mut ctx) = self.split();
        let issued = policy.rebalance(&mut ctx, Pressure::Sla { task, machine })?;
        debug!(task, migrations = issued.len(), "sla pressure handled");
        Ok(())
    }

    pub fn on_migration_complete(&mut self, vm: VmId) -> SchedulerResult<()> {
        let retire = self.ledger.finish_migration(vm)?;
        info!(vm, machine = self.ledger.vm(vm)?.machine, "vm migration complete");
        if retire {
            self.shutdown_vm(vm)?;
        }
        Ok(())
    }

    pub fn on_state_change_complete(&mut self, machine: MachineId) -> SchedulerResult<()> {
        let target = self.capacity.on_state_change(&mut self.fleet, machine);
        let (policy, mut ctx) = self.split();
        policy.on_state_change(&mut ctx, machine, target)
    }

    pub fn on_periodic_check(&mut self) -> SchedulerResult<()> {
        let (policy, mut ctx) = self.split();
        policy.scale_capacity(&mut ctx)
    }

    // ── VMs ───────────────────────────────────────────────────────────

    /// Shut down an empty VM now, or once its migration lands.
    fn retire_vm(&mut self, vm: VmId) -> SchedulerResult<()> {
        if self.ledger.vm(vm)?.migrating {
            debug!(vm, "retiring after migration");
            return self.ledger.mark_retire(vm);
        }
        self.shutdown_vm(vm)
    }

    fn shutdown_vm(&mut self, vm: VmId) -> SchedulerResult<()> {
        self.cluster.vm_shutdown(vm)?;
        let record = self.ledger.remove_vm(vm)?;
        self.stats.vms_retired += 1;
        debug!(vm, machine = record.machine, "vm shut down");
        Ok(())
    }

    // ── Shutdown ──────────────────────────────────────────────────────

    /// Shut down every remaining VM and collect the final figures.
    pub fn shutdown(&mut self, now: Time) -> SchedulerResult<ShutdownReport> {
        self.now = now;
        let vms = self.ledger.vm_ids();
        for vm in &vms {
            self.cluster.vm_shutdown(*vm)?;
            self.ledger.remove_vm(*vm)?;
        }

        let scaling = self.capacity.stats();
        let report = ShutdownReport {
            policy: self.policy.name().to_string(),
            simulated_seconds: now as f64 / 1_000_000.0,
            energy_kwh: self.cluster.cluster_energy(),
            sla: SlaSummary {
                sla0: self.cluster.sla_report(SlaClass::Sla0),
                sla1: self.cluster.sla_report(SlaClass::Sla1),
                sla2: self.cluster.sla_report(SlaClass::Sla2),
            },
            stats: self.stats,
            wakes: scaling.wakes,
            sleeps: scaling.sleeps,
            vms_shut_down: vms.len(),
        };
        info!(
            policy = %report.policy,
            energy_kwh = report.energy_kwh,
            seconds = report.simulated_seconds,
            "scheduler shut down"
        );
        Ok(report)
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn cluster_mut(&mut self) -> &mut C {
        &mut self.cluster
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn scaling_stats(&self) -> ScalingStats {
        self.capacity.stats()
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Time of the last handled event.
    pub fn now(&self) -> Time {
        self.now
    }
}
