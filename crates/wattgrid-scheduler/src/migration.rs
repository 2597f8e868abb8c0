//! Migration controller — moves VMs off pressured machines and consolidates
//! lightly loaded ones.
//!
//! A migration is requested from the engine, the VM is marked migrating,
//! and the reservations of every task on it move from source to
//! destination, all before the next event is handled. Destinations must be
//! fully active with no transition in flight.

use tracing::{debug, info, warn};

use wattgrid_core::{Cluster, MachineId, MigrationConfig, TaskId, VmId};
use wattgrid_placement::Fleet;

use crate::error::SchedulerResult;
use crate::ledger::Ledger;

/// A migration the controller issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub vm: VmId,
    pub from: MachineId,
    pub to: MachineId,
    /// The source has no tasks left.
    pub source_idle: bool,
    /// The destination had no tasks before.
    pub destination_first: bool,
}

#[derive(Debug, Clone)]
pub struct MigrationController {
    consolidate: bool,
    completion_cutoff: f64,
}

impl MigrationController {
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            consolidate: config.consolidate_on_completion,
            completion_cutoff: config.consolidation_completion_cutoff,
        }
    }

    pub fn consolidates(&self) -> bool {
        self.consolidate
    }

    /// Move VMs off `machine`, largest leading task first.
    ///
    /// VMs without tasks sort last and are never moved. Each VM goes to the
    /// first eligible machine of the pool with room for its leading task.
    /// After the first migration, further VMs are only tried while the
    /// source is still overbooked.
    pub fn relieve_pressure(
        &self,
        cluster: &mut dyn Cluster,
        fleet: &mut Fleet,
        ledger: &mut Ledger,
        machine: MachineId,
    ) -> SchedulerResult<Vec<Migration>> {
        let mut ranked: Vec<(VmId, Option<u64>)> = Vec::new();
        for &vm in ledger.vms_on(machine) {
            let record = ledger.vm(vm)?;
            if record.migrating {
                continue;
            }
            let leading = match record.leading_task() {
                Some(task) => Some(ledger.task(task)?.memory),
                None => None,
            };
            ranked.push((vm, leading));
        }
        // Stable: equal footprints keep creation order, idle VMs go last.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let pool = fleet.registry.pool_of(machine)?.to_vec();
        let mut issued = Vec::new();
        for (vm, leading) in ranked {
            let Some(memory) = leading else {
                debug!(vm, machine, "idle vm skipped");
                continue;
            };
            if !issued.is_empty() && !fleet.accountant.get(machine)?.is_overcommitted() {
                break;
            }

            let mut destination = None;
            for &candidate in &pool {
                if candidate == machine {
                    continue;
                }
                let info = cluster.machine_info(candidate)?;
                if fleet.is_eligible(&info) && fleet.accountant.has_capacity(candidate, memory)? {
                    destination = Some(candidate);
                    break;
                }
            }

            match destination {
                Some(to) => issued.push(execute(cluster, fleet, ledger, vm, machine, to)?),
                None => warn!(vm, machine, memory, "no migration destination"),
            }
        }
        Ok(issued)
    }

    /// Move the furthest-behind task of the least utilised busy machine
    /// toward the most utilised machine of its pool that has room.
    ///
    /// Tasks past the completion cutoff stay put, as does everything when
    /// no destination is busier than the source.
    pub fn consolidate(
        &self,
        cluster: &mut dyn Cluster,
        fleet: &mut Fleet,
        ledger: &mut Ledger,
    ) -> SchedulerResult<Option<Migration>> {
        let mut source: Option<(u64, MachineId)> = None;
        for id in 0..cluster.machine_total() {
            let info = cluster.machine_info(id as MachineId)?;
            let capacity = fleet.accountant.get(info.id)?;
            if !fleet.is_eligible(&info) || capacity.is_idle() {
                continue;
            }
            if source.is_none_or(|(lowest, _)| capacity.reserved_mips < lowest) {
                source = Some((capacity.reserved_mips, info.id));
            }
        }
        let Some((source_load, source)) = source else {
            return Ok(None);
        };

        let mut candidate: Option<(u64, TaskId, VmId)> = None;
        for &vm in ledger.vms_on(source) {
            let record = ledger.vm(vm)?;
            if record.migrating {
                continue;
            }
            for &task in &record.tasks {
                let remaining = cluster.task_info(task)?.remaining_instructions;
                if candidate.is_none_or(|(most, _, _)| remaining > most) {
                    candidate = Some((remaining, task, vm));
                }
            }
        }
        let Some((_, task, vm)) = candidate else {
            return Ok(None);
        };

        let info = cluster.task_info(task)?;
        if info.completed_fraction() > self.completion_cutoff {
            debug!(task, vm, done = info.completed_fraction(), "task too far along to consolidate");
            return Ok(None);
        }

        let mut destination: Option<(u64, MachineId)> = None;
        for other in fleet.registry.pool_of(source)?.to_vec() {
            if other == source {
                continue;
            }
            let machine = cluster.machine_info(other)?;
            if !fleet.is_eligible(&machine) || !fleet.accountant.has_capacity(other, info.required_memory)? {
                continue;
            }
            let load = fleet.accountant.get(other)?.reserved_mips;
            if destination.is_none_or(|(highest, _)| load > highest) {
                destination = Some((load, other));
            }
        }

        match destination {
            Some((load, to)) if load > source_load => {
                execute(cluster, fleet, ledger, vm, source, to).map(Some)
            }
            _ => {
                debug!(source, vm, "no busier machine to consolidate onto");
                Ok(None)
            }
        }
    }
}

fn execute(
    cluster: &mut dyn Cluster,
    fleet: &mut Fleet,
    ledger: &mut Ledger,
    vm: VmId,
    from: MachineId,
    to: MachineId,
) -> SchedulerResult<Migration> {
    let tasks = ledger.vm(vm)?.tasks.clone();
    cluster.vm_migrate(vm, to)?;
    ledger.begin_migration(vm, to)?;

    let mut source_idle = fleet.accountant.get(from)?.is_idle();
    let destination_first = fleet.accountant.get(to)?.is_idle();
    for task in &tasks {
        let memory = ledger.task(*task)?.memory;
        let transfer = fleet.accountant.transfer(from, to, memory)?;
        source_idle = transfer.source_idle;
    }

    info!(vm, from, to, tasks = tasks.len(), "vm migration requested");
    Ok(Migration {
        vm,
        from,
        to,
        source_idle,
        destination_first,
    })
}
