//! Task and VM bookkeeping.
//!
//! Every live task maps to exactly one machine and one VM. A VM record
//! follows its VM through migrations: the machine is updated when the
//! migration is requested, and the `migrating` flag stays set until the
//! engine reports completion.

use std::collections::{BTreeMap, HashMap};

use wattgrid_core::{CpuArch, MachineId, TaskId, VmId, VmType};

use crate::error::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRecord {
    pub machine: MachineId,
    pub vm: VmId,
    /// Memory reserved for the task, in MB.
    pub memory: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRecord {
    pub vm_type: VmType,
    pub arch: CpuArch,
    pub machine: MachineId,
    /// Tasks in the order they joined; the first is the leading task.
    pub tasks: Vec<TaskId>,
    pub migrating: bool,
    /// Shut the VM down as soon as its migration completes.
    pub retire_after_migration: bool,
}

impl VmRecord {
    pub fn leading_task(&self) -> Option<TaskId> {
        self.tasks.first().copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    tasks: HashMap<TaskId, TaskRecord>,
    vms: BTreeMap<VmId, VmRecord>,
    by_machine: HashMap<MachineId, Vec<VmId>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a VM the engine just created and attached to `machine`.
    pub fn record_vm(&mut self, vm: VmId, vm_type: VmType, arch: CpuArch, machine: MachineId) {
        self.vms.insert(
            vm,
            VmRecord {
                vm_type,
                arch,
                machine,
                tasks: Vec::new(),
                migrating: false,
                retire_after_migration: false,
            },
        );
        self.by_machine.entry(machine).or_default().push(vm);
    }

    /// Record `task` as running in `vm`.
    pub fn assign(&mut self, task: TaskId, vm: VmId, memory: u64) -> SchedulerResult<()> {
        if self.tasks.contains_key(&task) {
            return Err(SchedulerError::DuplicateTask(task));
        }
        let record = self.vms.get_mut(&vm).ok_or(SchedulerError::UnknownVm(vm))?;
        record.tasks.push(task);
        self.tasks.insert(
            task,
            TaskRecord {
                machine: record.machine,
                vm,
                memory,
            },
        );
        Ok(())
    }

    /// Drop `task`. Returns its record and whether its VM is now empty.
    pub fn complete(&mut self, task: TaskId) -> SchedulerResult<(TaskRecord, bool)> {
        let record = self.tasks.remove(&task).ok_or(SchedulerError::UnknownTask(task))?;
        let vm = self
            .vms
            .get_mut(&record.vm)
            .ok_or(SchedulerError::UnknownVm(record.vm))?;
        vm.tasks.retain(|t| *t != task);
        Ok((record, vm.tasks.is_empty()))
    }

    pub fn task(&self, task: TaskId) -> SchedulerResult<&TaskRecord> {
        self.tasks.get(&task).ok_or(SchedulerError::UnknownTask(task))
    }

    pub fn contains_task(&self, task: TaskId) -> bool {
        self.tasks.contains_key(&task)
    }

    pub fn vm(&self, vm: VmId) -> SchedulerResult<&VmRecord> {
        self.vms.get(&vm).ok_or(SchedulerError::UnknownVm(vm))
    }

    /// VMs currently assigned to `machine`, in creation order.
    pub fn vms_on(&self, machine: MachineId) -> &[VmId] {
        self.by_machine.get(&machine).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A VM on `machine` of `vm_type` that can take another task.
    pub fn find_reusable_vm(&self, machine: MachineId, vm_type: VmType) -> Option<VmId> {
        self.vms_on(machine).iter().copied().find(|vm| {
            self.vms
                .get(vm)
                .is_some_and(|r| r.vm_type == vm_type && !r.migrating && !r.retire_after_migration)
        })
    }

    /// Mark `vm` as migrating to `to` and move it and its tasks there.
    pub fn begin_migration(&mut self, vm: VmId, to: MachineId) -> SchedulerResult<()> {
        let record = self.vms.get_mut(&vm).ok_or(SchedulerError::UnknownVm(vm))?;
        if record.migrating {
            return Err(SchedulerError::AlreadyMigrating(vm));
        }
        record.migrating = true;
        let from = std::mem::replace(&mut record.machine, to);
        for task in &record.tasks {
            if let Some(t) = self.tasks.get_mut(task) {
                t.machine = to;
            }
        }

        if let Some(list) = self.by_machine.get_mut(&from) {
            list.retain(|v| *v != vm);
        }
        self.by_machine.entry(to).or_default().push(vm);
        Ok(())
    }

    /// Clear the migrating flag. Returns whether the VM should now be shut
    /// down.
    pub fn finish_migration(&mut self, vm: VmId) -> SchedulerResult<bool> {
        let record = self.vms.get_mut(&vm).ok_or(SchedulerError::UnknownVm(vm))?;
        if !record.migrating {
            return Err(SchedulerError::NotMigrating(vm));
        }
        record.migrating = false;
        Ok(record.retire_after_migration)
    }

    pub fn mark_retire(&mut self, vm: VmId) -> SchedulerResult<()> {
        let record = self.vms.get_mut(&vm).ok_or(SchedulerError::UnknownVm(vm))?;
        record.retire_after_migration = true;
        Ok(())
    }

    pub fn remove_vm(&mut self, vm: VmId) -> SchedulerResult<VmRecord> {
        let record = self.vms.remove(&vm).ok_or(SchedulerError::UnknownVm(vm))?;
        if let Some(list) = self.by_machine.get_mut(&record.machine) {
            list.retain(|v| *v != vm);
        }
        Ok(record)
    }

    pub fn vm_ids(&self) -> Vec<VmId> {
        self.vms.keys().copied().collect()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }
}
