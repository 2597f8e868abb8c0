//! The cluster engine interface.
//!
//! The scheduler never owns machines, tasks or VMs. It reads their state and
//! issues commands through [`Cluster`]. Commands that change power state or
//! move a VM are asynchronous: they return as soon as the engine has accepted
//! them, and completion arrives later as an
//! [`Event::StateChangeComplete`](crate::Event::StateChangeComplete) or
//! [`Event::MigrationComplete`](crate::Event::MigrationComplete).

use thiserror::Error;

use crate::types::*;

/// Result type alias for engine calls.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors reported by the cluster engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("unknown machine: {0}")]
    UnknownMachine(MachineId),

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("unknown vm: {0}")]
    UnknownVm(VmId),

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// Commands and queries the scheduler may invoke on the engine.
pub trait Cluster {
    /// Number of machines. Identifiers are `0..machine_total()`.
    fn machine_total(&self) -> usize;

    fn machine_info(&self, machine: MachineId) -> ClusterResult<MachineInfo>;

    fn task_info(&self, task: TaskId) -> ClusterResult<TaskInfo>;

    fn vm_info(&self, vm: VmId) -> ClusterResult<VmInfo>;

    fn vm_create(&mut self, vm_type: VmType, arch: CpuArch) -> ClusterResult<VmId>;

    fn vm_attach(&mut self, vm: VmId, machine: MachineId) -> ClusterResult<()>;

    fn vm_add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> ClusterResult<()>;

    /// Start moving `vm` to `machine`. Completion is reported asynchronously.
    fn vm_migrate(&mut self, vm: VmId, machine: MachineId) -> ClusterResult<()>;

    fn vm_shutdown(&mut self, vm: VmId) -> ClusterResult<()>;

    /// Request a power-state transition. Completion is reported asynchronously.
    fn set_machine_state(&mut self, machine: MachineId, state: SState) -> ClusterResult<()>;

    fn set_core_performance(&mut self, machine: MachineId, core: u32, pstate: PState) -> ClusterResult<()>;

    /// Percentage of tasks of `class` that violated their SLA so far.
    fn sla_report(&self, class: SlaClass) -> f64;

    /// Cumulative cluster energy in kWh.
    fn cluster_energy(&self) -> f64;
}

/// Set every core of `machine` to `pstate`.
pub fn set_machine_performance(
    cluster: &mut dyn Cluster,
    machine: &MachineInfo,
    pstate: PState,
) -> ClusterResult<()> {
    for core in 0..machine.num_cpus {
        cluster.set_core_performance(machine.id, core, pstate)?;
    }
    Ok(())
}
