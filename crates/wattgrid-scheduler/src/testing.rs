//! Builders shared by the scheduler's unit tests.

use wattgrid_core::{
    CpuArch, InMemoryCluster, MachineSpec, PolicyKind, Priority, SState, SchedulerConfig, SlaClass, TaskId, TaskInfo,
    Time, VmType,
};

use crate::Scheduler;

/// Four-core x86 machine, 2000 MIPS per core at P0.
pub fn make_spec(memory: u64) -> MachineSpec {
    MachineSpec {
        arch: CpuArch::X86,
        num_cpus: 4,
        memory_size: memory,
        performance: vec![2000, 1500, 1000, 500],
        p_state_power: vec![100, 70, 45, 25],
        s_state_power: vec![80, 60, 40, 30, 20, 10, 0],
        initial_state: SState::S0,
    }
}

pub fn make_task(id: TaskId, memory: u64) -> TaskInfo {
    TaskInfo {
        id,
        required_arch: CpuArch::X86,
        required_vm: VmType::Linux,
        required_memory: memory,
        priority: Priority::Mid,
        sla: SlaClass::Sla1,
        total_instructions: 1_000_000,
        remaining_instructions: 1_000_000,
        arrival: 0,
        deadline: None,
    }
}

pub fn make_config(policy: PolicyKind) -> SchedulerConfig {
    SchedulerConfig {
        policy,
        seed: Some(7),
        ..SchedulerConfig::default()
    }
}

/// Advance the engine to `t` and deliver everything it reports, until no
/// more events come back.
pub fn settle(scheduler: &mut Scheduler<InMemoryCluster>, t: Time) {
    loop {
        let events = scheduler.cluster_mut().advance_to(t);
        if events.is_empty() {
            break;
        }
        for (at, event) in events {
            scheduler.handle(at, event).unwrap();
        }
    }
}
