//! In-process cluster engine.
//!
//! `InMemoryCluster` implements [`Cluster`] with simple, deterministic
//! semantics so the scheduler can be exercised without the real simulator:
//!
//! - power-state changes and migrations complete after fixed delays and are
//!   surfaced by [`InMemoryCluster::advance_to`] as events;
//! - tasks on an `S0` machine retire instructions at the per-core rate of the
//!   machine's current P-state (shared evenly once tasks outnumber cores);
//! - energy accrues from the P-state and S-state power tables;
//! - a machine whose task memory exceeds its physical memory raises one
//!   memory warning per overcommit episode;
//! - tasks finishing after their deadline count as SLA violations.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cluster::{Cluster, ClusterError, ClusterResult};
use crate::types::*;

/// Hardware description of one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub arch: CpuArch,
    pub num_cpus: u32,
    pub memory_size: u64,
    pub performance: Vec<u64>,
    pub p_state_power: Vec<u64>,
    pub s_state_power: Vec<u64>,
    #[serde(default = "default_initial_state")]
    pub initial_state: SState,
}

fn default_initial_state() -> SState {
    SState::S0
}

/// Completion delays for asynchronous commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Timing {
    pub state_change_delay: Time,
    pub migration_delay: Time,
}

/// A command accepted by the engine, recorded in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetState { machine: MachineId, state: SState },
    SetCorePerformance { machine: MachineId, core: u32, pstate: PState },
    VmCreate { vm: VmId },
    VmAttach { vm: VmId, machine: MachineId },
    VmAddTask { vm: VmId, task: TaskId },
    VmMigrate { vm: VmId, machine: MachineId },
    VmShutdown { vm: VmId },
}

#[derive(Debug, Clone, Copy)]
enum Pending {
    StateChange { machine: MachineId, target: SState },
    Migration { vm: VmId, target: MachineId },
}

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    due: Time,
    seq: u64,
    pending: Pending,
}

#[derive(Debug, Clone, Copy, Default)]
struct SlaTally {
    finished: u32,
    violated: u32,
}

pub struct InMemoryCluster {
    machines: Vec<MachineInfo>,
    tasks: BTreeMap<TaskId, TaskInfo>,
    task_vm: HashMap<TaskId, VmId>,
    vms: BTreeMap<VmId, VmInfo>,
    next_vm: VmId,
    timing: Timing,
    now: Time,
    scheduled: Vec<Scheduled>,
    seq: u64,
    ready: Vec<(Time, Event)>,
    overcommitted: HashSet<MachineId>,
    energy_joules: f64,
    sla: HashMap<SlaClass, SlaTally>,
    commands: Vec<Command>,
}

impl InMemoryCluster {
    /// Build a cluster; machine ids follow the order of `specs`.
    pub fn new(specs: Vec<MachineSpec>) -> Self {
        let machines = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| MachineInfo {
                id: i as MachineId,
                arch: spec.arch,
                num_cpus: spec.num_cpus,
                memory_size: spec.memory_size,
                memory_used: 0,
                performance: spec.performance,
                p_state_power: spec.p_state_power,
                s_state_power: spec.s_state_power,
                s_state: spec.initial_state,
                p_state: PState::P0,
                active_tasks: 0,
                active_vms: 0,
            })
            .collect();

        Self {
            machines,
            tasks: BTreeMap::new(),
            task_vm: HashMap::new(),
            vms: BTreeMap::new(),
            next_vm: 0,
            timing: Timing::default(),
            now: 0,
            scheduled: Vec::new(),
            seq: 0,
            ready: Vec::new(),
            overcommitted: HashSet::new(),
            energy_joules: 0.0,
            sla: HashMap::new(),
            commands: Vec::new(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn now(&self) -> Time {
        self.now
    }

    /// Register a task so the scheduler can query it on arrival.
    pub fn submit_task(&mut self, task: TaskInfo) {
        self.tasks.insert(task.id, task);
    }

    /// Commands accepted so far, oldest first.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Whether an asynchronous command is still outstanding.
    pub fn has_pending(&self) -> bool {
        !self.scheduled.is_empty() || !self.ready.is_empty()
    }

    /// Due time of the earliest outstanding asynchronous completion.
    pub fn next_due(&self) -> Option<Time> {
        self.scheduled.iter().map(|s| s.due).min()
    }

    /// Put a machine into `state` immediately, bypassing the transition delay.
    pub fn force_state(&mut self, machine: MachineId, state: SState) -> ClusterResult<()> {
        self.machine_mut(machine)?.s_state = state;
        Ok(())
    }

    /// Overwrite a task's remaining instruction count.
    pub fn set_remaining_instructions(&mut self, task: TaskId, remaining: u64) -> ClusterResult<()> {
        let info = self.tasks.get_mut(&task).ok_or(ClusterError::UnknownTask(task))?;
        info.remaining_instructions = remaining.min(info.total_instructions);
        Ok(())
    }

    /// Finish a task now, detaching it from its VM.
    pub fn complete_task(&mut self, task: TaskId) -> ClusterResult<()> {
        let info = self.tasks.get_mut(&task).ok_or(ClusterError::UnknownTask(task))?;
        info.remaining_instructions = 0;
        let (sla, deadline, memory) = (info.sla, info.deadline, info.required_memory);

        let tally = self.sla.entry(sla).or_default();
        tally.finished += 1;
        if sla != SlaClass::Sla3 && deadline.is_some_and(|d| self.now > d) {
            tally.violated += 1;
        }

        if let Some(vm) = self.task_vm.remove(&task)
            && let Some(vm_info) = self.vms.get_mut(&vm)
        {
            vm_info.active_tasks.retain(|t| *t != task);
            if let Some(machine) = vm_info.machine {
                let m = &mut self.machines[machine as usize];
                m.active_tasks = m.active_tasks.saturating_sub(1);
                m.memory_used = m.memory_used.saturating_sub(memory);
                self.refresh_overcommit(machine);
            }
        }
        Ok(())
    }

    /// Advance the clock to `t`: run tasks, accrue energy, and fire every
    /// completion due by then. Returns the resulting events in time order.
    pub fn advance_to(&mut self, t: Time) -> Vec<(Time, Event)> {
        let t = t.max(self.now);
        let dt = t - self.now;
        let mut finished = Vec::new();

        if dt > 0 {
            for machine in &self.machines {
                self.energy_joules += machine_power(machine) as f64 * dt as f64 / 1_000_000.0;
            }
            for machine in 0..self.machines.len() {
                finished.extend(self.run_tasks(machine as MachineId, dt));
            }
        }
        self.now = t;

        let mut events = std::mem::take(&mut self.ready);
        for task in finished {
            if self.complete_task(task).is_ok() {
                events.push((t, Event::TaskComplete { task }));
            }
        }

        self.scheduled.sort_by_key(|s| (s.due, s.seq));
        let split = self.scheduled.partition_point(|s| s.due <= t);
        let due: Vec<Scheduled> = self.scheduled.drain(..split).collect();
        for s in due {
            if let Some(event) = self.apply(s.pending) {
                events.push((s.due, event));
            }
        }

        // Warnings raised while applying completions belong to this step too.
        events.append(&mut self.ready);
        events.sort_by_key(|(time, _)| *time);
        events
    }

    fn run_tasks(&mut self, machine: MachineId, dt: Time) -> Vec<TaskId> {
        let info = &self.machines[machine as usize];
        if !info.is_active() {
            return Vec::new();
        }
        let running: Vec<TaskId> = self
            .vms
            .values()
            .filter(|vm| vm.machine == Some(machine))
            .flat_map(|vm| vm.active_tasks.iter().copied())
            .collect();
        if running.is_empty() {
            return Vec::new();
        }

        let per_core = info.performance.get(info.p_state.index()).copied().unwrap_or(0);
        let cores = u64::from(info.num_cpus.max(1));
        let n = running.len() as u64;
        let rate = if n <= cores { per_core } else { per_core * cores / n };
        let work = rate.saturating_mul(dt);

        let mut finished = Vec::new();
        for task in running {
            if let Some(t) = self.tasks.get_mut(&task) {
                t.remaining_instructions = t.remaining_instructions.saturating_sub(work);
                if t.remaining_instructions == 0 {
                    finished.push(task);
                }
            }
        }
        finished
    }

    fn apply(&mut self, pending: Pending) -> Option<Event> {
        match pending {
            Pending::StateChange { machine, target } => {
                let m = self.machines.get_mut(machine as usize)?;
                m.s_state = target;
                debug!(machine, state = ?target, "state change complete");
                Some(Event::StateChangeComplete { machine })
            }
            Pending::Migration { vm, target } => {
                let vm_info = self.vms.get_mut(&vm)?;
                let source = vm_info.machine.replace(target);
                let memory: u64 = vm_info
                    .active_tasks
                    .iter()
                    .filter_map(|t| self.tasks.get(t))
                    .map(|t| t.required_memory)
                    .sum();
                let tasks = vm_info.active_tasks.len() as u32;

                if let Some(source) = source {
                    let m = &mut self.machines[source as usize];
                    m.active_vms = m.active_vms.saturating_sub(1);
                    m.active_tasks = m.active_tasks.saturating_sub(tasks);
                    m.memory_used = m.memory_used.saturating_sub(memory);
                    self.refresh_overcommit(source);
                }
                let m = &mut self.machines[target as usize];
                m.active_vms += 1;
                m.active_tasks += tasks;
                m.memory_used += memory;
                self.refresh_overcommit(target);

                debug!(vm, machine = target, "migration complete");
                Some(Event::MigrationComplete { vm })
            }
        }
    }

    fn schedule(&mut self, delay: Time, pending: Pending) {
        self.seq += 1;
        self.scheduled.push(Scheduled {
            due: self.now + delay,
            seq: self.seq,
            pending,
        });
    }

    fn refresh_overcommit(&mut self, machine: MachineId) {
        let m = &self.machines[machine as usize];
        if m.memory_used > m.memory_size {
            if self.overcommitted.insert(machine) {
                self.ready.push((self.now, Event::MemoryWarning { machine }));
            }
        } else {
            self.overcommitted.remove(&machine);
        }
    }

    fn machine_mut(&mut self, machine: MachineId) -> ClusterResult<&mut MachineInfo> {
        self.machines
            .get_mut(machine as usize)
            .ok_or(ClusterError::UnknownMachine(machine))
    }

    fn vm_mut(&mut self, vm: VmId) -> ClusterResult<&mut VmInfo> {
        self.vms.get_mut(&vm).ok_or(ClusterError::UnknownVm(vm))
    }
}

/// Instantaneous draw of a machine in watts.
fn machine_power(machine: &MachineInfo) -> u64 {
    if !machine.is_active() {
        return machine
            .s_state_power
            .get(machine.s_state.index())
            .copied()
            .unwrap_or(0);
    }
    let busy_cores = u64::from(machine.active_tasks.min(machine.num_cpus));
    machine.idle_power() + machine.pstate_power(machine.p_state) * busy_cores
}

impl Cluster for InMemoryCluster {
    fn machine_total(&self) -> usize {
        self.machines.len()
    }

    fn machine_info(&self, machine: MachineId) -> ClusterResult<MachineInfo> {
        self.machines
            .get(machine as usize)
            .cloned()
            .ok_or(ClusterError::UnknownMachine(machine))
    }

    fn task_info(&self, task: TaskId) -> ClusterResult<TaskInfo> {
        self.tasks.get(&task).cloned().ok_or(ClusterError::UnknownTask(task))
    }

    fn vm_info(&self, vm: VmId) -> ClusterResult<VmInfo> {
        self.vms.get(&vm).cloned().ok_or(ClusterError::UnknownVm(vm))
    }

    fn vm_create(&mut self, vm_type: VmType, arch: CpuArch) -> ClusterResult<VmId> {
        let id = self.next_vm;
        self.next_vm += 1;
        self.vms.insert(
            id,
            VmInfo {
                id,
                vm_type,
                arch,
                machine: None,
                active_tasks: Vec::new(),
            },
        );
        self.commands.push(Command::VmCreate { vm: id });
        Ok(id)
    }

    fn vm_attach(&mut self, vm: VmId, machine: MachineId) -> ClusterResult<()> {
        let arch = self.machine_mut(machine)?.arch;
        let vm_info = self.vm_mut(vm)?;
        if vm_info.arch != arch {
            return Err(ClusterError::InvalidCommand(format!(
                "vm {vm} ({}) cannot attach to {arch} machine {machine}",
                vm_info.arch
            )));
        }
        if vm_info.machine.is_some() {
            return Err(ClusterError::InvalidCommand(format!("vm {vm} is already attached")));
        }
        vm_info.machine = Some(machine);
        self.machines[machine as usize].active_vms += 1;
        self.commands.push(Command::VmAttach { vm, machine });
        Ok(())
    }

    fn vm_add_task(&mut self, vm: VmId, task: TaskId, _priority: Priority) -> ClusterResult<()> {
        let memory = self.tasks.get(&task).ok_or(ClusterError::UnknownTask(task))?.required_memory;
        let vm_info = self.vm_mut(vm)?;
        let machine = vm_info
            .machine
            .ok_or_else(|| ClusterError::InvalidCommand(format!("vm {vm} is not attached")))?;
        vm_info.active_tasks.push(task);
        self.task_vm.insert(task, vm);

        let m = &mut self.machines[machine as usize];
        m.active_tasks += 1;
        m.memory_used += memory;
        self.refresh_overcommit(machine);
        self.commands.push(Command::VmAddTask { vm, task });
        Ok(())
    }

    fn vm_migrate(&mut self, vm: VmId, machine: MachineId) -> ClusterResult<()> {
        self.machine_mut(machine)?;
        if self.vm_mut(vm)?.machine.is_none() {
            return Err(ClusterError::InvalidCommand(format!("vm {vm} is not attached")));
        }
        self.schedule(self.timing.migration_delay, Pending::Migration { vm, target: machine });
        self.commands.push(Command::VmMigrate { vm, machine });
        Ok(())
    }

    fn vm_shutdown(&mut self, vm: VmId) -> ClusterResult<()> {
        let vm_info = self.vms.remove(&vm).ok_or(ClusterError::UnknownVm(vm))?;
        for task in &vm_info.active_tasks {
            self.task_vm.remove(task);
        }
        if let Some(machine) = vm_info.machine {
            let m = &mut self.machines[machine as usize];
            m.active_vms = m.active_vms.saturating_sub(1);
        }
        self.scheduled
            .retain(|s| !matches!(s.pending, Pending::Migration { vm: v, .. } if v == vm));
        self.commands.push(Command::VmShutdown { vm });
        Ok(())
    }

    fn set_machine_state(&mut self, machine: MachineId, state: SState) -> ClusterResult<()> {
        self.machine_mut(machine)?;
        self.schedule(self.timing.state_change_delay, Pending::StateChange { machine, target: state });
        self.commands.push(Command::SetState { machine, state });
        Ok(())
    }

    fn set_core_performance(&mut self, machine: MachineId, core: u32, pstate: PState) -> ClusterResult<()> {
        let m = self.machine_mut(machine)?;
        if core >= m.num_cpus {
            return Err(ClusterError::InvalidCommand(format!(
                "machine {machine} has no core {core}"
            )));
        }
        m.p_state = pstate;
        self.commands.push(Command::SetCorePerformance { machine, core, pstate });
        Ok(())
    }

    fn sla_report(&self, class: SlaClass) -> f64 {
        match self.sla.get(&class) {
            Some(tally) if tally.finished > 0 => {
                f64::from(tally.violated) * 100.0 / f64::from(tally.finished)
            }
            _ => 0.0,
        }
    }

    fn cluster_energy(&self) -> f64 {
        self.energy_joules / 3_600_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_spec(arch: CpuArch, memory: u64) -> MachineSpec {
        MachineSpec {
            arch,
            num_cpus: 2,
            memory_size: memory,
            performance: vec![1000, 800, 600, 400],
            p_state_power: vec![100, 80, 60, 40],
            s_state_power: vec![50, 40, 30, 20, 10, 5, 0],
            initial_state: SState::S0,
        }
    }

    fn make_task(id: TaskId, memory: u64, instructions: u64) -> TaskInfo {
        TaskInfo {
            id,
            required_arch: CpuArch::X86,
            required_vm: VmType::Linux,
            required_memory: memory,
            priority: Priority::Mid,
            sla: SlaClass::Sla1,
            total_instructions: instructions,
            remaining_instructions: instructions,
            arrival: 0,
            deadline: Some(10),
        }
    }

    fn attach_task(cluster: &mut InMemoryCluster, machine: MachineId, task: TaskInfo) -> VmId {
        let id = task.id;
        cluster.submit_task(task);
        let vm = cluster.vm_create(VmType::Linux, CpuArch::X86).unwrap();
        cluster.vm_attach(vm, machine).unwrap();
        cluster.vm_add_task(vm, id, Priority::Mid).unwrap();
        vm
    }

    #[test]
    fn state_change_completes_after_delay() {
        let mut cluster = InMemoryCluster::new(vec![make_spec(CpuArch::X86, 1024)])
            .with_timing(Timing { state_change_delay: 100, migration_delay: 0 });

        cluster.set_machine_state(0, SState::S3).unwrap();
        assert!(cluster.advance_to(50).is_empty());
        assert_eq!(cluster.machine_info(0).unwrap().s_state, SState::S0);

        let events = cluster.advance_to(100);
        assert_eq!(events, vec![(100, Event::StateChangeComplete { machine: 0 })]);
        assert_eq!(cluster.machine_info(0).unwrap().s_state, SState::S3);
    }

    #[test]
    fn tasks_run_at_pstate_rate_and_complete() {
        let mut cluster = InMemoryCluster::new(vec![make_spec(CpuArch::X86, 1024)]);
        attach_task(&mut cluster, 0, make_task(1, 128, 5000));

        // P0 runs 1000 instructions per microsecond per core.
        assert!(cluster.advance_to(4).is_empty());
        assert_eq!(cluster.task_info(1).unwrap().remaining_instructions, 1000);

        let events = cluster.advance_to(5);
        assert_eq!(events, vec![(5, Event::TaskComplete { task: 1 })]);
        assert_eq!(cluster.machine_info(0).unwrap().active_tasks, 0);
        assert_eq!(cluster.machine_info(0).unwrap().memory_used, 0);
    }

    #[test]
    fn memory_overcommit_warns_once_per_episode() {
        let mut cluster = InMemoryCluster::new(vec![make_spec(CpuArch::X86, 1000)]);
        attach_task(&mut cluster, 0, make_task(1, 600, 1_000_000));
        attach_task(&mut cluster, 0, make_task(2, 600, 1_000_000));
        attach_task(&mut cluster, 0, make_task(3, 100, 1_000_000));

        let events = cluster.advance_to(0);
        assert_eq!(events, vec![(0, Event::MemoryWarning { machine: 0 })]);
    }

    #[test]
    fn migration_moves_vm_load() {
        let mut cluster = InMemoryCluster::new(vec![
            make_spec(CpuArch::X86, 1024),
            make_spec(CpuArch::X86, 1024),
        ])
        .with_timing(Timing { state_change_delay: 0, migration_delay: 10 });
        let vm = attach_task(&mut cluster, 0, make_task(1, 256, 1_000_000_000));

        cluster.vm_migrate(vm, 1).unwrap();
        assert_eq!(cluster.vm_info(vm).unwrap().machine, Some(0));

        let events = cluster.advance_to(10);
        assert!(events.contains(&(10, Event::MigrationComplete { vm })));
        assert_eq!(cluster.vm_info(vm).unwrap().machine, Some(1));
        assert_eq!(cluster.machine_info(0).unwrap().memory_used, 0);
        assert_eq!(cluster.machine_info(1).unwrap().memory_used, 256);
        assert_eq!(cluster.machine_info(1).unwrap().active_tasks, 1);
    }

    #[test]
    fn attach_rejects_architecture_mismatch() {
        let mut cluster = InMemoryCluster::new(vec![make_spec(CpuArch::Arm, 1024)]);
        let vm = cluster.vm_create(VmType::Linux, CpuArch::X86).unwrap();
        assert!(matches!(
            cluster.vm_attach(vm, 0),
            Err(ClusterError::InvalidCommand(_))
        ));
    }

    #[test]
    fn late_completion_counts_as_sla_violation() {
        let mut cluster = InMemoryCluster::new(vec![make_spec(CpuArch::X86, 1024)]);
        attach_task(&mut cluster, 0, make_task(1, 128, 1_000_000_000));
        attach_task(&mut cluster, 0, make_task(2, 128, 1_000_000_000));

        cluster.complete_task(1).unwrap();
        cluster.advance_to(20);
        cluster.complete_task(2).unwrap();

        assert!((cluster.sla_report(SlaClass::Sla1) - 50.0).abs() < 1e-9);
        assert_eq!(cluster.sla_report(SlaClass::Sla0), 0.0);
    }

    #[test]
    fn energy_accrues_from_power_tables() {
        let mut spec = make_spec(CpuArch::X86, 1024);
        spec.initial_state = SState::S5;
        spec.s_state_power = vec![50, 40, 30, 20, 10, 5, 36];
        let mut cluster = InMemoryCluster::new(vec![spec]);

        // 36 W for 100 s is one watt-hour.
        cluster.advance_to(100_000_000);
        assert!((cluster.cluster_energy() - 0.001).abs() < 1e-9);
    }
}
