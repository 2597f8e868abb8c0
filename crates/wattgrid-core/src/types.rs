//! Domain types shared by every WattGrid crate.
//!
//! Machines, tasks and virtual machines are owned by the cluster engine and
//! referenced here through plain numeric identifiers. The `*Info` structs are
//! snapshots the engine hands out on request; the scheduler never holds on to
//! them across events.

use serde::{Deserialize, Serialize};

/// Simulated time in microseconds.
pub type Time = u64;

/// Identifier of a physical machine (dense, `0..machine_total`).
pub type MachineId = u32;

/// Identifier of a task.
pub type TaskId = u32;

/// Identifier of a virtual machine.
pub type VmId = u32;

// ── Enumerations ──────────────────────────────────────────────────

/// CPU architecture class. Every task requires exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuArch {
    X86,
    Arm,
    Power,
    Riscv,
}

impl CpuArch {
    pub const ALL: [CpuArch; 4] = [CpuArch::X86, CpuArch::Arm, CpuArch::Power, CpuArch::Riscv];
}

impl std::fmt::Display for CpuArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CpuArch::X86 => "x86",
            CpuArch::Arm => "arm",
            CpuArch::Power => "power",
            CpuArch::Riscv => "riscv",
        };
        f.write_str(name)
    }
}

/// Guest OS flavour of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmType {
    Linux,
    LinuxRt,
    Win,
    Aix,
}

/// Machine power state. `S0` is fully active; higher numbers sleep deeper,
/// `S5` is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SState {
    S0,
    S0i1,
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl SState {
    /// Index into a machine's sleep-state power table.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_active(self) -> bool {
        self == SState::S0
    }
}

/// Core performance state. `P0` is the fastest and most power hungry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PState {
    P0,
    P1,
    P2,
    P3,
}

impl PState {
    /// From least to most powerful.
    pub const SLOWEST_FIRST: [PState; 4] = [PState::P3, PState::P2, PState::P1, PState::P0];

    /// Index into a machine's performance and P-state power tables.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// SLA class of a task. `Sla3` carries no timing guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaClass {
    Sla0,
    Sla1,
    Sla2,
    Sla3,
}

/// Scheduling priority passed through to the engine when a task joins a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Mid,
    Low,
}

// ── Machine ───────────────────────────────────────────────────────

/// Static description and current state of a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub id: MachineId,
    pub arch: CpuArch,
    pub num_cpus: u32,
    /// Physical memory in MB.
    pub memory_size: u64,
    /// Memory currently used by tasks, in MB.
    pub memory_used: u64,
    /// Per-core instruction rate (MIPS), indexed by [`PState::index`].
    pub performance: Vec<u64>,
    /// Per-core power draw (W), indexed by [`PState::index`].
    pub p_state_power: Vec<u64>,
    /// Machine power draw (W) in each sleep state, indexed by [`SState::index`].
    pub s_state_power: Vec<u64>,
    pub s_state: SState,
    /// Performance state of the machine's cores.
    pub p_state: PState,
    pub active_tasks: u32,
    pub active_vms: u32,
}

impl MachineInfo {
    /// Machine-wide instruction rate at the given performance state.
    pub fn mips_at(&self, p: PState) -> u64 {
        self.performance.get(p.index()).copied().unwrap_or(0) * u64::from(self.num_cpus)
    }

    /// Machine-wide instruction rate at `P0`.
    pub fn peak_mips(&self) -> u64 {
        self.mips_at(PState::P0)
    }

    pub fn pstate_power(&self, p: PState) -> u64 {
        self.p_state_power.get(p.index()).copied().unwrap_or(0)
    }

    /// Power drawn while awake but idle. Zero when the table is missing.
    pub fn idle_power(&self) -> u64 {
        self.s_state_power.first().copied().unwrap_or(0)
    }

    /// Peak per-core performance divided by peak per-core power.
    ///
    /// Machines with incomplete tables score zero and sort last.
    pub fn efficiency(&self) -> f64 {
        match (self.performance.first(), self.p_state_power.first()) {
            (Some(&perf), Some(&power)) if power > 0 => perf as f64 / power as f64,
            _ => 0.0,
        }
    }

    /// The slowest performance state whose machine-wide rate still covers
    /// `needed_mips`, scanning from least to most powerful.
    pub fn slowest_pstate_covering(&self, needed_mips: u64) -> Option<PState> {
        PState::SLOWEST_FIRST
            .into_iter()
            .find(|p| self.mips_at(*p) >= needed_mips)
    }

    pub fn is_active(&self) -> bool {
        self.s_state.is_active()
    }
}

// ── Task ──────────────────────────────────────────────────────────

/// Static requirements and progress of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub required_arch: CpuArch,
    pub required_vm: VmType,
    /// Memory footprint in MB.
    pub required_memory: u64,
    pub priority: Priority,
    pub sla: SlaClass,
    pub total_instructions: u64,
    pub remaining_instructions: u64,
    pub arrival: Time,
    /// Absolute completion target, if the task's class carries one.
    pub deadline: Option<Time>,
}

impl TaskInfo {
    /// Fraction of the task's instructions already executed, in `0.0..=1.0`.
    pub fn completed_fraction(&self) -> f64 {
        if self.total_instructions == 0 {
            return 1.0;
        }
        let done = self.total_instructions.saturating_sub(self.remaining_instructions);
        done as f64 / self.total_instructions as f64
    }
}

// ── Virtual machine ───────────────────────────────────────────────

/// Engine-side view of a virtual machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmInfo {
    pub id: VmId,
    pub vm_type: VmType,
    pub arch: CpuArch,
    pub machine: Option<MachineId>,
    pub active_tasks: Vec<TaskId>,
}

// ── Events ────────────────────────────────────────────────────────

/// A discrete event delivered by the engine to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TaskArrival { task: TaskId },
    TaskComplete { task: TaskId },
    MemoryWarning { machine: MachineId },
    SlaWarning { task: TaskId },
    MigrationComplete { vm: VmId },
    StateChangeComplete { machine: MachineId },
    PeriodicCheck,
}
