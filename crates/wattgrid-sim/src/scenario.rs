//! Scenario files — the cluster, the workload, and injected warnings.
//!
//! ```toml
//! horizon = 5_000_000        # microseconds
//! check_interval = 10_000
//!
//! [timing]
//! state_change_delay = 2_000
//! migration_delay = 5_000
//!
//! [[machines]]
//! count = 4
//! arch = "x86"
//! num_cpus = 8
//! memory_size = 16384
//! performance = [3000, 2400, 1800, 1200]
//! p_state_power = [120, 90, 65, 40]
//! s_state_power = [100, 80, 60, 45, 30, 10, 0]
//!
//! [[tasks]]
//! id = 1
//! arrival = 0
//! arch = "x86"
//! memory = 1024
//! instructions = 40_000_000
//! sla = "sla1"
//! deadline = 200_000         # relative to arrival
//!
//! [[sla_warnings]]
//! at = 50_000
//! task = 1
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;

use wattgrid_core::{
    CpuArch, InMemoryCluster, MachineSpec, Priority, SlaClass, TaskId, TaskInfo, Time, Timing, VmType,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Replay stops here even if work remains.
    pub horizon: Time,
    #[serde(default = "default_check_interval")]
    pub check_interval: Time,
    #[serde(default)]
    pub timing: Timing,
    pub machines: Vec<MachineGroup>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub sla_warnings: Vec<SlaInjection>,
}

/// `count` identical machines.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineGroup {
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(flatten)]
    pub spec: MachineSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub arrival: Time,
    pub arch: CpuArch,
    #[serde(default = "default_vm")]
    pub vm: VmType,
    pub memory: u64,
    pub instructions: u64,
    #[serde(default)]
    pub priority: Priority,
    pub sla: SlaClass,
    /// Relative to `arrival`.
    pub deadline: Option<Time>,
}

impl TaskSpec {
    pub fn to_info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            required_arch: self.arch,
            required_vm: self.vm,
            required_memory: self.memory,
            priority: self.priority,
            sla: self.sla,
            total_instructions: self.instructions,
            remaining_instructions: self.instructions,
            arrival: self.arrival,
            deadline: self.deadline.map(|d| self.arrival + d),
        }
    }
}

/// An SLA warning delivered at `at` for `task`, if it is still running.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SlaInjection {
    pub at: Time,
    pub task: TaskId,
}

fn default_check_interval() -> Time {
    10_000
}

fn default_count() -> usize {
    1
}

fn default_vm() -> VmType {
    VmType::Linux
}

impl Scenario {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("loading scenario {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let scenario: Scenario = toml::from_str(content).context("parsing scenario")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.check_interval == 0 {
            bail!("check_interval must be positive");
        }
        if self.machine_count() == 0 {
            bail!("scenario has no machines");
        }

        let archs: HashSet<CpuArch> = self.machines.iter().map(|g| g.spec.arch).collect();
        let mut ids = HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id) {
                bail!("task {} is defined twice", task.id);
            }
            if !archs.contains(&task.arch) {
                bail!("task {} needs {} but no such machine exists", task.id, task.arch);
            }
        }
        if let Some(w) = self.sla_warnings.iter().find(|w| !ids.contains(&w.task)) {
            bail!("sla warning at {} names unknown task {}", w.at, w.task);
        }
        Ok(())
    }

    pub fn machine_count(&self) -> usize {
        self.machines.iter().map(|g| g.count).sum()
    }

    /// Expand the machine groups, in file order, into an engine.
    pub fn build_cluster(&self) -> InMemoryCluster {
        let specs = self
            .machines
            .iter()
            .flat_map(|g| std::iter::repeat_n(g.spec.clone(), g.count))
            .collect();
        InMemoryCluster::new(specs).with_timing(self.timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wattgrid_core::{Cluster, SState};

    const FIXTURE: &str = include_str!("../tests/fixtures/mixed-cluster.toml");

    #[test]
    fn fixture_parses() {
        let scenario = Scenario::parse(FIXTURE).unwrap();
        assert_eq!(scenario.machine_count(), 10);
        assert!(!scenario.tasks.is_empty());
        assert_eq!(scenario.timing.migration_delay, 5_000);
    }

    #[test]
    fn groups_expand_in_order() {
        let scenario = Scenario::parse(FIXTURE).unwrap();
        let cluster = scenario.build_cluster();
        assert_eq!(cluster.machine_total(), 10);
        assert_eq!(cluster.machine_info(0).unwrap().arch, CpuArch::X86);
        assert_eq!(cluster.machine_info(9).unwrap().arch, CpuArch::Arm);
        assert_eq!(cluster.machine_info(9).unwrap().s_state, SState::S0);
    }

    #[test]
    fn deadline_is_relative_to_arrival() {
        let spec = TaskSpec {
            id: 3,
            arrival: 1_000,
            arch: CpuArch::Arm,
            vm: VmType::Linux,
            memory: 64,
            instructions: 10,
            priority: Priority::High,
            sla: SlaClass::Sla0,
            deadline: Some(500),
        };
        assert_eq!(spec.to_info().deadline, Some(1_500));
    }

    #[test]
    fn rejects_task_without_matching_pool() {
        let toml_str = r#"
horizon = 100

[[machines]]
arch = "x86"
num_cpus = 1
memory_size = 1024
performance = [100, 80, 60, 40]
p_state_power = [10, 8, 6, 4]
s_state_power = [5, 4, 3, 2, 1, 1, 0]

[[tasks]]
id = 1
arrival = 0
arch = "power"
memory = 10
instructions = 10
sla = "sla2"
"#;
        let err = Scenario::parse(toml_str).unwrap_err();
        assert!(err.to_string().contains("power"));
    }

    #[test]
    fn rejects_warning_for_unknown_task() {
        let toml_str = r#"
horizon = 100

[[machines]]
arch = "arm"
num_cpus = 1
memory_size = 1024
performance = [100, 80, 60, 40]
p_state_power = [10, 8, 6, 4]
s_state_power = [5, 4, 3, 2, 1, 1, 0]

[[sla_warnings]]
at = 5
task = 9
"#;
        assert!(Scenario::parse(toml_str).is_err());
    }
}
