//! The scheduler's own view of the cluster: pools, reservations, and
//! in-flight power transitions, kept together because every controller
//! reads all three.

use tracing::{debug, info};

use wattgrid_core::{Cluster, MachineId, MachineInfo, PlacementConfig, SState};

use crate::accountant::CapacityAccountant;
use crate::error::PlacementResult;
use crate::registry::ResourcePoolRegistry;
use crate::transitions::TransitionTracker;

#[derive(Debug, Clone)]
pub struct Fleet {
    pub registry: ResourcePoolRegistry,
    pub accountant: CapacityAccountant,
    pub transitions: TransitionTracker,
}

impl Fleet {
    /// Build pools and empty reservations for every machine the engine knows.
    pub fn build(cluster: &dyn Cluster, config: &PlacementConfig) -> PlacementResult<Self> {
        let registry = ResourcePoolRegistry::build(cluster)?;
        let mut accountant = CapacityAccountant::new(config.task_mips_cost);
        for id in 0..cluster.machine_total() {
            let info = cluster.machine_info(id as MachineId)?;
            accountant.register(&info, config.memory_headroom);
        }
        Ok(Self {
            registry,
            accountant,
            transitions: TransitionTracker::new(),
        })
    }

    /// A machine takes new work only while fully active with no transition
    /// in flight.
    pub fn is_eligible(&self, info: &MachineInfo) -> bool {
        info.is_active() && !self.transitions.is_pending(info.id)
    }

    /// Ask the engine to move `info` to `state`.
    ///
    /// Returns `false` without issuing anything when the machine is already
    /// in that state or another transition is still in flight.
    pub fn request_state(
        &mut self,
        cluster: &mut dyn Cluster,
        info: &MachineInfo,
        state: SState,
    ) -> PlacementResult<bool> {
        if self.transitions.is_pending(info.id) {
            debug!(machine = info.id, requested = ?state, "transition already in flight");
            return Ok(false);
        }
        if info.s_state == state {
            return Ok(false);
        }
        cluster.set_machine_state(info.id, state)?;
        self.transitions.begin(info.id, state);
        info!(machine = info.id, from = ?info.s_state, to = ?state, "power state requested");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wattgrid_core::{Command, CpuArch, InMemoryCluster, MachineSpec};

    fn make_cluster() -> InMemoryCluster {
        let spec = MachineSpec {
            arch: CpuArch::Power,
            num_cpus: 8,
            memory_size: 32_768,
            performance: vec![2000, 1600, 1200, 800],
            p_state_power: vec![200, 150, 100, 60],
            s_state_power: vec![120, 100, 80, 60, 40, 20, 0],
            initial_state: SState::S0,
        };
        InMemoryCluster::new(vec![spec.clone(), spec])
    }

    #[test]
    fn build_registers_every_machine() {
        let cluster = make_cluster();
        let fleet = Fleet::build(&cluster, &PlacementConfig::default()).unwrap();

        assert_eq!(fleet.registry.machine_count(), 2);
        let cap = fleet.accountant.get(1).unwrap();
        assert_eq!(cap.total_mips, 16_000);
        assert_eq!(cap.total_memory, 31_129);
    }

    #[test]
    fn request_state_skips_redundant_and_conflicting_commands() {
        let mut cluster = make_cluster();
        let mut fleet = Fleet::build(&cluster, &PlacementConfig::default()).unwrap();
        let info = cluster.machine_info(0).unwrap();

        assert!(!fleet.request_state(&mut cluster, &info, SState::S0).unwrap());
        assert!(fleet.request_state(&mut cluster, &info, SState::S3).unwrap());
        assert!(!fleet.is_eligible(&info));
        assert!(!fleet.request_state(&mut cluster, &info, SState::S5).unwrap());

        assert_eq!(
            cluster.commands(),
            &[Command::SetState { machine: 0, state: SState::S3 }]
        );
    }
}
