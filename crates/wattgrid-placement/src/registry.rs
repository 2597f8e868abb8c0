//! Resource pools — machines grouped by architecture, most efficient first.
//!
//! Efficiency is peak per-core performance over peak per-core power
//! ([`MachineInfo::efficiency`]). Pools are built once over every machine in
//! identifier order; membership never changes afterwards, only a machine's
//! position when it is re-inserted.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use wattgrid_core::{Cluster, CpuArch, MachineId, MachineInfo};

use crate::error::{PlacementError, PlacementResult};

#[derive(Debug, Clone, Copy, PartialEq)]
struct PoolEntry {
    machine: MachineId,
    score: f64,
}

/// Machines of one architecture in descending efficiency order.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    arch: CpuArch,
    entries: Vec<PoolEntry>,
}

impl Pool {
    pub fn new(arch: CpuArch) -> Self {
        Self {
            arch,
            entries: Vec::new(),
        }
    }

    pub fn arch(&self) -> CpuArch {
        self.arch
    }

    /// Insert `machine` ahead of the first strictly less efficient entry and
    /// return its index. Equal scores keep insertion order. A machine already
    /// in the pool is moved rather than duplicated.
    pub fn insert(&mut self, machine: MachineId, score: f64) -> usize {
        self.remove(machine);
        let index = self
            .entries
            .iter()
            .position(|e| score > e.score)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, PoolEntry { machine, score });
        index
    }

    pub fn remove(&mut self, machine: MachineId) -> bool {
        match self.position(machine) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn position(&self, machine: MachineId) -> Option<usize> {
        self.entries.iter().position(|e| e.machine == machine)
    }

    pub fn contains(&self, machine: MachineId) -> bool {
        self.position(machine).is_some()
    }

    pub fn get(&self, index: usize) -> Option<MachineId> {
        self.entries.get(index).map(|e| e.machine)
    }

    /// Machine ids, most efficient first.
    pub fn machines(&self) -> impl Iterator<Item = MachineId> + '_ {
        self.entries.iter().map(|e| e.machine)
    }

    pub fn to_vec(&self) -> Vec<MachineId> {
        self.machines().collect()
    }

    pub fn scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|e| e.score)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every pool in the cluster, keyed by architecture.
#[derive(Debug, Clone, Default)]
pub struct ResourcePoolRegistry {
    pools: BTreeMap<CpuArch, Pool>,
    arch_of: HashMap<MachineId, CpuArch>,
    scores: HashMap<MachineId, f64>,
}

impl ResourcePoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every machine the engine reports, in identifier order.
    pub fn build(cluster: &dyn Cluster) -> PlacementResult<Self> {
        let mut registry = Self::new();
        for id in 0..cluster.machine_total() {
            let info = cluster.machine_info(id as MachineId)?;
            registry.insert(&info);
        }
        debug!(
            machines = registry.arch_of.len(),
            pools = registry.pools.len(),
            "resource pools built"
        );
        Ok(registry)
    }

    /// Place a machine into its architecture's pool; returns the index.
    pub fn insert(&mut self, info: &MachineInfo) -> usize {
        let score = info.efficiency();
        self.arch_of.insert(info.id, info.arch);
        self.scores.insert(info.id, score);
        self.pools
            .entry(info.arch)
            .or_insert_with(|| Pool::new(info.arch))
            .insert(info.id, score)
    }

    pub fn pool(&self, arch: CpuArch) -> PlacementResult<&Pool> {
        self.pools.get(&arch).ok_or(PlacementError::EmptyPool(arch))
    }

    pub fn pool_of(&self, machine: MachineId) -> PlacementResult<&Pool> {
        self.pool(self.arch_of(machine)?)
    }

    pub fn arch_of(&self, machine: MachineId) -> PlacementResult<CpuArch> {
        self.arch_of
            .get(&machine)
            .copied()
            .ok_or(PlacementError::UnknownMachine(machine))
    }

    pub fn efficiency(&self, machine: MachineId) -> Option<f64> {
        self.scores.get(&machine).copied()
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    pub fn machine_count(&self) -> usize {
        self.arch_of.len()
    }
}
