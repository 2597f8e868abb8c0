//! Core performance-state control.
//!
//! Two independent mechanisms:
//!
//! - [`tune_performance`] picks, per machine, the slowest P-state whose
//!   machine-wide rate still covers what is reserved on it;
//! - [`FrequencyScaler`] holds one P-state for the whole cluster, chosen
//!   from load bands.
//!
//! Both only touch the engine when the target differs from what the cores
//! already run at.

use tracing::{debug, info};

use wattgrid_core::{Cluster, ClusterResult, FrequencyConfig, MachineId, MachineInfo, PState, set_machine_performance};
use wattgrid_placement::{Fleet, MachineCapacity, PlacementResult};

/// Set `info`'s cores to the slowest P-state covering its reserved rate.
///
/// Returns the new P-state, or `None` when no command was needed.
pub fn tune_performance(
    cluster: &mut dyn Cluster,
    info: &MachineInfo,
    capacity: &MachineCapacity,
) -> ClusterResult<Option<PState>> {
    if !info.is_active() {
        return Ok(None);
    }
    let target = info
        .slowest_pstate_covering(capacity.reserved_mips)
        .unwrap_or(PState::P0);
    if target == info.p_state {
        return Ok(None);
    }
    set_machine_performance(cluster, info, target)?;
    debug!(machine = info.id, from = ?info.p_state, to = ?target, "p-state tuned");
    Ok(Some(target))
}

/// Cluster-wide P-state chosen from load bands.
#[derive(Debug, Clone)]
pub struct FrequencyScaler {
    bands: Vec<f64>,
    current: PState,
}

impl FrequencyScaler {
    /// Starts at the slowest level.
    pub fn new(config: &FrequencyConfig) -> Self {
        Self {
            bands: config.bands.clone(),
            current: PState::P3,
        }
    }

    pub fn current(&self) -> PState {
        self.current
    }

    /// Level for a cluster load: above the first band `P0`, above the
    /// second `P1`, above the third `P2`, otherwise `P3`. An SLA warning
    /// forces `P0`.
    pub fn level_for(&self, load: f64, sla_latched: bool) -> PState {
        if sla_latched {
            return PState::P0;
        }
        const LEVELS: [PState; 3] = [PState::P0, PState::P1, PState::P2];
        self.bands
            .iter()
            .zip(LEVELS)
            .find(|(threshold, _)| load > **threshold)
            .map(|(_, level)| level)
            .unwrap_or(PState::P3)
    }

    /// Push the current level to every active machine whose cores differ.
    pub fn push_all(&self, cluster: &mut dyn Cluster, fleet: &Fleet) -> PlacementResult<u32> {
        let mut pushed = 0;
        for id in 0..cluster.machine_total() {
            let info = cluster.machine_info(id as MachineId)?;
            if self.push_to(cluster, fleet, &info)? {
                pushed += 1;
            }
        }
        Ok(pushed)
    }

    /// Bring one machine in line with the current level. Used when a
    /// machine finishes waking.
    pub fn push_to(&self, cluster: &mut dyn Cluster, fleet: &Fleet, info: &MachineInfo) -> PlacementResult<bool> {
        if !fleet.is_eligible(info) || info.p_state == self.current {
            return Ok(false);
        }
        set_machine_performance(cluster, info, self.current)?;
        Ok(true)
    }

    /// Recompute the level from the load over active machines. Returns the
    /// new level when it changed and was pushed.
    pub fn apply(
        &mut self,
        cluster: &mut dyn Cluster,
        fleet: &Fleet,
        sla_latched: bool,
    ) -> PlacementResult<Option<PState>> {
        let mut active = Vec::new();
        for id in 0..cluster.machine_total() {
            let info = cluster.machine_info(id as MachineId)?;
            if fleet.is_eligible(&info) {
                active.push(info.id);
            }
        }
        let load = fleet.accountant.load_of(active).unwrap_or(0.0);
        let level = self.level_for(load, sla_latched);
        if level == self.current {
            return Ok(None);
        }

        info!(from = ?self.current, to = ?level, load, sla_latched, "cluster p-state changed");
        self.current = level;
        self.push_all(cluster, fleet)?;
        Ok(Some(level))
    }
}
