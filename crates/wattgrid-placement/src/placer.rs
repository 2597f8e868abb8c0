//! Placement engine — picks the machine a new task runs on.
//!
//! Three strategies share one fallback:
//!
//! - **best fit** — among eligible machines with room, the lowest estimated
//!   post-placement power draw; ties go to the more efficient machine
//! - **first fit** — the first eligible machine with room, in the order given
//! - **fewest tasks** — the eligible machine with the fewest tasks inside an
//!   activation frontier, ignoring capacity
//!
//! When nothing qualifies, a machine is drawn uniformly at random from the
//! eligible candidates regardless of room. The resulting overbooking is what
//! later raises a memory warning. With no eligible candidate at all, a
//! machine already waking up is preferred, then any machine not powering
//! down; the caller must wake it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use wattgrid_core::{Cluster, MachineId, MachineInfo, PState, TaskInfo};

use crate::accountant::MachineCapacity;
use crate::error::{PlacementError, PlacementResult};
use crate::fleet::Fleet;

/// How a machine was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceKind {
    /// The strategy found a qualifying machine.
    Fit,
    /// Random pick among eligible machines; the machine may be overbooked.
    Random,
    /// No eligible machine; the pick is not active yet.
    Dormant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    pub machine: MachineId,
    pub kind: ChoiceKind,
}

/// Estimated draw of `info` after adding one more task.
///
/// Idle power plus the per-core draw of the slowest P-state whose
/// machine-wide rate covers the current reservations plus `task_mips`.
/// When no P-state covers it, the `P0` draw.
pub fn estimated_power(info: &MachineInfo, capacity: &MachineCapacity, task_mips: u64) -> u64 {
    let needed = capacity.reserved_mips + task_mips;
    let pstate = info.slowest_pstate_covering(needed).unwrap_or(PState::P0);
    info.idle_power() + info.pstate_power(pstate)
}

pub struct PlacementEngine<R = StdRng> {
    rng: R,
}

impl PlacementEngine<StdRng> {
    /// Seeded generator when `seed` is set, entropy otherwise.
    pub fn from_seed(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl<R: Rng> PlacementEngine<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Lowest estimated power among eligible candidates with room.
    pub fn best_fit(
        &mut self,
        cluster: &dyn Cluster,
        fleet: &Fleet,
        candidates: &[MachineId],
        task: &TaskInfo,
    ) -> PlacementResult<Choice> {
        let task_mips = fleet.accountant.task_mips();
        let mut best: Option<(u64, MachineId)> = None;

        for &machine in candidates {
            let info = cluster.machine_info(machine)?;
            if !fleet.is_eligible(&info) {
                continue;
            }
            let capacity = fleet.accountant.get(machine)?;
            if !capacity.fits(task_mips, task.required_memory) {
                continue;
            }
            let power = estimated_power(&info, capacity, task_mips);
            debug!(task = task.id, machine, power, "best-fit candidate");
            if best.is_none_or(|(lowest, _)| power < lowest) {
                best = Some((power, machine));
            }
        }

        match best {
            Some((_, machine)) => Ok(Choice { machine, kind: ChoiceKind::Fit }),
            None => self.fallback(cluster, fleet, candidates, task),
        }
    }

    /// First eligible candidate with room, in candidate order.
    pub fn first_fit(
        &mut self,
        cluster: &dyn Cluster,
        fleet: &Fleet,
        candidates: &[MachineId],
        task: &TaskInfo,
    ) -> PlacementResult<Choice> {
        for &machine in candidates {
            let info = cluster.machine_info(machine)?;
            if fleet.is_eligible(&info) && fleet.accountant.has_capacity(machine, task.required_memory)? {
                return Ok(Choice { machine, kind: ChoiceKind::Fit });
            }
        }
        self.fallback(cluster, fleet, candidates, task)
    }

    /// Eligible machine with the fewest tasks among the first `frontier`
    /// candidates. Capacity is not considered.
    pub fn fewest_tasks(
        &mut self,
        cluster: &dyn Cluster,
        fleet: &Fleet,
        candidates: &[MachineId],
        frontier: usize,
        task: &TaskInfo,
    ) -> PlacementResult<Choice> {
        let mut best: Option<(u32, MachineId)> = None;
        for &machine in candidates.iter().take(frontier) {
            let info = cluster.machine_info(machine)?;
            if !fleet.is_eligible(&info) {
                continue;
            }
            let tasks = fleet.accountant.get(machine)?.tasks;
            if best.is_none_or(|(fewest, _)| tasks < fewest) {
                best = Some((tasks, machine));
            }
        }

        match best {
            Some((_, machine)) => Ok(Choice { machine, kind: ChoiceKind::Fit }),
            None => self.fallback(cluster, fleet, candidates, task),
        }
    }

    fn fallback(
        &mut self,
        cluster: &dyn Cluster,
        fleet: &Fleet,
        candidates: &[MachineId],
        task: &TaskInfo,
    ) -> PlacementResult<Choice> {
        if candidates.is_empty() {
            return Err(PlacementError::EmptyPool(task.required_arch));
        }

        let mut eligible = Vec::new();
        for &machine in candidates {
            if fleet.is_eligible(&cluster.machine_info(machine)?) {
                eligible.push(machine);
            }
        }
        if !eligible.is_empty() {
            let machine = eligible[self.rng.gen_range(0..eligible.len())];
            warn!(task = task.id, machine, "no machine with room; random placement");
            return Ok(Choice { machine, kind: ChoiceKind::Random });
        }

        let transitions = &fleet.transitions;
        let machine = candidates
            .iter()
            .copied()
            .find(|m| transitions.is_waking(*m))
            .or_else(|| candidates.iter().copied().find(|m| !transitions.is_powering_down(*m)))
            .unwrap_or(candidates[0]);
        warn!(task = task.id, machine, arch = %task.required_arch, "no active machine in pool");
        Ok(Choice { machine, kind: ChoiceKind::Dormant })
    }
}
