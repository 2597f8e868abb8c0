//! Capacity accounting — per-machine instruction-rate and memory reservations.
//!
//! Each task reserves a fixed instruction-rate cost plus its memory
//! footprint. The accountant keeps the reserved sums rather than the
//! residuals, so residual capacity saturates at zero when a machine is
//! overbooked while a later release still restores the exact prior state.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use wattgrid_core::{MachineId, MachineInfo};

use crate::error::{PlacementError, PlacementResult};

/// Capacity and reservations of one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MachineCapacity {
    pub total_mips: u64,
    pub total_memory: u64,
    pub reserved_mips: u64,
    pub reserved_memory: u64,
    pub tasks: u32,
}

impl MachineCapacity {
    pub fn residual_mips(&self) -> u64 {
        self.total_mips.saturating_sub(self.reserved_mips)
    }

    pub fn residual_memory(&self) -> u64 {
        self.total_memory.saturating_sub(self.reserved_memory)
    }

    /// Whether another `mips`/`memory` reservation fits without overbooking.
    pub fn fits(&self, mips: u64, memory: u64) -> bool {
        self.residual_mips() >= mips && self.residual_memory() >= memory
    }

    pub fn is_overcommitted(&self) -> bool {
        self.reserved_mips > self.total_mips || self.reserved_memory > self.total_memory
    }

    pub fn is_idle(&self) -> bool {
        self.tasks == 0
    }
}

/// Outcome of [`CapacityAccountant::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// The machine is now booked beyond its capacity.
    pub overcommitted: bool,
    /// The machine went from zero tasks to one.
    pub first_task: bool,
}

/// Outcome of [`CapacityAccountant::transfer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// The source machine has no tasks left.
    pub source_idle: bool,
    /// The destination went from zero tasks to one.
    pub destination_first: bool,
    pub overcommitted: bool,
}

#[derive(Debug, Clone)]
pub struct CapacityAccountant {
    task_mips: u64,
    entries: HashMap<MachineId, MachineCapacity>,
}

impl CapacityAccountant {
    pub fn new(task_mips: u64) -> Self {
        Self {
            task_mips,
            entries: HashMap::new(),
        }
    }

    /// Instruction-rate cost reserved per task.
    pub fn task_mips(&self) -> u64 {
        self.task_mips
    }

    /// Start tracking a machine with nothing reserved. Only
    /// `memory_headroom` of its physical memory is reservable.
    pub fn register(&mut self, info: &MachineInfo, memory_headroom: f64) {
        self.entries.insert(
            info.id,
            MachineCapacity {
                total_mips: info.peak_mips(),
                total_memory: (info.memory_size as f64 * memory_headroom) as u64,
                reserved_mips: 0,
                reserved_memory: 0,
                tasks: 0,
            },
        );
    }

    pub fn get(&self, machine: MachineId) -> PlacementResult<&MachineCapacity> {
        self.entries
            .get(&machine)
            .ok_or(PlacementError::UnknownMachine(machine))
    }

    /// Whether a task needing `memory` fits on `machine`.
    pub fn has_capacity(&self, machine: MachineId, memory: u64) -> PlacementResult<bool> {
        Ok(self.get(machine)?.fits(self.task_mips, memory))
    }

    /// Book one task. Never fails for lack of room: the residuals clamp at
    /// zero and the outcome flags the overbooking.
    pub fn reserve(&mut self, machine: MachineId, memory: u64) -> PlacementResult<Reservation> {
        let task_mips = self.task_mips;
        let entry = self
            .entries
            .get_mut(&machine)
            .ok_or(PlacementError::UnknownMachine(machine))?;

        let first_task = entry.tasks == 0;
        entry.reserved_mips += task_mips;
        entry.reserved_memory += memory;
        entry.tasks += 1;

        let overcommitted = entry.is_overcommitted();
        if overcommitted {
            warn!(
                machine,
                reserved_mips = entry.reserved_mips,
                total_mips = entry.total_mips,
                reserved_memory = entry.reserved_memory,
                total_memory = entry.total_memory,
                "machine overbooked"
            );
        }
        Ok(Reservation {
            overcommitted,
            first_task,
        })
    }

    /// Undo one reservation of `memory`. Returns whether the machine is now
    /// idle.
    pub fn release(&mut self, machine: MachineId, memory: u64) -> PlacementResult<bool> {
        let task_mips = self.task_mips;
        let entry = self
            .entries
            .get_mut(&machine)
            .ok_or(PlacementError::UnknownMachine(machine))?;

        if entry.tasks == 0 || entry.reserved_mips < task_mips || entry.reserved_memory < memory {
            return Err(PlacementError::ReleaseUnderflow(machine));
        }
        entry.reserved_mips -= task_mips;
        entry.reserved_memory -= memory;
        entry.tasks -= 1;
        Ok(entry.tasks == 0)
    }

    /// Move one task's reservation from `from` to `to`.
    pub fn transfer(&mut self, from: MachineId, to: MachineId, memory: u64) -> PlacementResult<Transfer> {
        self.get(to)?;
        let source_idle = self.release(from, memory)?;
        let reservation = self.reserve(to, memory)?;
        Ok(Transfer {
            source_idle,
            destination_first: reservation.first_task,
            overcommitted: reservation.overcommitted,
        })
    }

    /// Aggregate load over `machines`: the larger of the instruction-rate and
    /// memory utilization ratios. `None` when the set has no capacity at all.
    pub fn load_of(&self, machines: impl IntoIterator<Item = MachineId>) -> Option<f64> {
        let (mut total_mips, mut used_mips, mut total_mem, mut used_mem) = (0u64, 0u64, 0u64, 0u64);
        for machine in machines {
            if let Some(entry) = self.entries.get(&machine) {
                total_mips += entry.total_mips;
                used_mips += entry.reserved_mips;
                total_mem += entry.total_memory;
                used_mem += entry.reserved_memory;
            }
        }
        if total_mips == 0 && total_mem == 0 {
            return None;
        }
        let ratio = |used: u64, total: u64| if total == 0 { 0.0 } else { used as f64 / total as f64 };
        Some(ratio(used_mips, total_mips).max(ratio(used_mem, total_mem)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wattgrid_core::{CpuArch, PState, SState};

    fn make_info(id: MachineId, per_core: u64, cpus: u32, memory: u64) -> MachineInfo {
        MachineInfo {
            id,
            arch: CpuArch::X86,
            num_cpus: cpus,
            memory_size: memory,
            memory_used: 0,
            performance: vec![per_core, per_core / 2, per_core / 3, per_core / 4],
            p_state_power: vec![100, 80, 60, 40],
            s_state_power: vec![50, 40, 30, 20, 10, 5, 0],
            s_state: SState::S0,
            p_state: PState::P0,
            active_tasks: 0,
            active_vms: 0,
        }
    }

    fn make_accountant() -> CapacityAccountant {
        let mut acct = CapacityAccountant::new(1000);
        acct.register(&make_info(0, 1000, 2, 1000), 1.0); // 2000 MIPS, 1000 MB
        acct.register(&make_info(1, 1000, 4, 2000), 0.95); // 4000 MIPS, 1900 MB
        acct
    }

    #[test]
    fn register_applies_memory_headroom() {
        let acct = make_accountant();
        let m1 = acct.get(1).unwrap();
        assert_eq!(m1.total_mips, 4000);
        assert_eq!(m1.total_memory, 1900);
        assert_eq!(m1.residual_memory(), 1900);
    }

    #[test]
    fn residuals_equal_total_minus_assigned() {
        let mut acct = make_accountant();
        acct.reserve(1, 300).unwrap();
        acct.reserve(1, 200).unwrap();
        acct.reserve(1, 100).unwrap();
        acct.release(1, 200).unwrap();

        let m1 = acct.get(1).unwrap();
        assert_eq!(m1.residual_mips(), 4000 - 2 * 1000);
        assert_eq!(m1.residual_memory(), 1900 - 300 - 100);
        assert_eq!(m1.tasks, 2);
    }

    #[test]
    fn reserve_clamps_residuals_at_zero() {
        let mut acct = make_accountant();
        assert!(!acct.reserve(0, 600).unwrap().overcommitted);
        let second = acct.reserve(0, 600).unwrap();
        assert!(second.overcommitted);
        let third = acct.reserve(0, 10).unwrap();
        assert!(third.overcommitted);

        let m0 = acct.get(0).unwrap();
        assert_eq!(m0.residual_memory(), 0);
        assert_eq!(m0.residual_mips(), 0);
        assert!(m0.is_overcommitted());
        assert!(!acct.has_capacity(0, 0).unwrap());
    }

    #[test]
    fn reserve_then_release_restores_prior_state_even_when_overbooked() {
        let mut acct = make_accountant();
        acct.reserve(0, 900).unwrap();
        let before = *acct.get(0).unwrap();

        acct.reserve(0, 700).unwrap();
        acct.release(0, 700).unwrap();

        assert_eq!(*acct.get(0).unwrap(), before);
    }

    #[test]
    fn first_task_and_idle_transitions() {
        let mut acct = make_accountant();
        assert!(acct.reserve(0, 100).unwrap().first_task);
        assert!(!acct.reserve(0, 100).unwrap().first_task);
        assert!(!acct.release(0, 100).unwrap());
        assert!(acct.release(0, 100).unwrap());
    }

    #[test]
    fn release_without_reservation_is_an_error() {
        let mut acct = make_accountant();
        assert!(matches!(
            acct.release(0, 100),
            Err(PlacementError::ReleaseUnderflow(0))
        ));
        assert!(matches!(
            acct.reserve(9, 100),
            Err(PlacementError::UnknownMachine(9))
        ));
    }

    #[test]
    fn transfer_is_symmetric() {
        let mut acct = make_accountant();
        acct.reserve(0, 400).unwrap();

        let outcome = acct.transfer(0, 1, 400).unwrap();
        assert!(outcome.source_idle);
        assert!(outcome.destination_first);
        assert!(!outcome.overcommitted);

        assert_eq!(acct.get(0).unwrap().reserved_memory, 0);
        assert_eq!(acct.get(0).unwrap().reserved_mips, 0);
        assert_eq!(acct.get(1).unwrap().reserved_memory, 400);
        assert_eq!(acct.get(1).unwrap().reserved_mips, 1000);
    }

    #[test]
    fn transfer_to_unknown_machine_leaves_source_untouched() {
        let mut acct = make_accountant();
        acct.reserve(0, 400).unwrap();
        assert!(acct.transfer(0, 7, 400).is_err());
        assert_eq!(acct.get(0).unwrap().tasks, 1);
    }

    #[test]
    fn load_takes_the_larger_ratio() {
        let mut acct = make_accountant();
        acct.reserve(0, 900).unwrap(); // mips 1000/2000, memory 900/1000

        let load = acct.load_of([0]).unwrap();
        assert!((load - 0.9).abs() < 1e-9);

        let combined = acct.load_of([0, 1]).unwrap();
        assert!((combined - 900.0 / 2900.0).abs() < 1e-9);
        assert!(acct.load_of([]).is_none());
    }
}
