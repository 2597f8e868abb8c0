//! Run counters and the shutdown report.

use std::fmt;

use serde::Serialize;

/// Decisions taken since start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub placements: u64,
    /// Placements that fell back to a random eligible machine.
    pub random_placements: u64,
    /// Placements onto a machine that first had to be woken.
    pub dormant_placements: u64,
    pub vms_created: u64,
    pub vms_reused: u64,
    pub vms_retired: u64,
    pub migrations: u64,
    /// Per-machine P-state changes, or cluster-wide level changes under
    /// frequency scaling.
    pub pstate_changes: u64,
}

/// Percentage of finished tasks that missed their SLA, per class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SlaSummary {
    pub sla0: f64,
    pub sla1: f64,
    pub sla2: f64,
}

/// Final figures returned by [`Scheduler::shutdown`](crate::Scheduler::shutdown).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShutdownReport {
    pub policy: String,
    pub simulated_seconds: f64,
    pub energy_kwh: f64,
    pub sla: SlaSummary,
    pub stats: SchedulerStats,
    pub wakes: u64,
    pub sleeps: u64,
    /// VMs still alive at shutdown, now shut down.
    pub vms_shut_down: usize,
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "policy:          {}", self.policy)?;
        writeln!(f, "simulated time:  {:.3} s", self.simulated_seconds)?;
        writeln!(f, "cluster energy:  {:.6} kWh", self.energy_kwh)?;
        writeln!(
            f,
            "SLA violations:  SLA0 {:.2}%  SLA1 {:.2}%  SLA2 {:.2}%",
            self.sla.sla0, self.sla.sla1, self.sla.sla2
        )?;
        writeln!(
            f,
            "placements:      {} ({} random, {} on dormant machines)",
            self.stats.placements, self.stats.random_placements, self.stats.dormant_placements
        )?;
        writeln!(
            f,
            "vms:             {} created, {} reused, {} retired",
            self.stats.vms_created, self.stats.vms_reused, self.stats.vms_retired
        )?;
        writeln!(f, "migrations:      {}", self.stats.migrations)?;
        writeln!(f, "power states:    {} wakes, {} sleeps", self.wakes, self.sleeps)?;
        write!(f, "p-state changes: {}", self.stats.pstate_changes)
    }
}
