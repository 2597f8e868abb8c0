//! Capacity controller — which machines of each pool are powered.
//!
//! Machines move between `S0` and the sleep states only through
//! [`Fleet::request_state`], so a machine with a transition in flight is
//! never commanded twice. The controller's own state is small: idle-check
//! counters per machine, an activation frontier and pressure countdown per
//! pool, the SLA latch, and the position in the sleep-state rotation.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use wattgrid_core::{
    CapacityConfig, Cluster, CpuArch, MachineId, MachineInfo, PState, SState, set_machine_performance,
};
use wattgrid_placement::{Fleet, PlacementResult};

use crate::frontier::ActivationFrontier;

/// Machines a scaling step asked to wake or to sleep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScalingOutcome {
    pub woken: Vec<MachineId>,
    pub slept: Vec<MachineId>,
}

impl ScalingOutcome {
    pub fn is_empty(&self) -> bool {
        self.woken.is_empty() && self.slept.is_empty()
    }

    fn merge(&mut self, other: ScalingOutcome) {
        self.woken.extend(other.woken);
        self.slept.extend(other.slept);
    }
}

/// Running totals of power-state commands issued after start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScalingStats {
    pub wakes: u64,
    pub sleeps: u64,
}

pub struct CapacityController {
    config: CapacityConfig,
    initial_pstate: PState,
    frontiers: BTreeMap<CpuArch, ActivationFrontier>,
    pressure: BTreeMap<CpuArch, u32>,
    idle_checks: HashMap<MachineId, u32>,
    sla_latched: bool,
    sleep_cursor: usize,
    stats: ScalingStats,
}

impl CapacityController {
    pub fn new(config: &CapacityConfig, initial_pstate: PState) -> Self {
        Self {
            config: config.clone(),
            initial_pstate,
            frontiers: BTreeMap::new(),
            pressure: BTreeMap::new(),
            idle_checks: HashMap::new(),
            sla_latched: false,
            sleep_cursor: 0,
            stats: ScalingStats::default(),
        }
    }

    pub fn stats(&self) -> ScalingStats {
        self.stats
    }

    // ── Start-up ──────────────────────────────────────────────────────

    /// Power on the most efficient `startup_active_fraction` of each pool
    /// (at least one machine) and switch the rest off.
    pub fn bootstrap(&mut self, cluster: &mut dyn Cluster, fleet: &mut Fleet) -> PlacementResult<()> {
        for (arch, machines) in pool_snapshot(fleet) {
            let n = machines.len();
            let active = fraction_of(n, self.config.startup_active_fraction).max(1).min(n);
            self.frontiers.insert(arch, ActivationFrontier::stepped(n, active));

            for (index, machine) in machines.iter().enumerate() {
                let info = cluster.machine_info(*machine)?;
                if index < active {
                    self.power_on(cluster, fleet, &info)?;
                } else {
                    fleet.request_state(cluster, &info, SState::S5)?;
                }
            }
            info!(%arch, machines = n, active, "pool bootstrapped");
        }
        Ok(())
    }

    /// Split each pool into tiers: the first powered on, each later tier
    /// sent to the matching entry of `tier_states`. Pools too small to split
    /// are powered on whole.
    pub fn bootstrap_tiered(&mut self, cluster: &mut dyn Cluster, fleet: &mut Fleet) -> PlacementResult<()> {
        let tier_states = self.config.tier_states.clone();
        for (arch, machines) in pool_snapshot(fleet) {
            let frontier = ActivationFrontier::tiered(machines.len(), tier_states.len() + 1);

            for tier in 0..frontier.segment_count() {
                let Some(range) = frontier.segment(tier) else { continue };
                for machine in &machines[range] {
                    let info = cluster.machine_info(*machine)?;
                    match tier.checked_sub(1) {
                        None => {
                            self.power_on(cluster, fleet, &info)?;
                        }
                        Some(i) => {
                            let state = tier_states.get(i).or(tier_states.last()).copied().unwrap_or(SState::S5);
                            fleet.request_state(cluster, &info, state)?;
                        }
                    }
                }
            }
            info!(%arch, machines = machines.len(), active = frontier.limit(), "pool bootstrapped in tiers");
            self.frontiers.insert(arch, frontier);
        }
        Ok(())
    }

    // ── Periodic evaluation ───────────────────────────────────────────

    /// Evaluate every pool: wake a batch of inactive machines when load is
    /// high or an SLA warning was latched, otherwise put machines that have
    /// been idle long enough to sleep. The SLA latch is cleared afterwards.
    pub fn periodic_check(&mut self, cluster: &mut dyn Cluster, fleet: &mut Fleet) -> PlacementResult<ScalingOutcome> {
        let mut outcome = ScalingOutcome::default();
        for (arch, machines) in pool_snapshot(fleet) {
            outcome.merge(self.check_pool(cluster, fleet, arch, &machines)?);
        }
        self.sla_latched = false;
        Ok(outcome)
    }

    fn check_pool(
        &mut self,
        cluster: &mut dyn Cluster,
        fleet: &mut Fleet,
        arch: CpuArch,
        machines: &[MachineId],
    ) -> PlacementResult<ScalingOutcome> {
        let mut outcome = ScalingOutcome::default();
        let infos = machines
            .iter()
            .map(|m| cluster.machine_info(*m))
            .collect::<Result<Vec<_>, _>>()?;

        let mut active = Vec::new();
        for info in &infos {
            if fleet.is_eligible(info) {
                active.push(info.id);
                let idle = fleet.accountant.get(info.id)?.is_idle();
                let counter = self.idle_checks.entry(info.id).or_insert(0);
                *counter = if idle { *counter + 1 } else { 0 };
            } else {
                self.idle_checks.remove(&info.id);
            }
        }

        let load = fleet.accountant.load_of(active.iter().copied()).unwrap_or(0.0);
        debug!(%arch, load, active = active.len(), "pool load");

        if load > self.config.high_load_threshold || self.sla_latched {
            let inactive: Vec<&MachineInfo> = infos
                .iter()
                .filter(|i| !i.is_active() && !fleet.transitions.is_pending(i.id))
                .collect();
            if inactive.is_empty() {
                return Ok(outcome);
            }
            let batch = fraction_of(inactive.len(), self.config.wake_batch_fraction)
                .max(1)
                .min(inactive.len());
            for info in inactive.into_iter().take(batch) {
                if self.power_on(cluster, fleet, info)? {
                    outcome.woken.push(info.id);
                }
            }
            info!(%arch, load, sla = self.sla_latched, woken = outcome.woken.len(), "scaling pool up");
            return Ok(outcome);
        }

        let floor = fraction_of(machines.len(), self.config.active_floor_fraction).max(1);
        let mut awake = count_awake(fleet, &infos);
        for info in &infos {
            if awake <= floor {
                break;
            }
            let idle_checks = self.idle_checks.get(&info.id).copied().unwrap_or(0);
            if idle_checks < self.config.idle_check_threshold {
                continue;
            }
            let state = self.next_sleep_state();
            if self.power_down(cluster, fleet, info, state)? {
                self.sleep_cursor += 1;
                self.idle_checks.remove(&info.id);
                outcome.slept.push(info.id);
                awake -= 1;
            }
        }
        if !outcome.slept.is_empty() {
            info!(%arch, slept = outcome.slept.len(), awake, floor, "idle machines put to sleep");
        }
        Ok(outcome)
    }

    fn next_sleep_state(&self) -> SState {
        let rotation = &self.config.sleep_rotation;
        rotation
            .get(self.sleep_cursor % rotation.len().max(1))
            .copied()
            .unwrap_or(SState::S5)
    }

    // ── Pressure ──────────────────────────────────────────────────────

    /// Remember an SLA warning until the next periodic check.
    pub fn latch_sla(&mut self) {
        self.sla_latched = true;
    }

    pub fn sla_latched(&self) -> bool {
        self.sla_latched
    }

    /// Read and clear the SLA latch, for policies that skip
    /// [`periodic_check`](Self::periodic_check).
    pub fn take_sla_latch(&mut self) -> bool {
        std::mem::take(&mut self.sla_latched)
    }

    /// Count one overcommit or SLA signal against `arch`. Every
    /// `pressure_check_threshold` signals the pool's frontier widens.
    pub fn record_pressure(
        &mut self,
        cluster: &mut dyn Cluster,
        fleet: &mut Fleet,
        arch: CpuArch,
    ) -> PlacementResult<Vec<MachineId>> {
        let threshold = self.config.pressure_check_threshold.max(1);
        let count = self.pressure.entry(arch).or_insert(0);
        *count += 1;
        if *count < threshold {
            debug!(%arch, count = *count, threshold, "pressure recorded");
            return Ok(Vec::new());
        }
        *count = 0;
        self.widen_frontier(cluster, fleet, arch)
    }

    /// Move the pool's frontier out by one segment and wake the machines it
    /// now covers.
    pub fn widen_frontier(
        &mut self,
        cluster: &mut dyn Cluster,
        fleet: &mut Fleet,
        arch: CpuArch,
    ) -> PlacementResult<Vec<MachineId>> {
        let machines = fleet.registry.pool(arch)?.to_vec();
        let Some(range) = self.frontiers.get_mut(&arch).and_then(|f| f.widen()) else {
            debug!(%arch, "activation frontier already fully open");
            return Ok(Vec::new());
        };

        let mut woken = Vec::new();
        for machine in &machines[range] {
            let info = cluster.machine_info(*machine)?;
            if self.power_on(cluster, fleet, &info)? {
                woken.push(info.id);
            }
        }
        info!(%arch, limit = self.frontier_limit(arch, machines.len()), woken = woken.len(), "activation frontier widened");
        Ok(woken)
    }

    /// Machines, from the front of the pool, inside its activation
    /// frontier. The whole pool when it was never bootstrapped.
    pub fn frontier_limit(&self, arch: CpuArch, pool_len: usize) -> usize {
        self.frontiers.get(&arch).map_or(pool_len, |f| f.limit())
    }

    // ── Warm spares ───────────────────────────────────────────────────

    /// Re-evaluate idle machines of `arch` that are awake or in the spare
    /// sleep state. With few idle machines all of them are woken; otherwise
    /// the most efficient `warm_spare_fraction` stay awake and the rest go to
    /// `spare_sleep_state`, never dropping the pool below its active floor.
    pub fn rebalance_spares(
        &mut self,
        cluster: &mut dyn Cluster,
        fleet: &mut Fleet,
        arch: CpuArch,
    ) -> PlacementResult<ScalingOutcome> {
        let machines = fleet.registry.pool(arch)?.to_vec();
        let infos = machines
            .iter()
            .map(|m| cluster.machine_info(*m))
            .collect::<Result<Vec<_>, _>>()?;

        let spare_state = self.config.spare_sleep_state;
        let mut idle = Vec::new();
        for info in &infos {
            let warm = info.s_state == SState::S0 || info.s_state == spare_state;
            if warm && !fleet.transitions.is_pending(info.id) && fleet.accountant.get(info.id)?.is_idle() {
                idle.push(info);
            }
        }

        let mut outcome = ScalingOutcome::default();
        let keep = if idle.len() <= self.config.warm_spare_min_idle {
            idle.len()
        } else {
            fraction_of(idle.len(), self.config.warm_spare_fraction)
        };
        let floor = fraction_of(machines.len(), self.config.active_floor_fraction).max(1);
        let mut awake = count_awake(fleet, &infos);

        for (index, info) in idle.into_iter().enumerate() {
            if index < keep {
                if !info.is_active() && self.power_on(cluster, fleet, info)? {
                    outcome.woken.push(info.id);
                    awake += 1;
                }
            } else if info.is_active() && awake > floor && self.power_down(cluster, fleet, info, spare_state)? {
                outcome.slept.push(info.id);
                awake -= 1;
            }
        }
        if !outcome.is_empty() {
            debug!(%arch, keep, woken = outcome.woken.len(), slept = outcome.slept.len(), "warm spares rebalanced");
        }
        Ok(outcome)
    }

    // ── Transitions ───────────────────────────────────────────────────

    /// Clear the in-flight marker for `machine` once the engine reports the
    /// state change. Returns the state the machine was headed to.
    pub fn on_state_change(&mut self, fleet: &mut Fleet, machine: MachineId) -> Option<SState> {
        let target = fleet.transitions.complete(machine);
        self.idle_checks.remove(&machine);
        debug!(machine, state = ?target, "state change acknowledged");
        target
    }

    /// Wake `info` if needed and push the start-up P-state to its cores.
    /// Returns whether a wake command was issued.
    pub fn power_on(&mut self, cluster: &mut dyn Cluster, fleet: &mut Fleet, info: &MachineInfo) -> PlacementResult<bool> {
        let woke = fleet.request_state(cluster, info, SState::S0)?;
        if woke {
            self.stats.wakes += 1;
        }
        if info.p_state != self.initial_pstate && (woke || fleet.is_eligible(info)) {
            set_machine_performance(cluster, info, self.initial_pstate)?;
        }
        Ok(woke)
    }

    fn power_down(
        &mut self,
        cluster: &mut dyn Cluster,
        fleet: &mut Fleet,
        info: &MachineInfo,
        state: SState,
    ) -> PlacementResult<bool> {
        let issued = fleet.request_state(cluster, info, state)?;
        if issued {
            self.stats.sleeps += 1;
        }
        Ok(issued)
    }
}

/// `floor(n * fraction)`.
fn fraction_of(n: usize, fraction: f64) -> usize {
    (n as f64 * fraction).floor() as usize
}

/// Machines that are, or are about to be, active.
fn count_awake(fleet: &Fleet, infos: &[MachineInfo]) -> usize {
    infos
        .iter()
        .filter(|i| {
            (i.is_active() && !fleet.transitions.is_powering_down(i.id)) || fleet.transitions.is_waking(i.id)
        })
        .count()
}

fn pool_snapshot(fleet: &Fleet) -> Vec<(CpuArch, Vec<MachineId>)> {
    fleet.registry.pools().map(|p| (p.arch(), p.to_vec())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wattgrid_core::{Command, InMemoryCluster, MachineSpec, PlacementConfig, Timing};

    /// `n` identical machines of one architecture, initially in `S0`.
    fn make_cluster(n: usize) -> InMemoryCluster {
        let spec = MachineSpec {
            arch: CpuArch::X86,
            num_cpus: 4,
            memory_size: 8192,
            performance: vec![2000, 1500, 1000, 500],
            p_state_power: vec![100, 70, 45, 25],
            s_state_power: vec![80, 60, 40, 30, 20, 10, 0],
            initial_state: SState::S0,
        };
        InMemoryCluster::new(vec![spec; n]).with_timing(Timing {
            state_change_delay: 10,
            migration_delay: 10,
        })
    }

    fn make_config(idle_checks: u32) -> CapacityConfig {
        CapacityConfig {
            idle_check_threshold: idle_checks,
            ..CapacityConfig::default()
        }
    }

    fn setup(n: usize, config: CapacityConfig) -> (InMemoryCluster, Fleet, CapacityController) {
        let cluster = make_cluster(n);
        let fleet = Fleet::build(&cluster, &PlacementConfig::default()).unwrap();
        let controller = CapacityController::new(&config, PState::P0);
        (cluster, fleet, controller)
    }

    /// Deliver every pending completion to the controller.
    fn settle(cluster: &mut InMemoryCluster, fleet: &mut Fleet, controller: &mut CapacityController) {
        let t = cluster.now() + 10;
        for (_, event) in cluster.advance_to(t) {
            if let wattgrid_core::Event::StateChangeComplete { machine } = event {
                controller.on_state_change(fleet, machine);
            }
        }
    }

    fn states(cluster: &InMemoryCluster) -> Vec<SState> {
        (0..cluster.machine_total())
            .map(|m| cluster.machine_info(m as MachineId).unwrap().s_state)
            .collect()
    }

    #[test]
    fn bootstrap_keeps_a_quarter_active() {
        let (mut cluster, mut fleet, mut controller) = setup(8, make_config(3));
        controller.bootstrap(&mut cluster, &mut fleet).unwrap();

        for machine in 2..8 {
            assert!(fleet.transitions.is_powering_down(machine));
        }
        settle(&mut cluster, &mut fleet, &mut controller);

        let states = states(&cluster);
        assert_eq!(&states[..2], &[SState::S0, SState::S0]);
        assert!(states[2..].iter().all(|s| *s == SState::S5));
        assert_eq!(controller.frontier_limit(CpuArch::X86, 8), 2);
        assert!(fleet.transitions.is_empty());
    }

    #[test]
    fn bootstrap_activates_at_least_one_machine() {
        let (mut cluster, mut fleet, mut controller) = setup(3, make_config(3));
        controller.bootstrap(&mut cluster, &mut fleet).unwrap();
        settle(&mut cluster, &mut fleet, &mut controller);

        assert_eq!(states(&cluster), vec![SState::S0, SState::S5, SState::S5]);
    }

    #[test]
    fn tiered_bootstrap_assigns_tier_states() {
        let (mut cluster, mut fleet, mut controller) = setup(9, make_config(3));
        controller.bootstrap_tiered(&mut cluster, &mut fleet).unwrap();
        settle(&mut cluster, &mut fleet, &mut controller);

        use SState::*;
        assert_eq!(states(&cluster), vec![S0, S0, S1, S1, S3, S3, S5, S5, S5]);
        assert_eq!(controller.frontier_limit(CpuArch::X86, 9), 2);
    }

    #[test]
    fn pressure_countdown_widens_frontier() {
        let config = CapacityConfig {
            pressure_check_threshold: 3,
            ..make_config(3)
        };
        let (mut cluster, mut fleet, mut controller) = setup(8, config);
        controller.bootstrap_tiered(&mut cluster, &mut fleet).unwrap();
        settle(&mut cluster, &mut fleet, &mut controller);
        cluster.clear_commands();

        assert!(controller.record_pressure(&mut cluster, &mut fleet, CpuArch::X86).unwrap().is_empty());
        assert!(controller.record_pressure(&mut cluster, &mut fleet, CpuArch::X86).unwrap().is_empty());
        let woken = controller.record_pressure(&mut cluster, &mut fleet, CpuArch::X86).unwrap();

        assert_eq!(woken, vec![2, 3]);
        assert_eq!(controller.frontier_limit(CpuArch::X86, 8), 4);
        assert!(cluster.commands().contains(&Command::SetState { machine: 2, state: SState::S0 }));
        assert_eq!(controller.stats().wakes, 2);
    }

    #[test]
    fn widening_stops_at_whole_pool() {
        let (mut cluster, mut fleet, mut controller) = setup(4, make_config(3));
        controller.bootstrap_tiered(&mut cluster, &mut fleet).unwrap();
        settle(&mut cluster, &mut fleet, &mut controller);

        for _ in 0..3 {
            controller.widen_frontier(&mut cluster, &mut fleet, CpuArch::X86).unwrap();
            settle(&mut cluster, &mut fleet, &mut controller);
        }
        assert!(controller.widen_frontier(&mut cluster, &mut fleet, CpuArch::X86).unwrap().is_empty());
        assert!(states(&cluster).iter().all(|s| *s == SState::S0));
        assert_eq!(controller.frontier_limit(CpuArch::X86, 4), 4);
    }

    #[test]
    fn idle_machine_sleeps_after_threshold_checks() {
        let (mut cluster, mut fleet, mut controller) = setup(4, make_config(3));
        fleet.accountant.reserve(0, 100).unwrap();
        fleet.accountant.reserve(1, 100).unwrap();
        fleet.accountant.reserve(2, 100).unwrap();

        for _ in 0..2 {
            assert!(controller.periodic_check(&mut cluster, &mut fleet).unwrap().is_empty());
        }
        let outcome = controller.periodic_check(&mut cluster, &mut fleet).unwrap();
        assert_eq!(outcome.slept, vec![3]);
        assert!(cluster.commands().contains(&Command::SetState { machine: 3, state: SState::S2 }));
        assert_eq!(controller.stats().sleeps, 1);
    }

    #[test]
    fn idle_machine_stays_up_at_the_floor() {
        let (mut cluster, mut fleet, mut controller) = setup(4, make_config(3));
        // Floor is one machine; only machine 0 is awake.
        for machine in 1..4 {
            cluster.force_state(machine, SState::S5).unwrap();
        }

        for _ in 0..10 {
            let outcome = controller.periodic_check(&mut cluster, &mut fleet).unwrap();
            assert!(outcome.slept.is_empty());
        }
        assert!(cluster.commands().is_empty());
    }

    #[test]
    fn utilization_resets_idle_count() {
        let (mut cluster, mut fleet, mut controller) = setup(4, make_config(3));
        for machine in 0..3 {
            fleet.accountant.reserve(machine, 100).unwrap();
        }

        controller.periodic_check(&mut cluster, &mut fleet).unwrap();
        controller.periodic_check(&mut cluster, &mut fleet).unwrap();
        fleet.accountant.reserve(3, 100).unwrap();
        controller.periodic_check(&mut cluster, &mut fleet).unwrap();
        fleet.accountant.release(3, 100).unwrap();

        controller.periodic_check(&mut cluster, &mut fleet).unwrap();
        controller.periodic_check(&mut cluster, &mut fleet).unwrap();
        assert!(cluster.commands().is_empty());
        let outcome = controller.periodic_check(&mut cluster, &mut fleet).unwrap();
        assert_eq!(outcome.slept, vec![3]);
    }

    #[test]
    fn sleep_states_rotate() {
        let (mut cluster, mut fleet, mut controller) = setup(8, make_config(1));
        let outcome = controller.periodic_check(&mut cluster, &mut fleet).unwrap();

        // Floor is two of eight machines.
        assert_eq!(outcome.slept, vec![0, 1, 2, 3, 4, 5]);
        let targets: Vec<SState> = (0..6).filter_map(|m| fleet.transitions.target(m)).collect();
        use SState::*;
        assert_eq!(targets, vec![S2, S3, S4, S5, S2, S3]);
    }

    #[test]
    fn high_load_wakes_a_batch() {
        let (mut cluster, mut fleet, mut controller) = setup(12, make_config(500));
        controller.bootstrap(&mut cluster, &mut fleet).unwrap();
        settle(&mut cluster, &mut fleet, &mut controller);
        cluster.clear_commands();

        // Three active machines, memory load 6000 / 7782 on each.
        for machine in 0..3 {
            fleet.accountant.reserve(machine, 6000).unwrap();
        }
        let outcome = controller.periodic_check(&mut cluster, &mut fleet).unwrap();

        // Nine inactive: floor(9 * 0.2) = 1.
        assert_eq!(outcome.woken, vec![3]);
        assert!(fleet.transitions.is_waking(3));
    }

    #[test]
    fn sla_latch_forces_wake_and_clears() {
        let (mut cluster, mut fleet, mut controller) = setup(4, make_config(500));
        controller.bootstrap(&mut cluster, &mut fleet).unwrap();
        settle(&mut cluster, &mut fleet, &mut controller);

        controller.latch_sla();
        let outcome = controller.periodic_check(&mut cluster, &mut fleet).unwrap();
        assert_eq!(outcome.woken, vec![1]);
        assert!(!controller.sla_latched());

        settle(&mut cluster, &mut fleet, &mut controller);
        assert!(controller.periodic_check(&mut cluster, &mut fleet).unwrap().woken.is_empty());
    }

    #[test]
    fn warm_spares_keep_a_fraction_awake() {
        let (mut cluster, mut fleet, mut controller) = setup(10, make_config(500));
        let outcome = controller.rebalance_spares(&mut cluster, &mut fleet, CpuArch::X86).unwrap();

        // Ten idle: floor(10 * 0.46) = 4 stay up, six go to S1.
        assert!(outcome.woken.is_empty());
        assert_eq!(outcome.slept, vec![4, 5, 6, 7, 8, 9]);
        assert_eq!(fleet.transitions.target(9), Some(SState::S1));
    }

    #[test]
    fn few_idle_machines_are_all_woken() {
        let (mut cluster, mut fleet, mut controller) = setup(6, make_config(500));
        for machine in 0..2 {
            fleet.accountant.reserve(machine, 100).unwrap();
        }
        cluster.force_state(2, SState::S1).unwrap();
        cluster.force_state(3, SState::S1).unwrap();
        cluster.force_state(4, SState::S5).unwrap();

        let outcome = controller.rebalance_spares(&mut cluster, &mut fleet, CpuArch::X86).unwrap();
        // Machine 4 is off, not a spare.
        assert_eq!(outcome.woken, vec![2, 3]);
        assert!(outcome.slept.is_empty());
    }

    #[test]
    fn state_change_clears_marker() {
        let (mut cluster, mut fleet, mut controller) = setup(2, make_config(500));
        let info = cluster.machine_info(1).unwrap();
        fleet.request_state(&mut cluster, &info, SState::S3).unwrap();

        assert_eq!(controller.on_state_change(&mut fleet, 1), Some(SState::S3));
        assert!(!fleet.transitions.is_pending(1));
        assert_eq!(controller.on_state_change(&mut fleet, 1), None);
    }
}
