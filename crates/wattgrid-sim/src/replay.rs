//! Replay loop — drives the scheduler over an in-memory cluster.
//!
//! Time jumps to the next interesting instant: a task arrival, an injected
//! SLA warning, a periodic check, or an engine completion. Engine events are
//! delivered first, then arrivals, then warnings, then the check.

use std::collections::VecDeque;

use anyhow::Context;
use tracing::{debug, info};

use wattgrid_core::{Event, InMemoryCluster, SchedulerConfig, Time};
use wattgrid_scheduler::{Scheduler, ShutdownReport};

use crate::scenario::{Scenario, SlaInjection, TaskSpec};

/// Replay `scenario` under `config` and return the shutdown report.
///
/// Stops at the horizon, or earlier once every task has finished and the
/// engine has nothing outstanding.
pub fn replay(scenario: &Scenario, config: SchedulerConfig) -> anyhow::Result<ShutdownReport> {
    let mut scheduler =
        Scheduler::new(scenario.build_cluster(), config).context("initializing scheduler")?;

    let mut arrivals: Vec<&TaskSpec> = scenario.tasks.iter().collect();
    arrivals.sort_by_key(|t| (t.arrival, t.id));
    let mut arrivals: VecDeque<&TaskSpec> = arrivals.into();

    let mut warnings: Vec<SlaInjection> = scenario.sla_warnings.clone();
    warnings.sort_by_key(|w| w.at);
    let mut warnings: VecDeque<SlaInjection> = warnings.into();

    let mut next_check = scenario.check_interval;
    let mut now: Time = 0;
    let mut checks = 0u64;

    loop {
        deliver(&mut scheduler, now)?;

        while let Some(task) = arrivals.front().filter(|t| t.arrival <= now) {
            scheduler.cluster_mut().submit_task(task.to_info());
            scheduler
                .handle(now, Event::TaskArrival { task: task.id })
                .with_context(|| format!("placing task {}", task.id))?;
            arrivals.pop_front();
        }

        while let Some(warning) = warnings.front().filter(|w| w.at <= now).copied() {
            warnings.pop_front();
            if scheduler.ledger().contains_task(warning.task) {
                scheduler.handle(now, Event::SlaWarning { task: warning.task })?;
            } else {
                debug!(task = warning.task, at = warning.at, "sla warning for finished task dropped");
            }
        }

        if next_check <= now {
            scheduler.handle(now, Event::PeriodicCheck)?;
            next_check += scenario.check_interval;
            checks += 1;
        }

        let finished = arrivals.is_empty() && scheduler.ledger().task_count() == 0;
        if finished && !scheduler.cluster().has_pending() {
            info!(now, checks, "all tasks finished");
            break;
        }

        let next = [
            arrivals.front().map(|t| t.arrival),
            warnings.front().map(|w| w.at),
            Some(next_check),
            scheduler.cluster().next_due(),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(next_check);

        if next > scenario.horizon {
            deliver(&mut scheduler, scenario.horizon)?;
            now = scenario.horizon;
            info!(now, checks, remaining = scheduler.ledger().task_count(), "horizon reached");
            break;
        }
        now = next.max(now);
    }

    Ok(scheduler.shutdown(now)?)
}

/// Advance the engine to `now` and hand every resulting event to the
/// scheduler. Commands with no delay complete within the same instant.
fn deliver(scheduler: &mut Scheduler<InMemoryCluster>, now: Time) -> anyhow::Result<()> {
    loop {
        let events = scheduler.cluster_mut().advance_to(now);
        if events.is_empty() {
            return Ok(());
        }
        for (at, event) in events {
            scheduler
                .handle(at, event)
                .with_context(|| format!("handling {event:?} at {at}"))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wattgrid_core::PolicyKind;

    const FIXTURE: &str = include_str!("../tests/fixtures/mixed-cluster.toml");

    fn make_config(policy: PolicyKind) -> SchedulerConfig {
        let mut config = SchedulerConfig {
            policy,
            seed: Some(42),
            ..SchedulerConfig::default()
        };
        config.capacity.idle_check_threshold = 5;
        config.capacity.pressure_check_threshold = 3;
        config
    }

    #[test]
    fn every_policy_replays_the_fixture() {
        let scenario = Scenario::parse(FIXTURE).unwrap();
        for policy in [
            PolicyKind::BestFitDecreasing,
            PolicyKind::BucketedRoundRobin,
            PolicyKind::UtilizationBalance,
            PolicyKind::FrequencyScaling,
        ] {
            let report = replay(&scenario, make_config(policy)).unwrap();
            assert_eq!(report.stats.placements, 30, "{policy:?}");
            assert!(report.energy_kwh > 0.0, "{policy:?}");
            assert!(report.simulated_seconds <= 2.0, "{policy:?}");
        }
    }

    #[test]
    fn replay_is_deterministic_for_a_seed() {
        let scenario = Scenario::parse(FIXTURE).unwrap();
        let first = replay(&scenario, make_config(PolicyKind::BestFitDecreasing)).unwrap();
        let second = replay(&scenario, make_config(PolicyKind::BestFitDecreasing)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn short_horizon_stops_early() {
        let mut scenario = Scenario::parse(FIXTURE).unwrap();
        scenario.horizon = 15_000;
        let report = replay(&scenario, make_config(PolicyKind::UtilizationBalance)).unwrap();
        assert!((report.simulated_seconds - 0.015).abs() < 1e-9);
        assert!(report.stats.placements < 30);
        assert!(report.vms_shut_down > 0);
    }
}
