//! wattgrid-scheduler — event handling, policies, and VM migration.
//!
//! The [`Scheduler`] receives engine events one at a time and turns them into
//! placements, power-state commands and migrations. What it decides is left to
//! a [`Policy`]; how tasks, VMs and reservations are tracked is shared.
//!
//! # Architecture
//!
//! ```text
//!   engine events ──▶ Scheduler::handle
//!                        │
//!          ┌─────────────┼──────────────────────┐
//!          ▼             ▼                      ▼
//!       Policy        Ledger             Fleet (pools,
//!   (place, rebalance, (task → vm,        reservations,
//!    scale_capacity)    vm → machine)     transitions)
//!          │
//!          ├──▶ PlacementEngine      best fit / first fit / fewest tasks
//!          ├──▶ CapacityController   wake, sleep, frontier, warm spares
//!          └──▶ MigrationController  pressure relief, consolidation
//!                        │
//!                        ▼
//!                 Cluster commands
//! ```
//!
//! # Components
//!
//! - **`scheduler`** — Event dispatch, VM reuse and retirement, shutdown report
//! - **`policy`** — The `Policy` trait and its four strategies
//! - **`migration`** — Pressure relief and consolidation migrations
//! - **`ledger`** — Task and VM bookkeeping
//! - **`report`** — Run counters and the serializable shutdown report

pub mod error;
pub mod ledger;
pub mod migration;
pub mod policy;
pub mod report;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use error::{SchedulerError, SchedulerResult};
pub use ledger::{Ledger, TaskRecord, VmRecord};
pub use migration::{Migration, MigrationController};
pub use policy::{
    BestFitDecreasing, BucketedRoundRobin, Context, FrequencyScaling, Policy, Pressure, UtilizationBalance,
    create_policy,
};
pub use report::{SchedulerStats, ShutdownReport, SlaSummary};
pub use scheduler::Scheduler;
