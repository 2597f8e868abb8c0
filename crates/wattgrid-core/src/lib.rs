//! wattgrid-core — shared vocabulary for the WattGrid placement controller.
//!
//! - **`types`** — identifiers, power/performance states, machine/task/VM
//!   snapshots, and the [`Event`] stream
//! - **`cluster`** — the [`Cluster`] trait through which the scheduler talks
//!   to the simulation engine
//! - **`config`** — `wattgrid.toml` parsing and validation
//! - **`memory`** — [`InMemoryCluster`], a deterministic engine for tests and
//!   trace replay

pub mod cluster;
pub mod config;
pub mod memory;
pub mod types;

pub use cluster::{Cluster, ClusterError, ClusterResult, set_machine_performance};
pub use config::{
    CapacityConfig, FrequencyConfig, MigrationConfig, PlacementConfig, PolicyKind, SchedulerConfig,
};
pub use memory::{Command, InMemoryCluster, MachineSpec, Timing};
pub use types::*;
