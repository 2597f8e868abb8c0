//! wattgrid-autoscale — power-state and performance-state scaling.
//!
//! Decides how many machines of each pool are awake and how fast their
//! cores run. All commands go out through the placement crate's
//! [`Fleet`](wattgrid_placement::Fleet), which records in-flight
//! transitions so a machine is never commanded twice.
//!
//! # Scaling Algorithm
//!
//! ```text
//! start-up:   max(1, floor(pool * startup_active_fraction)) -> S0, rest -> S5
//!             (tiered: quarters -> S0, S1, S3, S5)
//!
//! each check, per pool:
//!     load = max(reserved_mips / total_mips, reserved_mem / total_mem)
//!            over active machines
//!     if load > high_load_threshold or sla latched:
//!         wake max(1, floor(inactive * wake_batch_fraction))
//!     else:
//!         sleep machines idle for idle_check_threshold checks
//!         while awake > max(1, floor(pool * active_floor_fraction))
//!     clear sla latch (after every pool)
//! ```
//!
//! # Components
//!
//! - **`controller`** — Start-up activation, periodic checks, warm spares
//! - **`frontier`** — Activation frontier widened under sustained pressure
//! - **`pstate`** — Per-machine P-state tuning and cluster-wide bands

pub mod controller;
pub mod frontier;
pub mod pstate;

pub use controller::{CapacityController, ScalingOutcome, ScalingStats};
pub use frontier::ActivationFrontier;
pub use pstate::{FrequencyScaler, tune_performance};
