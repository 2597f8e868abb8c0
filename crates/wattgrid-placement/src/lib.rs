//! wattgrid-placement — energy-aware machine selection for new tasks.
//!
//! This crate owns the scheduler's bookkeeping about machines: which pool a
//! machine belongs to, how much of it is reserved, and whether a power-state
//! change is in flight. It issues no VM commands itself; the scheduler turns
//! a [`Choice`] into engine calls.
//!
//! # Components
//!
//! - **`registry`** — Per-architecture pools ordered by efficiency
//! - **`accountant`** — Instruction-rate and memory reservations
//! - **`transitions`** — Power-state changes awaiting completion
//! - **`fleet`** — The three above, bundled with eligibility rules
//! - **`placer`** — Best-fit, first-fit and fewest-tasks selection

pub mod accountant;
pub mod error;
pub mod fleet;
pub mod placer;
pub mod registry;
pub mod transitions;

pub use accountant::{CapacityAccountant, MachineCapacity, Reservation, Transfer};
pub use error::{PlacementError, PlacementResult};
pub use fleet::Fleet;
pub use placer::{Choice, ChoiceKind, PlacementEngine, estimated_power};
pub use registry::{Pool, ResourcePoolRegistry};
pub use transitions::TransitionTracker;
