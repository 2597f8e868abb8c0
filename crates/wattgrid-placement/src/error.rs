//! Placement error types.

use thiserror::Error;

use wattgrid_core::{ClusterError, CpuArch, MachineId};

/// Result type alias for placement operations.
pub type PlacementResult<T> = Result<T, PlacementError>;

/// Errors that can occur while ranking machines or moving reservations.
///
/// Running out of capacity is not an error here: reservations clamp and
/// report overcommit instead.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no machines of architecture {0}")]
    EmptyPool(CpuArch),

    #[error("machine not registered: {0}")]
    UnknownMachine(MachineId),

    #[error("release without a matching reservation on machine {0}")]
    ReleaseUnderflow(MachineId),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
}
