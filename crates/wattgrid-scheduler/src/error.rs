//! Scheduler error types.

use thiserror::Error;

use wattgrid_core::{ClusterError, TaskId, VmId};
use wattgrid_placement::PlacementError;

/// Errors that can occur while handling an event.
///
/// Lack of capacity and a missing migration destination are handled in
/// place and never show up here. These variants mean the scheduler's own
/// bookkeeping disagrees with the event stream.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task not tracked: {0}")]
    UnknownTask(TaskId),

    #[error("vm not tracked: {0}")]
    UnknownVm(VmId),

    #[error("task already placed: {0}")]
    DuplicateTask(TaskId),

    #[error("vm {0} already has a migration in flight")]
    AlreadyMigrating(VmId),

    #[error("migration completed for vm {0}, which was not migrating")]
    NotMigrating(VmId),

    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
