//! Scheduler error types.

use thiserror::Error;

/// Result type alias for scheduling operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no task runner for {0}")]
    NoRunner(String),

    #[error("invalid start time {0}")]
    InvalidStartTime(String),

    #[error("invalid time schedule {0}")]
    InvalidTimeSchedule(String),

    #[error(transparent)]
    Cluster(#[from] gantry_cluster::ClusterError),

    #[error(transparent)]
    Model(#[from] gantry_core::CoreError),

    #[error(transparent)]
    State(#[from] gantry_state::StateError),
}
