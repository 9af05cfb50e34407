//! Scheduler error types

use thiserror::Error;

use crate::task::TaskId;

/// Errors surfaced by scheduler operations.
///
/// Task actions are not represented here: an action's failure is opaque to the
/// scheduler, which logs it and keeps draining (see [`Scheduler::drain`]).
///
/// [`Scheduler::drain`]: crate::Scheduler::drain
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler has been shut down; the schedule request was dropped and
    /// the caller decides whether anything remains to be done.
    #[error("scheduler is shut down")]
    ShutDown,

    /// The task id is neither pending nor currently executing.
    #[error("unknown task id: {0}")]
    UnknownTask(TaskId),

    /// Periodic interval rounds to zero whole seconds.
    #[error("periodic interval must be at least one second")]
    InvalidInterval,
}
