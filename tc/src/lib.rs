//! taskclock - Due-Time Task Scheduler
//!
//! taskclock keeps tasks ordered by a one-second-resolution due time and
//! executes them sequentially from a single polling loop. It is the timing
//! core for long-lived agent daemons: services enqueue work shaped as "run
//! this at that wall-clock second", and the loop drains whatever is due once
//! per tick.
//!
//! # Core Concepts
//!
//! - **One logical executor**: actions run one at a time, in due order, never
//!   overlapping; slow actions delay later ones rather than racing them
//! - **Handles everywhere**: [`Scheduler`] is a cheap clone; any thread or
//!   tokio task may schedule or cancel, only `run` executes
//! - **Drift-free periodics**: a repeating task's next due time is derived
//!   from when it actually ran, so delays shift the cadence instead of
//!   queueing catch-up executions
//! - **Cooperative lifecycle**: `stop` is observed at tick boundaries,
//!   `shutdown` additionally releases every pending task and its context
//!
//! # Modules
//!
//! - [`task`] - Task, ids, labels, boxed async actions
//! - [`store`] - Ordered pending-task store with stable ties
//! - [`scheduler`] - Handle, polling loop, cancellation
//! - [`error`] - Scheduler error type

pub mod error;
pub mod scheduler;
pub mod store;
pub mod task;

// Re-export commonly used types
pub use error::SchedulerError;
pub use scheduler::{Scheduler, SchedulerState, TICK};
pub use store::TaskStore;
pub use task::{Action, ActionFuture, LABEL_MAX, Task, TaskId, TaskInfo};
