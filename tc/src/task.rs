//! Task types: identity, payload, and the diagnostic view

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::Scheduler;

/// Maximum stored label length in bytes; longer labels are truncated.
pub const LABEL_MAX: usize = 64;

/// Stable handle for a scheduled task, returned at schedule time.
///
/// Ids are allocated from a per-scheduler counter starting at 1 and are never
/// reused within a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Future produced by one invocation of a task action.
pub type ActionFuture = Pin<Box<dyn Future<Output = eyre::Result<()>> + Send>>;

/// A task's callable. The closure owns whatever context it captured; the
/// scheduler hands it a clone of itself so the action can schedule follow-up
/// work. Periodic actions are invoked once per execution, hence `FnMut`.
pub type Action = Box<dyn FnMut(Scheduler) -> ActionFuture + Send>;

/// A unit of deferred work: when it is due, what to call, and whether it
/// repeats. Dropping a `Task` releases the context captured by its action
/// (one-shot completion, cancellation, scheduler teardown).
pub struct Task {
    pub(crate) id: TaskId,
    /// Due time, unix seconds.
    pub(crate) due_at: i64,
    /// Repeat interval in whole seconds; `None` for one-shot tasks.
    pub(crate) every: Option<i64>,
    pub(crate) label: String,
    pub(crate) action: Action,
}

impl Task {
    pub(crate) fn new(id: TaskId, due_at: i64, every: Option<i64>, label: &str, action: Action) -> Self {
        Self {
            id,
            due_at,
            every,
            label: truncate_label(label),
            action,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Due time as unix seconds.
    pub fn due_at(&self) -> i64 {
        self.due_at
    }

    pub fn is_periodic(&self) -> bool {
        self.every.is_some()
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            label: self.label.clone(),
            due_at: DateTime::from_timestamp(self.due_at, 0).unwrap_or_default(),
            every_secs: self.every.map(|s| s as u64),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("due_at", &self.due_at)
            .field("every", &self.every)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Diagnostic snapshot of a pending task, safe to serialize and ship over the
/// control socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub label: String,
    pub due_at: DateTime<Utc>,
    pub every_secs: Option<u64>,
}

impl TaskInfo {
    pub fn every(&self) -> Option<Duration> {
        self.every_secs.map(Duration::from_secs)
    }
}

/// Clamp a label to [`LABEL_MAX`] bytes without splitting a char.
fn truncate_label(label: &str) -> String {
    if label.len() <= LABEL_MAX {
        return label.to_string();
    }
    let cut = (0..=LABEL_MAX)
        .rev()
        .find(|i| label.is_char_boundary(*i))
        .unwrap_or(0);
    label[..cut].to_string()
}
