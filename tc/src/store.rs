//! Ordered task store
//!
//! Keeps pending tasks sorted ascending by due time. Ties go after existing
//! entries with the same due time, so equal-due tasks run in insertion order.
//! Linear-scan insertion; the store holds a handful of service timers, not a
//! workload queue.

use std::collections::VecDeque;

use crate::task::{Task, TaskId, TaskInfo};

/// Sorted collection of not-yet-due tasks.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: VecDeque<Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self { tasks: VecDeque::new() }
    }

    /// Insert maintaining ascending due-time order. Inserting into an empty
    /// store makes the task the sole head entry.
    pub fn insert(&mut self, task: Task) {
        let at = self
            .tasks
            .iter()
            .position(|t| t.due_at > task.due_at)
            .unwrap_or(self.tasks.len());
        self.tasks.insert(at, task);
    }

    /// Whether the earliest task is due at `now` (unix seconds).
    pub fn peek_due(&self, now: i64) -> bool {
        self.tasks.front().is_some_and(|t| t.due_at <= now)
    }

    /// Remove and return the earliest task if it is due. Re-checks the head on
    /// every call, so a task inserted mid-drain with a due time at or before
    /// `now` is still picked up by the same drain.
    pub fn pop_next_due(&mut self, now: i64) -> Option<Task> {
        if self.peek_due(now) { self.tasks.pop_front() } else { None }
    }

    /// Remove and return every due task in increasing due-time order, stopping
    /// at the first task still in the future. The store is sorted, so nothing
    /// past that point needs scanning.
    pub fn pop_due(&mut self, now: i64) -> Vec<Task> {
        let mut due = Vec::new();
        while let Some(task) = self.pop_next_due(now) {
            due.push(task);
        }
        due
    }

    /// Detach a specific pending task, returning it to the caller (which
    /// usually just drops it, releasing the captured context).
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let idx = self.tasks.iter().position(|t| t.id == id)?;
        self.tasks.remove(idx)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    pub fn count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Earliest due time, unix seconds.
    pub fn next_due_at(&self) -> Option<i64> {
        self.tasks.front().map(|t| t.due_at)
    }

    /// Diagnostic snapshot of all pending tasks, in execution order.
    pub fn list(&self) -> Vec<TaskInfo> {
        self.tasks.iter().map(Task::info).collect()
    }

    /// Drop every pending task, returning how many were released.
    pub fn clear(&mut self) -> usize {
        let n = self.tasks.len();
        self.tasks.clear();
        n
    }
}
