//! Scheduler handle and polling loop

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::error::SchedulerError;
use crate::store::TaskStore;
use crate::task::{Action, ActionFuture, Task, TaskId, TaskInfo};

/// Polling tick. Constant for the life of a scheduler instance; due times have
/// whole-second resolution, so a finer tick buys nothing.
pub const TICK: Duration = Duration::from_secs(1);

/// Loop state: sleeping between polls, or executing due tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Draining,
}

/// Internal state protected by mutex
struct SchedulerInner {
    store: TaskStore,
    state: SchedulerState,
    /// Id of the task whose action is currently running, if any. Such a task
    /// is out of the store, so cancellation has to be tracked separately.
    executing: Option<TaskId>,
    /// Set when the executing task was cancelled mid-flight; suppresses its
    /// reinsertion if it is periodic.
    executing_cancelled: bool,
    /// Once set, every pending task has been released and schedule requests
    /// are refused.
    shutdown: bool,
}

struct Shared {
    inner: Mutex<SchedulerInner>,
    notify: Notify,
    next_id: AtomicU64,
    stop: AtomicBool,
}

/// Due-time task scheduler.
///
/// Cloning yields another handle to the same scheduler, so tasks can be
/// enqueued or cancelled from any thread or tokio task; the store is guarded
/// by a mutex. Task actions themselves always execute sequentially on the one
/// context running [`Scheduler::run`] — no two actions ever overlap, and each
/// runs to completion before the next due task is considered. Actions doing
/// blocking work must keep it bounded or hand it off and schedule a follow-up
/// task for the result.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(SchedulerInner {
                    store: TaskStore::new(),
                    state: SchedulerState::Idle,
                    executing: None,
                    executing_cancelled: false,
                    shutdown: false,
                }),
                notify: Notify::new(),
                next_id: AtomicU64::new(1),
                stop: AtomicBool::new(false),
            }),
        }
    }

    /// Schedule a one-shot task due at `due_at`. The task is discarded after
    /// it executes; the returned id stays valid for cancellation until then.
    pub async fn schedule_once<A>(&self, due_at: DateTime<Utc>, label: &str, action: A) -> Result<TaskId, SchedulerError>
    where
        A: FnMut(Scheduler) -> ActionFuture + Send + 'static,
    {
        self.insert_task(due_at.timestamp(), None, label, Box::new(action)).await
    }

    /// Schedule a periodic task first due `every` from now. After each
    /// execution it is re-enqueued at the executing drain's timestamp plus
    /// `every` — re-based on actual execution time, so a delayed run shifts
    /// the cadence instead of causing a catch-up burst.
    pub async fn schedule_every<A>(&self, every: Duration, label: &str, action: A) -> Result<TaskId, SchedulerError>
    where
        A: FnMut(Scheduler) -> ActionFuture + Send + 'static,
    {
        let every_secs = interval_secs(every)?;
        let first_due = Utc::now().timestamp() + every_secs;
        self.insert_task(first_due, Some(every_secs), label, Box::new(action)).await
    }

    /// Schedule a periodic task with an explicit first due time, decoupling
    /// the initial delay from the repeat interval.
    pub async fn schedule_every_at<A>(
        &self,
        first_due: DateTime<Utc>,
        every: Duration,
        label: &str,
        action: A,
    ) -> Result<TaskId, SchedulerError>
    where
        A: FnMut(Scheduler) -> ActionFuture + Send + 'static,
    {
        let every_secs = interval_secs(every)?;
        self.insert_task(first_due.timestamp(), Some(every_secs), label, Box::new(action)).await
    }

    async fn insert_task(
        &self,
        due_at: i64,
        every: Option<i64>,
        label: &str,
        action: Action,
    ) -> Result<TaskId, SchedulerError> {
        let mut inner = self.shared.inner.lock().await;
        if inner.shutdown {
            debug!(label, "Scheduler::insert_task: refused, scheduler is shut down");
            return Err(SchedulerError::ShutDown);
        }

        let id = TaskId::new(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        inner.store.insert(Task::new(id, due_at, every, label, action));
        debug!(%id, due_at, ?every, label, "Scheduler::insert_task: scheduled");
        Ok(id)
    }

    /// Cancel a task by id, releasing its captured context.
    ///
    /// A pending task is removed from the store. If `id` is the task whose
    /// action is running right now (periodic tasks leave the store during
    /// execution), the cancellation lands after the action returns: the task
    /// is not reinserted. Anything else is [`SchedulerError::UnknownTask`].
    pub async fn cancel(&self, id: TaskId) -> Result<(), SchedulerError> {
        let mut inner = self.shared.inner.lock().await;

        if inner.store.remove(id).is_some() {
            debug!(%id, "Scheduler::cancel: removed pending task");
            return Ok(());
        }

        if inner.executing == Some(id) && !inner.executing_cancelled {
            inner.executing_cancelled = true;
            debug!(%id, "Scheduler::cancel: task in flight, reinsertion suppressed");
            return Ok(());
        }

        debug!(%id, "Scheduler::cancel: unknown task id");
        Err(SchedulerError::UnknownTask(id))
    }

    /// Run the polling loop until [`Scheduler::stop`] is observed.
    ///
    /// Each pass checks the stop flag, drains everything due at the current
    /// wall-clock second, then sleeps one [`TICK`]. The stop flag is checked
    /// once per tick only — an in-flight action is never interrupted.
    pub async fn run(&self) {
        info!("scheduler loop starting");
        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                break;
            }

            self.drain(Utc::now()).await;

            tokio::select! {
                _ = tokio::time::sleep(TICK) => {}
                _ = self.shared.notify.notified() => {}
            }
        }
        info!("scheduler loop stopped");
    }

    /// Execute every task due at `now`, one at a time, in due-time order.
    /// Returns how many actions ran.
    ///
    /// Periodic tasks are removed and reinserted (due `now + every`) rather
    /// than mutated in place, which re-validates their sorted position. A
    /// failing action is logged and the drain continues; nothing is retried.
    ///
    /// Public so embedders and tests can advance a scheduler through
    /// simulated time without running the loop.
    pub async fn drain(&self, now: DateTime<Utc>) -> usize {
        let now_ts = now.timestamp();
        let mut executed = 0usize;

        loop {
            let mut task = {
                let mut inner = self.shared.inner.lock().await;
                let Some(task) = inner.store.pop_next_due(now_ts) else {
                    inner.state = SchedulerState::Idle;
                    inner.executing = None;
                    break;
                };
                inner.state = SchedulerState::Draining;
                inner.executing = Some(task.id());
                inner.executing_cancelled = false;
                task
            };

            debug!(id = %task.id(), label = %task.label(), "Scheduler::drain: executing task");
            if let Err(error) = (task.action)(self.clone()).await {
                warn!(id = %task.id(), label = %task.label(), %error, "task action failed");
            }
            executed += 1;

            let mut inner = self.shared.inner.lock().await;
            let cancelled = std::mem::take(&mut inner.executing_cancelled);
            inner.executing = None;
            if let Some(every) = task.every {
                if cancelled || inner.shutdown {
                    debug!(id = %task.id(), "Scheduler::drain: periodic task retired");
                } else {
                    task.due_at = now_ts + every;
                    debug!(id = %task.id(), due_at = task.due_at, "Scheduler::drain: periodic task reinserted");
                    inner.store.insert(task);
                }
            }
        }

        if executed > 0 {
            debug!(executed, "Scheduler::drain: drained");
        }
        executed
    }

    /// Request orderly loop exit. Cooperative: the flag is observed at the
    /// next tick boundary; pending tasks stay in the store.
    pub fn stop(&self) {
        debug!("Scheduler::stop: requested");
        self.shared.stop.store(true, Ordering::SeqCst);
        // notify_one leaves a permit, so a stop between polls is not missed
        self.shared.notify.notify_one();
    }

    /// Stop the loop and release every remaining task and its context.
    /// Subsequent schedule calls fail with [`SchedulerError::ShutDown`].
    /// Idempotent.
    pub async fn shutdown(&self) {
        self.stop();
        let mut inner = self.shared.inner.lock().await;
        if inner.shutdown {
            return;
        }
        inner.shutdown = true;
        let released = inner.store.clear();
        info!(released, "scheduler shut down, pending tasks released");
    }

    /// Whether [`Scheduler::stop`] has been requested.
    pub fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }

    /// Number of pending tasks.
    pub async fn count(&self) -> usize {
        self.shared.inner.lock().await.store.count()
    }

    /// Diagnostic snapshot of pending tasks in execution order.
    pub async fn list(&self) -> Vec<TaskInfo> {
        self.shared.inner.lock().await.store.list()
    }

    /// Earliest pending due time.
    pub async fn next_due(&self) -> Option<DateTime<Utc>> {
        let inner = self.shared.inner.lock().await;
        inner.store.next_due_at().and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    /// Current loop state.
    pub async fn state(&self) -> SchedulerState {
        self.shared.inner.lock().await.state
    }
}

fn interval_secs(every: Duration) -> Result<i64, SchedulerError> {
    let secs = i64::try_from(every.as_secs()).map_err(|_| SchedulerError::InvalidInterval)?;
    if secs == 0 {
        return Err(SchedulerError::InvalidInterval);
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    /// Action that records its label into a shared trace.
    fn recording(trace: Arc<StdMutex<Vec<String>>>, name: &'static str) -> impl FnMut(Scheduler) -> ActionFuture + Send {
        move |_| {
            let trace = trace.clone();
            Box::pin(async move {
                trace.lock().unwrap().push(name.to_string());
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let sched = Scheduler::new();
        let a = sched.schedule_once(at(10), "a", |_| Box::pin(async { Ok(()) })).await.unwrap();
        let b = sched.schedule_once(at(20), "b", |_| Box::pin(async { Ok(()) })).await.unwrap();
        assert_eq!(a, TaskId::new(1));
        assert_eq!(b, TaskId::new(2));
    }

    #[tokio::test]
    async fn test_drain_executes_due_tasks_in_due_order() {
        let sched = Scheduler::new();
        let trace = Arc::new(StdMutex::new(Vec::new()));

        sched.schedule_once(at(30), "late", recording(trace.clone(), "late")).await.unwrap();
        sched.schedule_once(at(10), "early", recording(trace.clone(), "early")).await.unwrap();
        sched.schedule_once(at(20), "mid", recording(trace.clone(), "mid")).await.unwrap();

        let executed = sched.drain(at(30)).await;
        assert_eq!(executed, 3);
        assert_eq!(*trace.lock().unwrap(), vec!["early", "mid", "late"]);
        assert_eq!(sched.count().await, 0);
    }

    #[tokio::test]
    async fn test_drain_leaves_future_tasks_alone() {
        let sched = Scheduler::new();
        let trace = Arc::new(StdMutex::new(Vec::new()));

        sched.schedule_once(at(10), "due", recording(trace.clone(), "due")).await.unwrap();
        sched.schedule_once(at(100), "future", recording(trace.clone(), "future")).await.unwrap();

        assert_eq!(sched.drain(at(50)).await, 1);
        assert_eq!(*trace.lock().unwrap(), vec!["due"]);
        assert_eq!(sched.count().await, 1);
    }

    #[tokio::test]
    async fn test_drain_empty_is_noop() {
        let sched = Scheduler::new();
        assert_eq!(sched.drain(at(1_000)).await, 0);
        assert_eq!(sched.count().await, 0);
        assert_eq!(sched.state().await, SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_periodic_rebases_on_drain_time_not_original_due() {
        let sched = Scheduler::new();
        sched
            .schedule_every_at(at(1_000), Duration::from_secs(10), "beat", |_| Box::pin(async { Ok(()) }))
            .await
            .unwrap();

        // Executed 3 seconds late: next due must be 1003 + 10, not 1000 + 10.
        assert_eq!(sched.drain(at(1_003)).await, 1);
        let infos = sched.list().await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].due_at.timestamp(), 1_013);
    }

    #[tokio::test]
    async fn test_periodic_keeps_its_id_across_executions() {
        let sched = Scheduler::new();
        let id = sched
            .schedule_every_at(at(10), Duration::from_secs(5), "beat", |_| Box::pin(async { Ok(()) }))
            .await
            .unwrap();

        sched.drain(at(10)).await;
        let infos = sched.list().await;
        assert_eq!(infos[0].id, id);

        // Still cancellable by the original id.
        sched.cancel(id).await.unwrap();
        assert_eq!(sched.count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_pending_removes_exactly_one() {
        let sched = Scheduler::new();
        let trace = Arc::new(StdMutex::new(Vec::new()));

        let keep = sched.schedule_once(at(10), "keep", recording(trace.clone(), "keep")).await.unwrap();
        let drop_id = sched.schedule_once(at(10), "drop", recording(trace.clone(), "drop")).await.unwrap();
        assert_eq!(sched.count().await, 2);

        sched.cancel(drop_id).await.unwrap();
        assert_eq!(sched.count().await, 1);

        sched.drain(at(100)).await;
        assert_eq!(*trace.lock().unwrap(), vec!["keep"]);
        // already executed, so the kept id is unknown now
        assert_eq!(sched.cancel(keep).await, Err(SchedulerError::UnknownTask(keep)));
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_errors() {
        let sched = Scheduler::new();
        let bogus = TaskId::new(999);
        assert_eq!(sched.cancel(bogus).await, Err(SchedulerError::UnknownTask(bogus)));
    }

    #[tokio::test]
    async fn test_in_flight_cancel_suppresses_reinsertion() {
        let sched = Scheduler::new();
        let own_id: Arc<StdMutex<Option<TaskId>>> = Arc::new(StdMutex::new(None));

        let id_slot = own_id.clone();
        let id = sched
            .schedule_every_at(at(10), Duration::from_secs(5), "self-retiring", move |handle| {
                let id_slot = id_slot.clone();
                Box::pin(async move {
                    let id = id_slot.lock().unwrap().expect("id recorded before drain");
                    handle.cancel(id).await?;
                    Ok(())
                })
            })
            .await
            .unwrap();
        *own_id.lock().unwrap() = Some(id);

        assert_eq!(sched.drain(at(10)).await, 1);
        // retired itself: nothing reinserted, nothing runs later
        assert_eq!(sched.count().await, 0);
        assert_eq!(sched.drain(at(100)).await, 0);
    }

    #[tokio::test]
    async fn test_failed_action_does_not_block_the_queue() {
        let sched = Scheduler::new();
        let trace = Arc::new(StdMutex::new(Vec::new()));

        sched
            .schedule_once(at(10), "bad", |_| Box::pin(async { Err(eyre::eyre!("collector exploded")) }))
            .await
            .unwrap();
        sched.schedule_once(at(11), "good", recording(trace.clone(), "good")).await.unwrap();

        assert_eq!(sched.drain(at(20)).await, 2);
        assert_eq!(*trace.lock().unwrap(), vec!["good"]);
    }

    #[tokio::test]
    async fn test_action_scheduling_at_or_before_now_runs_in_same_drain() {
        let sched = Scheduler::new();
        let trace = Arc::new(StdMutex::new(Vec::new()));

        let inner_trace = trace.clone();
        sched
            .schedule_once(at(10), "outer", move |handle| {
                let trace = inner_trace.clone();
                Box::pin(async move {
                    trace.lock().unwrap().push("outer".to_string());
                    let follow_trace = trace.clone();
                    handle
                        .schedule_once(at(10), "inner", move |_| {
                            let trace = follow_trace.clone();
                            Box::pin(async move {
                                trace.lock().unwrap().push("inner".to_string());
                                Ok(())
                            })
                        })
                        .await?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        assert_eq!(sched.drain(at(10)).await, 2);
        assert_eq!(*trace.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn test_state_is_draining_while_an_action_runs() {
        let sched = Scheduler::new();
        let seen = Arc::new(StdMutex::new(None));

        let seen_slot = seen.clone();
        sched
            .schedule_once(at(10), "observer", move |handle| {
                let seen_slot = seen_slot.clone();
                Box::pin(async move {
                    *seen_slot.lock().unwrap() = Some(handle.state().await);
                    Ok(())
                })
            })
            .await
            .unwrap();

        sched.drain(at(10)).await;
        assert_eq!(*seen.lock().unwrap(), Some(SchedulerState::Draining));
        assert_eq!(sched.state().await, SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_releases_captured_contexts() {
        let sched = Scheduler::new();
        let context = Arc::new(());

        let captured = context.clone();
        sched
            .schedule_once(at(1_000_000), "holder", move |_| {
                let _held = captured.clone();
                Box::pin(async { Ok(()) })
            })
            .await
            .unwrap();
        assert_eq!(Arc::strong_count(&context), 2);

        sched.shutdown().await;
        assert_eq!(Arc::strong_count(&context), 1);
        assert_eq!(sched.count().await, 0);
    }

    #[tokio::test]
    async fn test_schedule_after_shutdown_is_refused() {
        let sched = Scheduler::new();
        sched.shutdown().await;
        let result = sched.schedule_once(at(10), "late", |_| Box::pin(async { Ok(()) })).await;
        assert_eq!(result.unwrap_err(), SchedulerError::ShutDown);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let sched = Scheduler::new();
        sched.schedule_once(at(10), "x", |_| Box::pin(async { Ok(()) })).await.unwrap();
        sched.shutdown().await;
        sched.shutdown().await;
        assert!(sched.is_stopped());
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let sched = Scheduler::new();
        let result = sched
            .schedule_every(Duration::from_millis(250), "too-fast", |_| Box::pin(async { Ok(()) }))
            .await;
        assert_eq!(result.unwrap_err(), SchedulerError::InvalidInterval);
    }

    #[tokio::test]
    async fn test_stop_exits_run_promptly() {
        let sched = Scheduler::new();
        let runner = {
            let sched = sched.clone();
            tokio::spawn(async move { sched.run().await })
        };

        // Let the loop reach its sleep, then stop it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        sched.stop();

        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("run did not exit after stop")
            .expect("run task panicked");
        assert!(sched.is_stopped());
    }
}
