//! Background task dispatch with a shared/exclusive resource discipline.
//!
//! Submission takes a job plus its resource sets and returns a task id;
//! a spawned worker acquires one async `RwLock` per declared resource
//! (exclusive = write, shared = read, always in sorted id order so two
//! jobs can never deadlock on each other) and only then runs the job.
//! An exclusive lock on a repository serializes writers per repository;
//! a shared lock on a remote lets many repositories sync from one remote
//! concurrently.
//!
//! Cancellation is pre-execution only: a cancel request flips a flag that
//! the worker checks after acquiring locks but before running. A job that
//! was canceled this way finishes in the `Canceled` state, which callers
//! surface as throttled rather than failed.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Lifecycle of a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Waiting,
    Running,
    Completed,
    Canceled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Canceled | TaskState::Failed
        )
    }
}

/// Snapshot of a task's bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub name: String,
    pub state: TaskState,
    pub error: Option<String>,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Convert a finished task into a result the HTTP layer can surface:
    /// completed is success, canceled-before-run is throttled (retryable),
    /// anything else carries the job's own error message.
    pub fn outcome(&self) -> AppResult<()> {
        match self.state {
            TaskState::Completed => Ok(()),
            TaskState::Canceled => Err(AppError::Throttled),
            TaskState::Failed => Err(AppError::TaskFailed(
                self.error.clone().unwrap_or_else(|| "unknown error".to_string()),
            )),
            TaskState::Waiting | TaskState::Running => Err(AppError::InternalError(
                "task has not finished".to_string(),
            )),
        }
    }
}

struct TaskSlot {
    record: TaskRecord,
    tx: watch::Sender<TaskState>,
    cancel_requested: bool,
}

enum ResourceGuard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Worker-pool scheduler enforcing the resource locking discipline.
pub struct Scheduler {
    tasks: Mutex<HashMap<Uuid, TaskSlot>>,
    locks: Mutex<HashMap<Uuid, Arc<RwLock<()>>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch a job with its exclusive and shared resource sets.
    ///
    /// Returns immediately with the task id; the job runs on the tokio
    /// pool once all declared resources are acquired.
    pub fn dispatch<F>(
        self: &Arc<Self>,
        name: &str,
        exclusive: Vec<Uuid>,
        shared: Vec<Uuid>,
        job: F,
    ) -> Uuid
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (tx, _rx) = watch::channel(TaskState::Waiting);
        let record = TaskRecord {
            id,
            name: name.to_string(),
            state: TaskState::Waiting,
            error: None,
            created: Utc::now(),
            started: None,
            finished: None,
        };
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                TaskSlot {
                    record,
                    tx,
                    cancel_requested: false,
                },
            );

        debug!(task = %id, name = %name, "Task dispatched");
        let scheduler = Arc::clone(self);
        let task_name = name.to_string();
        tokio::spawn(async move {
            let guards = scheduler.acquire(exclusive, shared).await;

            if scheduler.take_cancel(id) {
                info!(task = %id, name = %task_name, "Task canceled before running");
                scheduler.finish(id, TaskState::Canceled, None);
                return;
            }

            scheduler.set_running(id);
            let result = job.await;
            drop(guards);

            match result {
                Ok(()) => {
                    info!(task = %id, name = %task_name, "Task completed");
                    scheduler.finish(id, TaskState::Completed, None);
                }
                Err(e) => {
                    error!(task = %id, name = %task_name, error = %format!("{e:#}"), "Task failed");
                    scheduler.finish(id, TaskState::Failed, Some(format!("{e:#}")));
                }
            }
        });
        id
    }

    async fn acquire(&self, exclusive: Vec<Uuid>, shared: Vec<Uuid>) -> Vec<ResourceGuard> {
        let mut wanted: Vec<(Uuid, bool)> = exclusive
            .into_iter()
            .map(|r| (r, true))
            .chain(shared.into_iter().map(|r| (r, false)))
            .collect();
        wanted.sort_by_key(|&(id, _)| id);
        wanted.dedup_by_key(|&mut (id, _)| id);

        let mut guards = Vec::with_capacity(wanted.len());
        for (resource, exclusive) in wanted {
            let lock = self
                .locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(resource)
                .or_insert_with(|| Arc::new(RwLock::new(())))
                .clone();
            if exclusive {
                guards.push(ResourceGuard::Exclusive(lock.write_owned().await));
            } else {
                guards.push(ResourceGuard::Shared(lock.read_owned().await));
            }
        }
        guards
    }

    /// Request cancellation of a task that has not started running.
    /// Returns false when the task is already running or finished.
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        match tasks.get_mut(&id) {
            Some(slot) if slot.record.state == TaskState::Waiting => {
                slot.cancel_requested = true;
                true
            }
            _ => false,
        }
    }

    fn take_cancel(&self, id: Uuid) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|slot| slot.cancel_requested)
            .unwrap_or(false)
    }

    fn set_running(&self, id: Uuid) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = tasks.get_mut(&id) {
            slot.record.state = TaskState::Running;
            slot.record.started = Some(Utc::now());
            // send_replace stores the value even with no live receivers,
            // so a wait() that subscribes later still observes it.
            slot.tx.send_replace(TaskState::Running);
        }
    }

    fn finish(&self, id: Uuid, state: TaskState, error: Option<String>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = tasks.get_mut(&id) {
            slot.record.state = state;
            slot.record.error = error;
            slot.record.finished = Some(Utc::now());
            slot.tx.send_replace(state);
        }
    }

    /// Current snapshot of a task.
    pub fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|slot| slot.record.clone())
    }

    /// Wait until a task reaches a terminal state and return its record.
    pub async fn wait(&self, id: Uuid) -> AppResult<TaskRecord> {
        let mut rx = {
            let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = tasks
                .get(&id)
                .ok_or_else(|| AppError::NotFound(format!("Task {id} not found")))?;
            slot.tx.subscribe()
        };
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.get(id)
            .ok_or_else(|| AppError::NotFound(format!("Task {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_job(
        current: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    ) -> impl Future<Output = anyhow::Result<()>> {
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn exclusive_resource_serializes_writers() {
        let scheduler = Arc::new(Scheduler::new());
        let repository = Uuid::new_v4();
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let a = scheduler.dispatch(
            "sync",
            vec![repository],
            vec![],
            counting_job(current.clone(), max_seen.clone()),
        );
        let b = scheduler.dispatch(
            "sync",
            vec![repository],
            vec![],
            counting_job(current.clone(), max_seen.clone()),
        );

        scheduler.wait(a).await.expect("task a finishes");
        scheduler.wait(b).await.expect("task b finishes");
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shared_resource_allows_concurrent_readers() {
        let scheduler = Arc::new(Scheduler::new());
        let remote = Uuid::new_v4();
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let make_job = |barrier: Arc<tokio::sync::Barrier>| async move {
            // Only completes if both jobs hold the shared lock at once.
            barrier.wait().await;
            Ok(())
        };

        let a = scheduler.dispatch("sync", vec![], vec![remote], make_job(barrier.clone()));
        let b = scheduler.dispatch("sync", vec![], vec![remote], make_job(barrier));

        let done = tokio::time::timeout(Duration::from_secs(5), async {
            scheduler.wait(a).await.expect("task a finishes");
            scheduler.wait(b).await.expect("task b finishes");
        })
        .await;
        assert!(done.is_ok(), "shared locks must not serialize readers");
    }

    #[tokio::test]
    async fn cancel_before_run_surfaces_as_throttled() {
        let scheduler = Arc::new(Scheduler::new());
        let repository = Uuid::new_v4();

        // Hold the repository lock so the dispatched job stays waiting.
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let blocker = scheduler.dispatch("hold", vec![repository], vec![], async {
            let _ = release_rx.await;
            Ok(())
        });
        // The blocker owns the lock once it reports running.
        while scheduler.get(blocker).map(|r| r.state) != Some(TaskState::Running) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let victim = scheduler.dispatch("sync", vec![repository], vec![], async { Ok(()) });
        assert!(scheduler.cancel(victim));
        let _ = release_tx.send(());

        let record = scheduler.wait(victim).await.expect("task finishes");
        assert_eq!(record.state, TaskState::Canceled);
        assert!(matches!(record.outcome(), Err(AppError::Throttled)));

        scheduler.wait(blocker).await.expect("blocker finishes");
    }

    #[tokio::test]
    async fn failure_carries_the_job_error() {
        let scheduler = Arc::new(Scheduler::new());
        let id = scheduler.dispatch("sync", vec![], vec![], async {
            anyhow::bail!("upstream unreachable")
        });
        let record = scheduler.wait(id).await.expect("task finishes");
        assert_eq!(record.state, TaskState::Failed);
        let err = record.outcome().expect_err("failed task yields error");
        assert!(err.to_string().contains("upstream unreachable"));
    }
}
