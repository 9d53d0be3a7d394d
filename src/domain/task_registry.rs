//! In-process registry of long-running backtest tasks.
//!
//! Callers create a task, hand its [`CancelToken`] to the worker, and poll
//! status and progress by [`TaskId`]. Finished entries are dropped by
//! [`TaskRegistry::purge_expired`] once older than the configured age.
//! [`run_batch_tracked`](super::batch::run_batch_tracked) drives one task
//! per batch job.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backtest::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

#[derive(Debug)]
struct TaskEntry<T> {
    status: TaskStatus,
    progress: f64,
    result: Option<T>,
    error: Option<String>,
    cancel: CancelToken,
    updated: Instant,
}

impl<T> TaskEntry<T> {
    fn touch(&mut self) {
        self.updated = Instant::now();
    }
}

/// Point-in-time copy of a task's state.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot<T> {
    pub id: TaskId,
    pub status: TaskStatus,
    pub progress: f64,
    pub result: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct TaskRegistry<T> {
    tasks: Mutex<HashMap<TaskId, TaskEntry<T>>>,
    next_id: AtomicU64,
    max_age: Duration,
}

impl<T: Clone> TaskRegistry<T> {
    pub fn new(max_age: Duration) -> Self {
        TaskRegistry {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_age,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskEntry<T>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create(&self) -> (TaskId, CancelToken) {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancelToken::new();
        self.lock().insert(
            id,
            TaskEntry {
                status: TaskStatus::Pending,
                progress: 0.0,
                result: None,
                error: None,
                cancel: cancel.clone(),
                updated: Instant::now(),
            },
        );
        debug!(%id, "task created");
        (id, cancel)
    }

    /// Apply `f` to an unfinished task. Returns false when the task is
    /// unknown or already finished.
    fn update(&self, id: TaskId, f: impl FnOnce(&mut TaskEntry<T>)) -> bool {
        let mut tasks = self.lock();
        match tasks.get_mut(&id) {
            Some(entry) if !entry.status.is_finished() => {
                f(entry);
                entry.touch();
                true
            }
            _ => false,
        }
    }

    pub fn start(&self, id: TaskId) -> bool {
        self.update(id, |e| e.status = TaskStatus::Running)
    }

    /// Progress is clamped to `[0, 1]`.
    pub fn set_progress(&self, id: TaskId, progress: f64) -> bool {
        let p = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        self.update(id, |e| e.progress = p)
    }

    pub fn complete(&self, id: TaskId, result: T) -> bool {
        self.update(id, |e| {
            e.status = TaskStatus::Completed;
            e.progress = 1.0;
            e.result = Some(result);
        })
    }

    pub fn fail(&self, id: TaskId, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.update(id, |e| {
            e.status = TaskStatus::Failed;
            e.error = Some(reason);
        })
    }

    /// Signal the worker and mark the task cancelled.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.update(id, |e| {
            e.cancel.cancel();
            e.status = TaskStatus::Cancelled;
        })
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.lock().get(&id).map(|e| e.status)
    }

    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot<T>> {
        self.lock().get(&id).map(|e| TaskSnapshot {
            id,
            status: e.status,
            progress: e.progress,
            result: e.result.clone(),
            error: e.error.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop finished tasks last updated more than `max_age` ago. Returns the
    /// number removed.
    pub fn purge_expired(&self) -> usize {
        let max_age = self.max_age;
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|_, e| !(e.status.is_finished() && e.updated.elapsed() >= max_age));
        let removed = before - tasks.len();
        if removed > 0 {
            debug!(removed, "expired tasks purged");
        }
        removed
    }
}
