//! Deferred work: run a task once a delay has passed, unless it is cancelled
//! before it starts.
//!
//! Two schedulers implement the same trait:
//! - `RuntimeScheduler` arms a timer on a tokio runtime (production).
//! - `ManualScheduler` queues tasks until the host calls `poll()`, so tests
//!   can count exactly how many deferred tasks ran.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::executor::{AsyncExecutor, ExecutorConfig, ExecutorError};

/// A unit of deferred work.
pub type Task = BoxFuture<'static, ()>;

/// Handle to one scheduled task.
///
/// Cancelling only has an effect before the task starts; a running task is
/// never interrupted.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    token: CancellationToken,
    started: Arc<AtomicBool>,
}

impl TaskHandle {
    fn new() -> Self {
        Self::default()
    }

    /// Cancel the task if it has not started yet.
    ///
    /// # Returns
    /// True if the task will not run.
    pub fn cancel(&self) -> bool {
        self.token.cancel();
        !self.started.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Mark the task as started, unless it was cancelled first.
    fn try_start(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.started.store(true, Ordering::Release);
        true
    }
}

/// Timer plus deferred-work queue.
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed.
    fn schedule_after(&self, delay: Duration, task: Task) -> TaskHandle;
}

// ============================================================================
// Runtime scheduler
// ============================================================================

/// Scheduler backed by tokio timers.
#[derive(Debug, Clone)]
pub struct RuntimeScheduler {
    handle: Handle,
}

impl RuntimeScheduler {
    /// Schedule onto the runtime behind `handle`. The runtime must have its
    /// time driver enabled.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Schedule onto an executor's runtime.
    pub fn for_executor(executor: &AsyncExecutor) -> Self {
        Self::new(executor.handle().clone())
    }
}

impl Scheduler for RuntimeScheduler {
    fn schedule_after(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let task_handle: TaskHandle = handle.clone();

        self.handle.spawn(async move {
            tokio::select! {
                _ = task_handle.token.cancelled() => {
                    tracing::trace!("deferred task cancelled before its timer fired");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            if task_handle.try_start() {
                task.await;
            }
        });

        handle
    }
}

// ============================================================================
// Manual scheduler
// ============================================================================

struct Scheduled {
    due: Instant,
    handle: TaskHandle,
    task: Task,
}

/// Scheduler driven explicitly by the host.
///
/// Tasks sit in a queue until `poll` (due tasks only) or `run_pending`
/// (everything) executes them on an internal executor. The calling thread
/// blocks until each task finishes, so it must not be inside an async context.
pub struct ManualScheduler {
    queue: Mutex<Vec<Scheduled>>,
    executor: AsyncExecutor,
}

impl ManualScheduler {
    pub fn new() -> Result<Self, ExecutorError> {
        Ok(Self {
            queue: Mutex::new(Vec::new()),
            executor: AsyncExecutor::new(ExecutorConfig::default().with_worker_threads(1))?,
        })
    }

    /// Run every due, non-cancelled task to completion.
    ///
    /// # Returns
    /// Number of tasks that ran.
    pub fn poll(&self) -> Result<usize, ExecutorError> {
        let now: Instant = Instant::now();
        self.run_where(|scheduled| scheduled.due <= now)
    }

    /// Run every non-cancelled task regardless of its delay.
    pub fn run_pending(&self) -> Result<usize, ExecutorError> {
        self.run_where(|_| true)
    }

    /// Number of queued tasks that have not been cancelled.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .iter()
            .filter(|s| !s.handle.is_cancelled())
            .count()
    }

    fn run_where<P>(&self, ready: P) -> Result<usize, ExecutorError>
    where
        P: Fn(&Scheduled) -> bool,
    {
        // Tasks may schedule more work, so take them out before running any.
        let batch: Vec<Scheduled> = {
            let mut queue = self.queue.lock();
            queue.retain(|s| !s.handle.is_cancelled());
            let (run, keep): (Vec<Scheduled>, Vec<Scheduled>) =
                std::mem::take(&mut *queue).into_iter().partition(|s| ready(s));
            *queue = keep;
            run
        };

        let mut ran: usize = 0;
        for scheduled in batch {
            if !scheduled.handle.try_start() {
                continue;
            }
            self.executor.block_on(scheduled.task)?;
            ran += 1;
        }
        tracing::trace!(ran, "manual scheduler polled");
        Ok(ran)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        self.queue.lock().push(Scheduled {
            due: Instant::now() + delay,
            handle: handle.clone(),
            task,
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::FutureExt;

    use super::*;

    fn counting_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter: Arc<AtomicUsize> = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    #[test]
    fn test_manual_poll_runs_only_due_tasks() {
        let scheduler = ManualScheduler::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_after(Duration::ZERO, counting_task(&counter));
        scheduler.schedule_after(Duration::from_secs(3600), counting_task(&counter));
        assert_eq!(scheduler.pending(), 2);

        assert_eq!(scheduler.poll().unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 1);

        assert_eq!(scheduler.run_pending().unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_manual_cancelled_task_never_runs() {
        let scheduler = ManualScheduler::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let handle: TaskHandle = scheduler.schedule_after(Duration::ZERO, counting_task(&counter));
        assert!(handle.cancel());
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.poll().unwrap(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!handle.has_started());
    }

    #[test]
    fn test_runtime_scheduler_fires_after_delay() {
        let executor = AsyncExecutor::with_defaults().unwrap();
        let scheduler = RuntimeScheduler::for_executor(&executor);
        let counter = Arc::new(AtomicUsize::new(0));

        let handle: TaskHandle =
            scheduler.schedule_after(Duration::from_millis(20), counting_task(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(handle.has_started());
        assert!(!handle.cancel());
    }

    #[test]
    fn test_runtime_scheduler_cancel() {
        let executor = AsyncExecutor::with_defaults().unwrap();
        let scheduler = RuntimeScheduler::for_executor(&executor);
        let counter = Arc::new(AtomicUsize::new(0));

        let handle: TaskHandle =
            scheduler.schedule_after(Duration::from_millis(50), counting_task(&counter));
        assert!(handle.cancel());

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
