//! Per-task execution context: cancellable scope, abort detection and the
//! heartbeat that carries progress to the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use taskmill_core::Task;
use taskmill_protocol::SchedulerApi;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture, WaitForCancellationFutureOwned};
use tracing::{debug, info, warn};

/// Progress value meaning "nothing specific to report"
pub const UNKNOWN_PROGRESS: i32 = -1;

/// Pull-based progress source polled on every heartbeat tick
pub type ProgressProvider = Arc<dyn Fn() -> i32 + Send + Sync>;

pub struct TaskContext {
    task: Task,
    /// Cancelled only on abort, or on worker stop when task scopes are
    /// derived from the worker's root
    scope: CancellationToken,
    /// Child of `scope`; also cancelled by `finish`
    heartbeat_scope: CancellationToken,
    aborted: AtomicBool,
    abort_signal: CancellationToken,
    heartbeat_started: AtomicBool,
    heartbeat_interval: Duration,
    progress_provider: RwLock<Option<ProgressProvider>>,
    scheduler: Arc<dyn SchedulerApi>,
}

impl TaskContext {
    pub fn new(
        task: Task,
        scope: CancellationToken,
        heartbeat_interval: Duration,
        scheduler: Arc<dyn SchedulerApi>,
    ) -> Arc<Self> {
        let heartbeat_scope = scope.child_token();
        Arc::new(TaskContext {
            task,
            scope,
            heartbeat_scope,
            aborted: AtomicBool::new(false),
            abort_signal: CancellationToken::new(),
            heartbeat_started: AtomicBool::new(false),
            heartbeat_interval,
            progress_provider: RwLock::new(None),
            scheduler,
        })
    }

    /// Execution scope; handlers should select on `scope().cancelled()`
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Resolves once the task has been aborted
    pub fn abort_signal(&self) -> WaitForCancellationFuture<'_> {
        self.abort_signal.cancelled()
    }

    /// Owned variant of [`abort_signal`](Self::abort_signal) for moving into
    /// spawned work
    pub fn abort_signal_owned(&self) -> WaitForCancellationFutureOwned {
        self.abort_signal.clone().cancelled_owned()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Report progress (0-100) and learn whether the task was aborted.
    ///
    /// Returns true if the task is now known to be aborted; the context is
    /// marked aborted as a side effect. A failed report is logged and does
    /// not count as an abort.
    pub async fn report_progress(&self, progress: i32) -> bool {
        if self.is_aborted() {
            return true;
        }

        let progress = progress.clamp(UNKNOWN_PROGRESS, 100);
        match self.scheduler.report_progress(&self.task.id, progress).await {
            Ok(true) => {
                self.mark_aborted();
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(task_id = %self.task.id, error = %e, "Progress report failed");
                false
            }
        }
    }

    /// Install a progress source for the heartbeat; return
    /// [`UNKNOWN_PROGRESS`] when there is nothing to report
    pub fn set_progress_provider<F>(&self, provider: F)
    where
        F: Fn() -> i32 + Send + Sync + 'static,
    {
        *self.progress_provider.write() = Some(Arc::new(provider));
    }

    fn current_progress(&self) -> i32 {
        let provider = self.progress_provider.read().clone();
        provider.map_or(UNKNOWN_PROGRESS, |p| p())
    }

    /// One-way transition to aborted. Only the caller that wins the
    /// compare-and-set cancels the scope and fires the abort signal.
    fn mark_aborted(&self) -> bool {
        if self
            .aborted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        info!(task_id = %self.task.id, task_type = %self.task.task_type, "Task aborted by scheduler");
        // `is_aborted` may read true a moment before the scope and signal fire
        self.scope.cancel();
        self.abort_signal.cancel();
        true
    }

    /// Start the heartbeat loop. Only the first call spawns; later calls
    /// return `None`.
    pub fn start_heartbeat(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.heartbeat_started.swap(true, Ordering::AcqRel) {
            return None;
        }

        let ctx = Arc::clone(self);
        Some(tokio::spawn(async move { ctx.heartbeat_loop().await }))
    }

    async fn heartbeat_loop(&self) {
        let period = self.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.heartbeat_scope.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.is_aborted() {
                break;
            }

            let progress = self.current_progress();
            debug!(task_id = %self.task.id, progress, "Heartbeat");

            let aborted = tokio::select! {
                biased;
                _ = self.heartbeat_scope.cancelled() => break,
                aborted = self.report_progress(progress) => aborted,
            };
            if aborted {
                break;
            }
        }

        debug!(task_id = %self.task.id, "Heartbeat stopped");
    }

    /// Stop the heartbeat once the attempt is over. The execution scope is
    /// left alone.
    pub fn finish(&self) {
        self.heartbeat_scope.cancel();
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task.id)
            .field("task_type", &self.task.task_type)
            .field("aborted", &self.is_aborted())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}
