use crate::config::WorkerConfig;
use crate::context::TaskContext;
use crate::handler::HandlerRegistry;
use crate::reporter::CompletionReporter;
use crate::sandbox::{self, panic_message, Execution};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use taskmill_core::Task;
use taskmill_protocol::{
    LongPollRequest, SchedulerApi, WorkerAbility, WorkerInfo, WorkerMetadata, WorkerState,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error text reported for a task type with no registered handler
pub const NO_HANDLER: &str = "no handler";

/// State shared by the worker, its dispatchers and their executions
pub(crate) struct Shared {
    pub worker_id: String,
    pub config: WorkerConfig,
    pub registry: HandlerRegistry,
    pub scheduler: Arc<dyn SchedulerApi>,
    pub reporter: CompletionReporter,
    /// Cancelled by `Worker::stop`; interrupts polls and slot waits
    pub root: CancellationToken,
}

/// Poll loop for one task type
pub(crate) struct Dispatcher {
    task_type: String,
    slots: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    shared: Arc<Shared>,
}

/// Decrements the active count when an execution ends, even by panic
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Dispatcher {
    pub fn new(task_type: String, active: Arc<AtomicUsize>, shared: Arc<Shared>) -> Self {
        let slots = Arc::new(Semaphore::new(shared.config.concurrency_for(&task_type)));
        Dispatcher {
            task_type,
            slots,
            active,
            shared,
        }
    }

    fn poll_request(&self) -> LongPollRequest {
        LongPollRequest {
            worker: WorkerInfo {
                id: self.shared.worker_id.clone(),
                ability: WorkerAbility {
                    task_type: self.task_type.clone(),
                },
                metadata: WorkerMetadata {
                    ip: self.shared.config.ip.clone(),
                },
                state: WorkerState::Running,
            },
        }
    }

    pub async fn run(self) {
        let root = self.shared.root.clone();
        info!(
            task_type = %self.task_type,
            concurrency = self.slots.available_permits(),
            "Dispatcher started"
        );

        loop {
            if root.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = root.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let polled = tokio::select! {
                biased;
                _ = root.cancelled() => break,
                polled = self.shared.scheduler.long_poll(self.poll_request()) => polled,
            };

            match polled {
                Ok(Some(task)) => self.spawn_execution(task, permit),
                Ok(None) => {}
                Err(e) if e.is_timeout() => {
                    debug!(task_type = %self.task_type, "Long-poll timed out");
                }
                Err(e) => {
                    drop(permit);
                    warn!(task_type = %self.task_type, error = %e, "Long-poll failed");
                    tokio::select! {
                        _ = root.cancelled() => break,
                        _ = tokio::time::sleep(self.shared.config.poll_error_delay()) => {}
                    }
                }
            }
        }

        info!(task_type = %self.task_type, "Dispatcher stopped");
    }

    /// Run one task in its own unit of execution. The slot is held until the
    /// report has been delivered; a panic that escapes is logged here.
    fn spawn_execution(&self, task: Task, permit: OwnedSemaphorePermit) {
        let shared = self.shared.clone();
        self.active.fetch_add(1, Ordering::AcqRel);
        let guard = ActiveGuard(self.active.clone());

        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            let task_id = task.id.clone();

            if let Err(e) = tokio::spawn(run_task(shared, task)).await {
                if e.is_panic() {
                    let payload = e.into_panic();
                    error!(task_id = %task_id, panic = %panic_message(payload.as_ref()), "Task execution panicked");
                } else {
                    warn!(task_id = %task_id, "Task execution cancelled");
                }
            }
        });
    }
}

async fn run_task(shared: Arc<Shared>, task: Task) {
    let task_id = task.id.clone();
    let task_type = task.task_type.clone();

    if let Err(e) = shared.scheduler.accept_task(&task_id).await {
        warn!(task_id = %task_id, error = %e, "Accept failed, abandoning task");
        return;
    }

    let Some(handler) = shared.registry.get(&task_type) else {
        error!(task_id = %task_id, task_type = %task_type, "No handler registered for task type");
        shared
            .reporter
            .report(&task_id, None, false, Some(NO_HANDLER.to_string()), false)
            .await;
        return;
    };

    let scope = if shared.config.cancel_tasks_on_stop {
        shared.root.child_token()
    } else {
        CancellationToken::new()
    };
    let ctx = TaskContext::new(
        task,
        scope,
        shared.config.heartbeat_interval(),
        shared.scheduler.clone(),
    );
    let heartbeat = ctx.start_heartbeat();

    info!(task_id = %task_id, task_type = %task_type, "Executing task");
    let started = Instant::now();
    let Execution { result, panic } = sandbox::execute(&handler, ctx.clone()).await;

    if let Some(message) = panic {
        error!(task_id = %task_id, task_type = %task_type, panic = %message, "Handler panicked");
    }
    match result.error_message() {
        None => info!(
            task_id = %task_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Task completed"
        ),
        Some(ref message) => warn!(
            task_id = %task_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            retryable = result.retryable,
            aborted = ctx.is_aborted(),
            error = %message,
            "Task failed"
        ),
    }

    let success = result.is_success();
    let error_msg = result.error_message();
    shared
        .reporter
        .report(&task_id, result.output, success, error_msg, result.retryable)
        .await;

    ctx.finish();
    if let Some(heartbeat) = heartbeat {
        if let Err(e) = heartbeat.await {
            warn!(task_id = %task_id, error = %e, "Heartbeat ended abnormally");
        }
    }
}
