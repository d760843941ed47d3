use crate::callback::CallbackNotifier;
use crate::config::SchedulerConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use taskmill_core::{Status, Task, TaskId, TaskState, TaskType, UNLIMITED_RETRIES};
use taskmill_protocol::{
    CompleteTaskRequest, LongPollRequest, Result, SchedulerApi, RegisterTaskRequest,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Record {
    task: Task,
    aborted: bool,
    /// Set while a polled task waits for its accept
    dispatched_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Record>,
    queues: HashMap<TaskType, VecDeque<TaskId>>,
}

impl Inner {
    fn enqueue(&mut self, task_type: &str, task_id: TaskId) {
        self.queues
            .entry(task_type.to_string())
            .or_default()
            .push_back(task_id);
    }

    fn record(&mut self, task_id: &str) -> Result<&mut Record> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| Status::not_found(format!("task {} not found", task_id)).into())
    }
}

struct Shared {
    config: SchedulerConfig,
    inner: Mutex<Inner>,
    work_available: Notify,
    callbacks: Option<CallbackNotifier>,
}

/// In-memory scheduler.
///
/// Holds every task in a map plus one FIFO queue per task type. Nothing is
/// persisted. Queue entries are dropped lazily: a popped id whose task is
/// no longer pending is skipped.
#[derive(Clone)]
pub struct MemoryScheduler {
    shared: Arc<Shared>,
}

impl MemoryScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let callbacks = if config.callback.enabled {
            match CallbackNotifier::new(&config.callback) {
                Ok(notifier) => Some(notifier),
                Err(e) => {
                    warn!(error = %e, "Callback client unavailable, callbacks disabled");
                    None
                }
            }
        } else {
            None
        };

        MemoryScheduler {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(Inner::default()),
                work_available: Notify::new(),
                callbacks,
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Number of queued entries for a task type, including stale ones
    pub fn queue_depth(&self, task_type: &str) -> usize {
        self.shared
            .inner
            .lock()
            .queues
            .get(task_type)
            .map_or(0, VecDeque::len)
    }

    /// Periodically expire overdue tasks and requeue polled tasks nobody
    /// accepted.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = self.shared.config.sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => scheduler.sweep(),
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!("Sweeper stopped");
        })
    }

    /// One sweep pass
    pub fn sweep(&self) {
        let accept_timeout = self.shared.config.accept_timeout();
        let mut finished = Vec::new();
        let mut requeued = 0usize;

        {
            let mut inner = self.shared.inner.lock();
            let mut stale = Vec::new();

            for record in inner.tasks.values_mut() {
                if record.task.state.is_terminal() {
                    continue;
                }
                if record.task.is_expired() {
                    record.task.expire();
                    record.dispatched_at = None;
                    finished.push(record.task.clone());
                    continue;
                }
                if let Some(at) = record.dispatched_at {
                    if at.elapsed() >= accept_timeout {
                        record.dispatched_at = None;
                        stale.push((record.task.task_type.clone(), record.task.id.clone()));
                    }
                }
            }

            for (task_type, task_id) in stale {
                inner.enqueue(&task_type, task_id);
                requeued += 1;
            }
        }

        if requeued > 0 {
            info!(count = requeued, "Requeued tasks that were never accepted");
            self.shared.work_available.notify_waiters();
        }
        for task in finished {
            info!(task_id = %task.id, "Task expired");
            self.finished(task);
        }
    }

    fn pop(&self, task_type: &str) -> Option<Task> {
        let mut expired = Vec::new();
        let popped = {
            let mut inner = self.shared.inner.lock();
            let Inner { tasks, queues } = &mut *inner;
            let queue = queues.get_mut(task_type)?;

            let mut popped = None;
            while let Some(task_id) = queue.pop_front() {
                let Some(record) = tasks.get_mut(&task_id) else {
                    continue;
                };
                if record.task.state != TaskState::Pending || record.dispatched_at.is_some() {
                    continue;
                }
                if record.task.is_expired() {
                    record.task.expire();
                    expired.push(record.task.clone());
                    continue;
                }
                record.dispatched_at = Some(Instant::now());
                popped = Some(record.task.clone());
                break;
            }
            popped
        };

        for task in expired {
            info!(task_id = %task.id, "Task expired before dispatch");
            self.finished(task);
        }
        popped
    }

    /// Queue a failed attempt again once the retry delay has passed
    fn requeue_later(&self, task_type: TaskType, task_id: TaskId) {
        let scheduler = self.clone();
        let delay = self.shared.config.retry_delay();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = scheduler.shared.inner.lock();
                let Some(record) = inner.tasks.get(&task_id) else {
                    return;
                };
                if record.task.state != TaskState::Pending {
                    return;
                }
                inner.enqueue(&task_type, task_id);
            }
            scheduler.shared.work_available.notify_waiters();
        });
    }

    /// Hand a task that just reached a terminal state to the callback notifier
    fn finished(&self, task: Task) {
        let Some(notifier) = self.shared.callbacks.clone() else {
            return;
        };
        if !notifier.wants(&task) {
            return;
        }

        tokio::spawn(async move {
            notifier.deliver(&task).await;
        });
    }
}

#[async_trait]
impl SchedulerApi for MemoryScheduler {
    async fn register_task(&self, req: RegisterTaskRequest) -> Result<TaskId> {
        if req.max_retry_cnt < UNLIMITED_RETRIES {
            return Err(Status::invalid_argument(format!(
                "max_retry_cnt must be >= -1, got {}",
                req.max_retry_cnt
            ))
            .into());
        }

        let task = Task::builder(req.task_type, req.input_args)
            .namespace(req.namespace)
            .callback_url(req.callback_url)
            .max_retry_cnt(req.max_retry_cnt)
            .expire_time(req.expire_time)
            .trace_id(req.trace_id)
            .build()
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let task_id = task.id.clone();
        info!(task_id = %task_id, task_type = %task.task_type, "Registered task");

        {
            let mut inner = self.shared.inner.lock();
            inner.enqueue(&task.task_type, task_id.clone());
            inner.tasks.insert(
                task_id.clone(),
                Record {
                    task,
                    aborted: false,
                    dispatched_at: None,
                },
            );
        }
        self.shared.work_available.notify_waiters();

        Ok(task_id)
    }

    async fn get_task(&self, task_id: &str) -> Result<Task> {
        let mut inner = self.shared.inner.lock();
        Ok(inner.record(task_id)?.task.clone())
    }

    async fn abort_task(&self, task_id: &str) -> Result<()> {
        let task = {
            let mut inner = self.shared.inner.lock();
            let record = inner.record(task_id)?;
            if record.task.state.is_terminal() {
                return Err(Status::failed_precondition(format!(
                    "task {} is already {}",
                    task_id, record.task.state
                ))
                .into());
            }

            record.aborted = true;
            record.dispatched_at = None;
            record.task.fail("aborted");
            record.task.clone()
        };

        info!(task_id = %task_id, "Task aborted");
        self.finished(task);
        Ok(())
    }

    async fn long_poll(&self, req: LongPollRequest) -> Result<Option<Task>> {
        let task_type = req.worker.ability.task_type;
        let deadline = Instant::now() + self.shared.config.long_poll_timeout();

        loop {
            let notified = self.shared.work_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.pop(&task_type) {
                debug!(task_id = %task.id, worker_id = %req.worker.id, "Dispatched task");
                return Ok(Some(task));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn accept_task(&self, task_id: &str) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        let record = inner.record(task_id)?;

        if record.dispatched_at.is_none() || record.task.state != TaskState::Pending {
            return Err(Status::failed_precondition(format!(
                "task {} cannot be accepted while {}",
                task_id, record.task.state
            ))
            .into());
        }

        record.dispatched_at = None;
        record
            .task
            .start()
            .map_err(|e| Status::failed_precondition(e.to_string()))?;

        debug!(task_id = %task_id, attempt = record.task.attempts, "Task accepted");
        Ok(())
    }

    async fn complete_task(&self, req: CompleteTaskRequest) -> Result<()> {
        let mut retry = None;
        let finished = {
            let mut inner = self.shared.inner.lock();
            let record = inner.record(&req.task_id)?;
            let task = &mut record.task;

            if task.state.is_terminal() {
                debug!(task_id = %req.task_id, state = %task.state, "Ignoring completion of finished task");
                return Ok(());
            }
            if task.state != TaskState::Running {
                return Err(Status::failed_precondition(format!(
                    "task {} is {}, not running",
                    req.task_id, task.state
                ))
                .into());
            }

            if req.success {
                task.succeed(req.output_args)
                    .map_err(|e| Status::invalid_argument(e.to_string()))?;
                info!(task_id = %task.id, attempt = task.attempts, "Task succeeded");
            } else {
                let error = req.error_msg.unwrap_or_else(|| "unknown error".to_string());
                if task.is_expired() {
                    task.error_msg = Some(error);
                    task.expire();
                    info!(task_id = %task.id, "Task expired");
                } else if req.retryable && task.can_retry() {
                    task.requeue(error);
                    retry = Some((task.task_type.clone(), task.id.clone()));
                    info!(task_id = %task.id, attempt = task.attempts, "Task failed, scheduled for retry");
                } else {
                    task.fail(error);
                    info!(task_id = %task.id, attempt = task.attempts, "Task failed");
                }
            }

            task.state.is_terminal().then(|| task.clone())
        };

        if let Some((task_type, task_id)) = retry {
            self.requeue_later(task_type, task_id);
        }
        if let Some(task) = finished {
            self.finished(task);
        }
        Ok(())
    }

    async fn report_progress(&self, task_id: &str, progress: i32) -> Result<bool> {
        let expired = {
            let mut inner = self.shared.inner.lock();
            let record = inner.record(task_id)?;
            if progress >= 0 {
                record.task.progress = progress.min(100);
            }

            if record.aborted {
                return Ok(true);
            }
            if !record.task.state.is_terminal() && record.task.is_expired() {
                record.task.expire();
                Some(record.task.clone())
            } else {
                return Ok(record.task.state == TaskState::Expired);
            }
        };

        if let Some(task) = expired {
            info!(task_id = %task.id, "Running task expired");
            self.finished(task);
        }
        Ok(true)
    }
}
