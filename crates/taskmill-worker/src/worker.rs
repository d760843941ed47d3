use crate::config::WorkerConfig;
use crate::context::TaskContext;
use crate::dispatcher::{Dispatcher, Shared};
use crate::handler::{handler_fn, Handler, HandlerRegistry, SimpleHandler, TaskHandler};
use crate::reporter::{BackoffPolicy, CompletionReporter};
use crate::{Result, WorkerError};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use taskmill_core::TaskResult;
use taskmill_protocol::SchedulerApi;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
}

/// Pulls tasks from the scheduler and runs them with registered handlers.
///
/// Register handlers, call [`start`](Worker::start), and later
/// [`stop`](Worker::stop). One dispatcher runs per task type registered at
/// start time.
pub struct Worker {
    shared: Arc<Shared>,
    state: Mutex<RunState>,
    /// Every `stop` caller waits on this until all dispatchers have exited
    dispatchers: TaskTracker,
    active: Mutex<HashMap<String, Arc<AtomicUsize>>>,
}

impl Worker {
    pub fn new(config: WorkerConfig, scheduler: Arc<dyn SchedulerApi>) -> Self {
        let worker_id = config.generate_worker_id();
        let reporter = CompletionReporter::new(scheduler.clone(), BackoffPolicy::from(&config.report));

        Worker {
            shared: Arc::new(Shared {
                worker_id,
                config,
                registry: HandlerRegistry::new(),
                scheduler,
                reporter,
                root: CancellationToken::new(),
            }),
            state: Mutex::new(RunState::Idle),
            dispatchers: TaskTracker::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.shared.worker_id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    /// Register a handler that receives the full task context
    pub fn register<H: TaskHandler + 'static>(&self, task_type: impl Into<String>, handler: H) {
        self.insert(task_type.into(), Handler::Context(Arc::new(handler)));
    }

    /// Register a handler that only needs the scope and the task
    pub fn register_simple<H: SimpleHandler + 'static>(&self, task_type: impl Into<String>, handler: H) {
        self.insert(task_type.into(), Handler::Simple(Arc::new(handler)));
    }

    /// Register an async closure as a context-aware handler
    pub fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Arc<TaskContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.register(task_type, handler_fn(f));
    }

    fn insert(&self, task_type: String, handler: Handler) {
        if *self.state.lock() == RunState::Running && !self.active.lock().contains_key(&task_type) {
            warn!(task_type = %task_type, "Handler registered after start; this type will not be polled");
        }
        self.shared.registry.insert(task_type, handler);
    }

    pub fn task_types(&self) -> Vec<String> {
        self.shared.registry.task_types()
    }

    /// Executions of `task_type` currently in progress
    pub fn active_tasks(&self, task_type: &str) -> usize {
        self.active
            .lock()
            .get(task_type)
            .map_or(0, |count| count.load(Ordering::Acquire))
    }

    /// Start one dispatcher per registered task type. Returns immediately.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            RunState::Running => return Err(WorkerError::AlreadyRunning),
            RunState::Stopped => return Err(WorkerError::Stopped),
            RunState::Idle => {}
        }

        let task_types = self.shared.registry.task_types();
        if task_types.is_empty() {
            return Err(WorkerError::NoHandlers);
        }

        info!(
            worker_id = %self.shared.worker_id,
            task_types = ?task_types,
            "Starting worker"
        );

        let mut active = self.active.lock();
        for task_type in task_types {
            let count = Arc::new(AtomicUsize::new(0));
            active.insert(task_type.clone(), count.clone());

            let dispatcher = Dispatcher::new(task_type, count, self.shared.clone());
            self.dispatchers.spawn(dispatcher.run());
        }

        *state = RunState::Running;
        Ok(())
    }

    /// Signal shutdown, interrupt in-flight long-polls, and wait for every
    /// dispatcher to exit. Running tasks finish on their own unless task
    /// scopes follow the worker's root. Concurrent callers all wait.
    pub async fn stop(&self) {
        let first = {
            let mut state = self.state.lock();
            let first = *state != RunState::Stopped;
            *state = RunState::Stopped;
            first
        };

        if first {
            info!(worker_id = %self.shared.worker_id, "Stopping worker");
            self.shared.root.cancel();
            self.dispatchers.close();
        }
        self.dispatchers.wait().await;

        if first {
            info!(worker_id = %self.shared.worker_id, "Worker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == RunState::Running
    }
}
