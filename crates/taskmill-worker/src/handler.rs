use crate::context::TaskContext;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use taskmill_core::{Task, TaskResult};
use tokio_util::sync::CancellationToken;

/// Handler with access to the full task context (abort signal, progress)
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, ctx: Arc<TaskContext>) -> TaskResult;
}

/// Plain handler that only needs the execution scope and the task
#[async_trait]
pub trait SimpleHandler: Send + Sync {
    async fn execute(&self, scope: CancellationToken, task: &Task) -> TaskResult;
}

/// A registered handler of either kind
#[derive(Clone)]
pub enum Handler {
    Context(Arc<dyn TaskHandler>),
    Simple(Arc<dyn SimpleHandler>),
}

impl Handler {
    pub async fn invoke(&self, ctx: Arc<TaskContext>) -> TaskResult {
        match self {
            Handler::Context(handler) => handler.execute(ctx).await,
            Handler::Simple(handler) => {
                let scope = ctx.scope().clone();
                handler.execute(scope, ctx.task()).await
            }
        }
    }
}

/// Adapts an async closure into a [`TaskHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Arc<TaskContext>) -> Fut + Send + Sync,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    async fn execute(&self, ctx: Arc<TaskContext>) -> TaskResult {
        (self.0)(ctx).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Arc<TaskContext>) -> Fut + Send + Sync,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    FnHandler(f)
}

/// Registry of task handlers by task type.
///
/// Reads happen on every dispatched task, so registration after the worker
/// has started is safe.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, task_type: impl Into<String>, handler: Handler) {
        self.handlers.write().insert(task_type.into(), handler);
    }

    pub fn get(&self, task_type: &str) -> Option<Handler> {
        self.handlers.read().get(task_type).cloned()
    }

    pub fn has_handler(&self, task_type: &str) -> bool {
        self.handlers.read().contains_key(task_type)
    }

    /// Registered task types, sorted
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns its input unchanged
pub struct EchoHandler;

#[async_trait]
impl SimpleHandler for EchoHandler {
    async fn execute(&self, _scope: CancellationToken, task: &Task) -> TaskResult {
        TaskResult::success(task.input_args.clone())
    }
}
