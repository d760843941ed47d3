use crate::context::TaskContext;
use crate::handler::Handler;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use taskmill_core::TaskResult;

/// Result of running a handler inside the sandbox
#[derive(Debug)]
pub struct Execution {
    pub result: TaskResult,
    /// Panic message, when the handler panicked
    pub panic: Option<String>,
}

/// Invoke `handler` for the context's task, turning a panic into a
/// non-retryable "handler panic" failure. Never unwinds into the caller.
pub async fn execute(handler: &Handler, ctx: Arc<TaskContext>) -> Execution {
    match AssertUnwindSafe(handler.invoke(ctx)).catch_unwind().await {
        Ok(result) => Execution {
            result,
            panic: None,
        },
        Err(payload) => Execution {
            result: TaskResult::panicked(),
            panic: Some(panic_message(payload.as_ref())),
        },
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
