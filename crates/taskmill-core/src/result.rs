use crate::retry::is_retryable_anyhow;
use crate::TaskPayload;
use serde::Serialize;

/// Error text recorded when a handler panics
pub const HANDLER_PANIC: &str = "handler panic";

/// Outcome of one execution attempt.
///
/// `output` and `error` are mutually exclusive; `retryable` only means
/// something when `error` is set.
#[derive(Debug, Default)]
pub struct TaskResult {
    pub output: Option<TaskPayload>,
    pub error: Option<anyhow::Error>,
    pub retryable: bool,
}

impl TaskResult {
    pub fn success(output: TaskPayload) -> Self {
        TaskResult {
            output: Some(output),
            error: None,
            retryable: false,
        }
    }

    /// Successful result whose output is the JSON encoding of `value`
    pub fn success_json<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(output) => Self::success(output),
            Err(e) => Self::non_retryable(anyhow::Error::new(e).context("encoding task output")),
        }
    }

    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        TaskResult {
            output: None,
            error: Some(err.into()),
            retryable: true,
        }
    }

    pub fn non_retryable(err: impl Into<anyhow::Error>) -> Self {
        TaskResult {
            output: None,
            error: Some(err.into()),
            retryable: false,
        }
    }

    /// Failure whose retryability is decided by the classifier
    pub fn auto_retry(err: impl Into<anyhow::Error>) -> Self {
        let err = err.into();
        let retryable = is_retryable_anyhow(&err);
        TaskResult {
            output: None,
            error: Some(err),
            retryable,
        }
    }

    pub fn panicked() -> Self {
        Self::non_retryable(anyhow::anyhow!(HANDLER_PANIC))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Error text as sent to the scheduler, including the cause chain
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| format!("{:#}", e))
    }
}

impl<E: Into<anyhow::Error>> From<Result<TaskPayload, E>> for TaskResult {
    fn from(result: Result<TaskPayload, E>) -> Self {
        match result {
            Ok(output) => TaskResult::success(output),
            Err(e) => TaskResult::auto_retry(e),
        }
    }
}
