mod callback;
mod error;
mod result;
pub mod retry;
mod status;
mod task;

pub use callback::CallbackPayload;
pub use error::{Result, TaskError};
pub use result::{TaskResult, HANDLER_PANIC};
pub use retry::is_retryable;
pub use status::{Cancelled, Code, Status};
pub use task::{Task, TaskBuilder, TaskId, TaskPayload, TaskState, TaskType, UNLIMITED_RETRIES};

pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB
