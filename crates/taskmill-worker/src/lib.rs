pub mod config;
pub mod context;
mod dispatcher;
pub mod handler;
pub mod reporter;
pub mod sandbox;
pub mod worker;

pub use config::{ReportConfig, WorkerConfig};
pub use context::{TaskContext, UNKNOWN_PROGRESS};
pub use dispatcher::NO_HANDLER;
pub use handler::{handler_fn, Handler, HandlerRegistry, SimpleHandler, TaskHandler};
pub use reporter::{BackoffPolicy, CompletionReporter};
pub use worker::Worker;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker is already running")]
    AlreadyRunning,

    #[error("Worker has been stopped")]
    Stopped,

    #[error("No task handlers registered")]
    NoHandlers,
}

pub type Result<T> = std::result::Result<T, WorkerError>;
