mod client;
mod options;

pub use client::Client;
pub use options::{ScheduleOptions, DEFAULT_EXPIRY};

use taskmill_core::{Code, TaskState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to encode task input: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] taskmill_protocol::ProtocolError),

    #[error("Failed to decode task output: {0}")]
    Decode(#[from] taskmill_core::TaskError),

    #[error("Task ended in state {state}: {error}")]
    TaskFailed { state: TaskState, error: String },

    #[error("Timeout")]
    Timeout,
}

impl ClientError {
    /// The scheduler reported that the task does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClientError::Scheduler(e) if e.status().map(|s| s.code) == Some(Code::NotFound)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
