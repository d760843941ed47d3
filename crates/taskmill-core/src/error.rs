use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Payload size exceeds maximum allowed size of {max} bytes (got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task in invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;
