mod api;
mod codec;
mod message;
mod tcp;

pub use api::SchedulerApi;
pub use codec::MessageCodec;
pub use message::{
    CompleteTaskRequest, LongPollRequest, Message, MessageType, PollResponse, ProgressResponse,
    RegisterTaskRequest, RegisteredResponse, ReportProgressRequest, TaskIdRequest, TaskResponse,
    WorkerAbility, WorkerInfo, WorkerMetadata, WorkerState,
};
pub use tcp::TcpScheduler;

use taskmill_core::{Code, Status};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] Status),

    #[error("Request timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(&'static str),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ProtocolError {
    /// Remote status carried by this error, if any
    pub fn status(&self) -> Option<&Status> {
        match self {
            ProtocolError::Remote(status) => Some(status),
            _ => None,
        }
    }

    /// A bounded wait ran out, locally or on the scheduler
    pub fn is_timeout(&self) -> bool {
        match self {
            ProtocolError::Timeout(_) => true,
            ProtocolError::Remote(status) => status.code == Code::DeadlineExceeded,
            _ => false,
        }
    }

    /// Map to the status a server sends back for this error
    pub fn to_status(&self) -> Status {
        match self {
            ProtocolError::Remote(status) => status.clone(),
            ProtocolError::Timeout(_) => Status::deadline_exceeded(self.to_string()),
            ProtocolError::IoError(_) => Status::unavailable(self.to_string()),
            _ => Status::internal(self.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum message size: 11MB (to accommodate 10MB task payload + overhead)
pub const MAX_MESSAGE_SIZE: usize = 11 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use taskmill_core::is_retryable;

    #[test]
    fn test_timeout_detection() {
        assert!(ProtocolError::Remote(Status::deadline_exceeded("poll")).is_timeout());
        assert!(!ProtocolError::Remote(Status::unavailable("down")).is_timeout());
        assert!(!ProtocolError::UnexpectedResponse("Ack").is_timeout());
    }

    #[test]
    fn test_errors_classify_through_source_chain() {
        let refused = ProtocolError::from(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        ));
        assert!(is_retryable(Some(&refused)));

        let missing = ProtocolError::from(Status::not_found("task t-9"));
        assert!(!is_retryable(Some(&missing)));
        assert_eq!(missing.to_status().code, Code::NotFound);

        let garbled = ProtocolError::InvalidMessageType(77);
        assert!(!is_retryable(Some(&garbled)));
    }
}
