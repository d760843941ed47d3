use crate::{
    CompleteTaskRequest, LongPollRequest, Message, MessageCodec, PollResponse, ProgressResponse,
    ProtocolError, RegisterTaskRequest, RegisteredResponse, ReportProgressRequest, Result,
    SchedulerApi, TaskIdRequest, TaskResponse,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use taskmill_core::{Task, TaskId};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::trace;

/// Extra time allowed past the scheduler's own long-poll window
const LONG_POLL_GRACE: Duration = Duration::from_secs(5);

/// Scheduler reached over TCP, one connection per call
#[derive(Debug, Clone)]
pub struct TcpScheduler {
    address: String,
    request_timeout: Duration,
    long_poll_timeout: Duration,
}

impl TcpScheduler {
    pub fn new(address: impl Into<String>) -> Self {
        TcpScheduler {
            address: address.into(),
            request_timeout: Duration::from_secs(10),
            long_poll_timeout: Duration::from_secs(30),
        }
    }

    /// Bound for ordinary request/response calls
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The scheduler's long-poll window. The client waits this long plus a
    /// small grace period before giving up on a poll.
    pub fn with_long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn call(&self, message: Message, limit: Duration) -> Result<Message> {
        tokio::time::timeout(limit, self.round_trip(message)).await?
    }

    async fn round_trip(&self, message: Message) -> Result<Message> {
        let stream = TcpStream::connect(&self.address).await?;
        let mut framed = Framed::new(stream, MessageCodec);

        trace!(request = message.name(), address = %self.address, "Sending request");
        framed.send(message).await?;

        match framed.next().await {
            Some(Ok(Message::Error(status))) => Err(status.into()),
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(e),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by scheduler",
            )
            .into()),
        }
    }

    async fn expect_ack(&self, message: Message) -> Result<()> {
        match self.call(message, self.request_timeout).await? {
            Message::Ack => Ok(()),
            other => Err(ProtocolError::UnexpectedResponse(other.name())),
        }
    }
}

#[async_trait]
impl SchedulerApi for TcpScheduler {
    async fn register_task(&self, req: RegisterTaskRequest) -> Result<TaskId> {
        match self
            .call(Message::RegisterTask(req), self.request_timeout)
            .await?
        {
            Message::Registered(RegisteredResponse { task_id }) => Ok(task_id),
            other => Err(ProtocolError::UnexpectedResponse(other.name())),
        }
    }

    async fn get_task(&self, task_id: &str) -> Result<Task> {
        let req = TaskIdRequest {
            task_id: task_id.to_string(),
        };
        match self.call(Message::GetTask(req), self.request_timeout).await? {
            Message::TaskFound(TaskResponse { task }) => Ok(task),
            other => Err(ProtocolError::UnexpectedResponse(other.name())),
        }
    }

    async fn abort_task(&self, task_id: &str) -> Result<()> {
        self.expect_ack(Message::AbortTask(TaskIdRequest {
            task_id: task_id.to_string(),
        }))
        .await
    }

    async fn long_poll(&self, req: LongPollRequest) -> Result<Option<Task>> {
        let limit = self.long_poll_timeout + LONG_POLL_GRACE;
        match self.call(Message::LongPoll(req), limit).await? {
            Message::Polled(PollResponse { task }) => Ok(task),
            other => Err(ProtocolError::UnexpectedResponse(other.name())),
        }
    }

    async fn accept_task(&self, task_id: &str) -> Result<()> {
        self.expect_ack(Message::AcceptTask(TaskIdRequest {
            task_id: task_id.to_string(),
        }))
        .await
    }

    async fn complete_task(&self, req: CompleteTaskRequest) -> Result<()> {
        self.expect_ack(Message::CompleteTask(req)).await
    }

    async fn report_progress(&self, task_id: &str, progress: i32) -> Result<bool> {
        let req = ReportProgressRequest {
            task_id: task_id.to_string(),
            progress,
        };
        match self
            .call(Message::ReportProgress(req), self.request_timeout)
            .await?
        {
            Message::Progress(ProgressResponse { aborted }) => Ok(aborted),
            other => Err(ProtocolError::UnexpectedResponse(other.name())),
        }
    }
}
