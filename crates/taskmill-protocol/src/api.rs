use crate::{CompleteTaskRequest, LongPollRequest, RegisterTaskRequest, Result};
use async_trait::async_trait;
use taskmill_core::{Task, TaskId};

/// Remote procedures a scheduler exposes to producers and workers.
///
/// Implemented over TCP by [`crate::TcpScheduler`]; in-process
/// implementations are useful for tests.
#[async_trait]
pub trait SchedulerApi: Send + Sync {
    /// Submit a task, returning the scheduler-assigned id
    async fn register_task(&self, req: RegisterTaskRequest) -> Result<TaskId>;

    async fn get_task(&self, task_id: &str) -> Result<Task>;

    /// Best-effort cancellation of a queued or running task
    async fn abort_task(&self, task_id: &str) -> Result<()>;

    /// Wait for a task of the worker's type. `Ok(None)` means the
    /// scheduler's poll window closed without work.
    async fn long_poll(&self, req: LongPollRequest) -> Result<Option<Task>>;

    /// Claim a polled task. A failed accept means the task must not run here.
    async fn accept_task(&self, task_id: &str) -> Result<()>;

    async fn complete_task(&self, req: CompleteTaskRequest) -> Result<()>;

    /// Heartbeat carrying progress (-1 = unknown). Returns whether the task
    /// has been aborted.
    async fn report_progress(&self, task_id: &str, progress: i32) -> Result<bool>;
}
