use crate::{ClientError, Result, ScheduleOptions};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use taskmill_core::{Task, TaskId, TaskState};
use taskmill_protocol::{RegisterTaskRequest, SchedulerApi, TcpScheduler};
use tracing::{debug, info};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Producer side of the task queue: submit, inspect and abort tasks
#[derive(Clone)]
pub struct Client {
    scheduler: Arc<dyn SchedulerApi>,
    default_namespace: String,
}

impl Client {
    pub fn new(scheduler: Arc<dyn SchedulerApi>, default_namespace: impl Into<String>) -> Self {
        Client {
            scheduler,
            default_namespace: default_namespace.into(),
        }
    }

    /// Client for a scheduler reached over TCP. No connection is made until
    /// the first call.
    pub fn connect(address: impl Into<String>, default_namespace: impl Into<String>) -> Self {
        Self::new(Arc::new(TcpScheduler::new(address)), default_namespace)
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    /// Submit a task. `input` is JSON-encoded; `None` submits an empty
    /// payload. Returns the scheduler-assigned id.
    pub async fn schedule<T: Serialize + ?Sized>(
        &self,
        task_type: impl Into<String>,
        input: Option<&T>,
        options: ScheduleOptions,
    ) -> Result<TaskId> {
        let input_args = match input {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };

        let req = RegisterTaskRequest {
            task_type: task_type.into(),
            namespace: options
                .namespace
                .clone()
                .unwrap_or_else(|| self.default_namespace.clone()),
            input_args,
            callback_url: options.callback_url.clone(),
            max_retry_cnt: options.max_retry,
            expire_time: options.resolve_expiry(Utc::now()),
            trace_id: options.trace_id.clone(),
        };
        let task_type = req.task_type.clone();

        let task_id = self.scheduler.register_task(req).await?;
        info!(task_id = %task_id, task_type = %task_type, "Scheduled task");
        Ok(task_id)
    }

    /// Point lookup; carries output and state once terminal
    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        Ok(self.scheduler.get_task(task_id).await?)
    }

    /// Ask the scheduler to cancel a queued or running task. A running worker
    /// notices on its next heartbeat.
    pub async fn abort_task(&self, task_id: &str) -> Result<()> {
        self.scheduler.abort_task(task_id).await?;
        info!(task_id, "Requested abort");
        Ok(())
    }

    /// Poll until the task is terminal or `timeout` passes
    pub async fn wait_for_result(&self, task_id: &str, timeout: Duration) -> Result<Task> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let task = self.get_task(task_id).await?;
            if task.state.is_terminal() {
                return Ok(task);
            }
            debug!(task_id, state = %task.state, "Task not finished yet");

            if tokio::time::Instant::now() + WAIT_POLL_INTERVAL > deadline {
                return Err(ClientError::Timeout);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Wait for the task and decode its output, failing unless it succeeded
    pub async fn wait_for_output<T: serde::de::DeserializeOwned>(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<Option<T>> {
        let task = self.wait_for_result(task_id, timeout).await?;
        match task.state {
            TaskState::Success => Ok(task.output_as()?),
            state => Err(ClientError::TaskFailed {
                state,
                error: task.error_msg.unwrap_or_default(),
            }),
        }
    }
}
