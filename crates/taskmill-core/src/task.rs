use crate::{Result, TaskError, MAX_PAYLOAD_SIZE};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scheduler-assigned task identifier
pub type TaskId = String;

/// Task type name, used to route a task to a handler
pub type TaskType = String;

/// Opaque payload bytes (JSON by convention)
pub type TaskPayload = Vec<u8>;

/// Retry budget meaning "retry until the task expires"
pub const UNLIMITED_RETRIES: i32 = -1;

/// Externally visible task state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting for a worker to accept it
    Pending,
    /// Accepted by a worker
    Running,
    /// Handler returned without error
    Success,
    /// Retries exhausted, or aborted
    Failure,
    /// Deadline passed without a successful completion
    Expired,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Failure => "failure",
            TaskState::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "running" => Some(TaskState::Running),
            "success" => Some(TaskState::Success),
            "failure" => Some(TaskState::Failure),
            "expired" => Some(TaskState::Expired),
            _ => None,
        }
    }

    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Expired
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work as known to the scheduler.
///
/// Workers treat a `Task` as read-only; only the scheduler moves it through
/// its states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub namespace: String,
    pub task_type: TaskType,
    pub input_args: TaskPayload,
    pub callback_url: Option<String>,

    /// -1 = unlimited, 0 = none, >0 = bounded
    pub max_retry_cnt: i32,

    /// Absolute deadline
    pub expire_time: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub trace_id: Option<String>,

    pub state: TaskState,

    /// Handler output, set once the task succeeds
    pub output_args: Option<TaskPayload>,
    pub error_msg: Option<String>,

    /// Number of accepted executions so far
    pub attempts: u32,

    /// Last progress reported by a heartbeat (-1 = unknown)
    pub progress: i32,

    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn builder(task_type: impl Into<TaskType>, input_args: TaskPayload) -> TaskBuilder {
        TaskBuilder::new(task_type.into(), input_args)
    }

    pub fn is_expired(&self) -> bool {
        self.expire_time <= Utc::now()
    }

    /// Whether another execution is allowed after `attempts` failed ones
    pub fn can_retry(&self) -> bool {
        self.max_retry_cnt == UNLIMITED_RETRIES
            || (self.max_retry_cnt >= 0 && self.attempts <= self.max_retry_cnt as u32)
    }

    /// Decode the handler output
    pub fn output_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.output_args {
            Some(bytes) if !bytes.is_empty() => Ok(Some(serde_json::from_slice(bytes)?)),
            _ => Ok(None),
        }
    }

    /// Decode the submitted input
    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.input_args)?)
    }

    /// Mark the task as accepted by a worker
    pub fn start(&mut self) -> Result<()> {
        if self.state != TaskState::Pending {
            return Err(TaskError::InvalidState {
                expected: TaskState::Pending.to_string(),
                actual: self.state.to_string(),
            });
        }

        self.state = TaskState::Running;
        self.attempts += 1;
        Ok(())
    }

    /// Mark the task as completed successfully
    pub fn succeed(&mut self, output: TaskPayload) -> Result<()> {
        if output.len() > MAX_PAYLOAD_SIZE {
            return Err(TaskError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: output.len(),
            });
        }

        self.state = TaskState::Success;
        self.output_args = Some(output);
        self.error_msg = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as permanently failed
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = TaskState::Failure;
        self.error_msg = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn expire(&mut self) {
        self.state = TaskState::Expired;
        self.completed_at = Some(Utc::now());
    }

    /// Put a failed attempt back in line
    pub fn requeue(&mut self, error: impl Into<String>) {
        self.state = TaskState::Pending;
        self.error_msg = Some(error.into());
    }
}

/// Builder for tasks created by a scheduler on submission
pub struct TaskBuilder {
    task_type: TaskType,
    input_args: TaskPayload,
    namespace: String,
    callback_url: Option<String>,
    max_retry_cnt: i32,
    expire_time: Option<DateTime<Utc>>,
    trace_id: Option<String>,
}

impl TaskBuilder {
    pub fn new(task_type: TaskType, input_args: TaskPayload) -> Self {
        TaskBuilder {
            task_type,
            input_args,
            namespace: String::new(),
            callback_url: None,
            max_retry_cnt: 0,
            expire_time: None,
            trace_id: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn callback_url(mut self, callback_url: Option<String>) -> Self {
        self.callback_url = callback_url;
        self
    }

    pub fn max_retry_cnt(mut self, max_retry_cnt: i32) -> Self {
        self.max_retry_cnt = max_retry_cnt;
        self
    }

    pub fn expire_time(mut self, expire_time: DateTime<Utc>) -> Self {
        self.expire_time = Some(expire_time);
        self
    }

    pub fn trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn build(self) -> Result<Task> {
        if self.input_args.len() > MAX_PAYLOAD_SIZE {
            return Err(TaskError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: self.input_args.len(),
            });
        }
        if self.task_type.is_empty() {
            return Err(TaskError::InvalidArgument("task type is empty".to_string()));
        }

        let now = Utc::now();
        Ok(Task {
            id: Uuid::new_v4().to_string(),
            namespace: self.namespace,
            task_type: self.task_type,
            input_args: self.input_args,
            callback_url: self.callback_url,
            max_retry_cnt: self.max_retry_cnt,
            expire_time: self
                .expire_time
                .unwrap_or_else(|| now + chrono::Duration::hours(24)),
            ctime: now,
            trace_id: self.trace_id,
            state: TaskState::Pending,
            output_args: None,
            error_msg: None,
            attempts: 0,
            progress: -1,
            completed_at: None,
        })
    }
}
