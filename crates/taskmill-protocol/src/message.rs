use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskmill_core::{Status, Task, TaskId, TaskPayload, TaskType};

/// Message types for the TCP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    RegisterTask = 1,
    GetTask = 2,
    AbortTask = 3,
    LongPoll = 4,
    AcceptTask = 5,
    CompleteTask = 6,
    ReportProgress = 7,
    Registered = 8,
    TaskFound = 9,
    Polled = 10,
    Progress = 11,
    Ack = 12,
    Error = 13,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::RegisterTask),
            2 => Some(MessageType::GetTask),
            3 => Some(MessageType::AbortTask),
            4 => Some(MessageType::LongPoll),
            5 => Some(MessageType::AcceptTask),
            6 => Some(MessageType::CompleteTask),
            7 => Some(MessageType::ReportProgress),
            8 => Some(MessageType::Registered),
            9 => Some(MessageType::TaskFound),
            10 => Some(MessageType::Polled),
            11 => Some(MessageType::Progress),
            12 => Some(MessageType::Ack),
            13 => Some(MessageType::Error),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Protocol messages. Each connection carries one request and its response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Producer submits a task
    RegisterTask(RegisterTaskRequest),

    /// Point lookup by id
    GetTask(TaskIdRequest),

    /// Producer asks for a task to be cancelled
    AbortTask(TaskIdRequest),

    /// Worker waits for a task of one type
    LongPoll(LongPollRequest),

    /// Worker claims a polled task
    AcceptTask(TaskIdRequest),

    /// Worker reports the terminal outcome of an attempt
    CompleteTask(CompleteTaskRequest),

    /// Worker heartbeat carrying progress; answered with the abort flag
    ReportProgress(ReportProgressRequest),

    Registered(RegisteredResponse),
    TaskFound(TaskResponse),
    Polled(PollResponse),
    Progress(ProgressResponse),

    /// Positive acknowledgment
    Ack,

    /// Remote failure
    Error(Status),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::RegisterTask(_) => MessageType::RegisterTask,
            Message::GetTask(_) => MessageType::GetTask,
            Message::AbortTask(_) => MessageType::AbortTask,
            Message::LongPoll(_) => MessageType::LongPoll,
            Message::AcceptTask(_) => MessageType::AcceptTask,
            Message::CompleteTask(_) => MessageType::CompleteTask,
            Message::ReportProgress(_) => MessageType::ReportProgress,
            Message::Registered(_) => MessageType::Registered,
            Message::TaskFound(_) => MessageType::TaskFound,
            Message::Polled(_) => MessageType::Polled,
            Message::Progress(_) => MessageType::Progress,
            Message::Ack => MessageType::Ack,
            Message::Error(_) => MessageType::Error,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self.message_type() {
            MessageType::RegisterTask => "RegisterTask",
            MessageType::GetTask => "GetTask",
            MessageType::AbortTask => "AbortTask",
            MessageType::LongPoll => "LongPoll",
            MessageType::AcceptTask => "AcceptTask",
            MessageType::CompleteTask => "CompleteTask",
            MessageType::ReportProgress => "ReportProgress",
            MessageType::Registered => "Registered",
            MessageType::TaskFound => "TaskFound",
            MessageType::Polled => "Polled",
            MessageType::Progress => "Progress",
            MessageType::Ack => "Ack",
            MessageType::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterTaskRequest {
    pub task_type: TaskType,
    pub namespace: String,
    pub input_args: TaskPayload,
    pub callback_url: Option<String>,
    pub max_retry_cnt: i32,
    pub expire_time: DateTime<Utc>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIdRequest {
    pub task_id: TaskId,
}

/// What a worker can run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAbility {
    pub task_type: TaskType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMetadata {
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Running,
    Stopping,
}

/// Identity a worker presents when polling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub ability: WorkerAbility,
    pub metadata: WorkerMetadata,
    pub state: WorkerState,
}

impl WorkerInfo {
    /// A running worker with no extra metadata
    pub fn new(id: impl Into<String>, ability: WorkerAbility) -> Self {
        WorkerInfo {
            id: id.into(),
            ability,
            metadata: WorkerMetadata::default(),
            state: WorkerState::Running,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongPollRequest {
    pub worker: WorkerInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteTaskRequest {
    pub task_id: TaskId,
    pub output_args: TaskPayload,
    pub success: bool,
    pub error_msg: Option<String>,
    /// Worker's classification of the failure; advisory for the scheduler
    pub retryable: bool,
}

impl CompleteTaskRequest {
    pub fn success(task_id: impl Into<TaskId>, output_args: TaskPayload) -> Self {
        CompleteTaskRequest {
            task_id: task_id.into(),
            output_args,
            success: true,
            error_msg: None,
            retryable: false,
        }
    }

    pub fn failure(task_id: impl Into<TaskId>, error_msg: impl Into<String>, retryable: bool) -> Self {
        CompleteTaskRequest {
            task_id: task_id.into(),
            output_args: Vec::new(),
            success: false,
            error_msg: Some(error_msg.into()),
            retryable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportProgressRequest {
    pub task_id: TaskId,
    /// 0-100, or -1 when unknown
    pub progress: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task: Task,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    /// `None` when no work arrived before the scheduler's poll timeout
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub aborted: bool,
}
