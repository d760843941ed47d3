use crate::{Task, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON body POSTed to a task's callback URL once it reaches a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub task_id: TaskId,
    pub namespace: String,
    pub task_type: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_args: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl CallbackPayload {
    /// Build the payload for a terminal task. Output that is not valid JSON is
    /// passed through as a string.
    pub fn from_task(task: &Task) -> Self {
        let output_args = task.output_args.as_ref().filter(|b| !b.is_empty()).map(|bytes| {
            serde_json::from_slice(bytes).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
            })
        });

        CallbackPayload {
            task_id: task.id.clone(),
            namespace: task.namespace.clone(),
            task_type: task.task_type.clone(),
            state: task.state.as_str().to_string(),
            output_args,
            error_msg: task.error_msg.clone(),
            trace_id: task.trace_id.clone(),
            completed_at: task.completed_at.unwrap_or_else(Utc::now),
        }
    }
}
