use crate::config::CallbackConfig;
use std::time::Duration;
use taskmill_core::{CallbackPayload, Task, TaskState};
use tracing::{debug, warn};

/// Posts terminal task outcomes to producer callback URLs.
///
/// Each outcome is delivered at most once; a failed delivery is logged and
/// dropped.
#[derive(Clone)]
pub struct CallbackNotifier {
    client: reqwest::Client,
    on_failure: bool,
}

impl CallbackNotifier {
    pub fn new(config: &CallbackConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(CallbackNotifier {
            client,
            on_failure: config.on_failure,
        })
    }

    /// Whether a task in this state should trigger its callback
    pub fn wants(&self, task: &Task) -> bool {
        task.callback_url.is_some()
            && match task.state {
                TaskState::Success => true,
                TaskState::Failure | TaskState::Expired => self.on_failure,
                TaskState::Pending | TaskState::Running => false,
            }
    }

    /// Deliver one callback; returns true only on a 200 response
    pub async fn deliver(&self, task: &Task) -> bool {
        let Some(url) = task.callback_url.as_deref() else {
            return false;
        };
        let payload = CallbackPayload::from_task(task);

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                debug!(task_id = %task.id, url, "Callback delivered");
                true
            }
            Ok(response) => {
                warn!(task_id = %task.id, url, status = %response.status(), "Callback rejected");
                false
            }
            Err(e) => {
                warn!(task_id = %task.id, url, error = %e, "Callback delivery failed");
                false
            }
        }
    }
}
