use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub scheduler_address: String,
    pub worker_id: Option<String>,
    /// Address advertised to the scheduler in poll metadata
    pub ip: Option<String>,
    /// Tasks of one type that may run at once; 0 is treated as 1
    pub concurrency: usize,
    /// Per task type overrides of `concurrency`
    pub type_concurrency: HashMap<String, usize>,
    pub heartbeat_interval_ms: u64,
    /// Pause after a failed long-poll before polling again
    pub poll_error_delay_ms: u64,
    /// Must match the scheduler's long-poll window
    pub long_poll_timeout_ms: u64,
    /// Derive task scopes from the worker's root scope so `stop` cancels
    /// running handlers
    pub cancel_tasks_on_stop: bool,
    pub report: ReportConfig,
}

/// Backoff for delivering completion reports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            scheduler_address: "127.0.0.1:7400".to_string(),
            worker_id: None,
            ip: None,
            concurrency: 1,
            type_concurrency: HashMap::new(),
            heartbeat_interval_ms: 5_000,
            poll_error_delay_ms: 1_000,
            long_poll_timeout_ms: 30_000,
            cancel_tasks_on_stop: false,
            report: ReportConfig::default(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            max_attempts: 5,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn generate_worker_id(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let random = Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, pid, &random[..8])
    }

    /// Concurrency budget for one task type
    pub fn concurrency_for(&self, task_type: &str) -> usize {
        self.type_concurrency
            .get(task_type)
            .copied()
            .unwrap_or(self.concurrency)
            .max(1)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn poll_error_delay(&self) -> Duration {
        Duration::from_millis(self.poll_error_delay_ms)
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }
}
