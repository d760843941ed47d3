//! Delivery of completion reports with exponential backoff.

use crate::config::ReportConfig;
use std::sync::Arc;
use std::time::Duration;
use taskmill_core::TaskPayload;
use taskmill_protocol::{CompleteTaskRequest, SchedulerApi};
use tracing::{debug, error, warn};

/// Backoff schedule for report delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&ReportConfig::default())
    }
}

impl From<&ReportConfig> for BackoffPolicy {
    fn from(config: &ReportConfig) -> Self {
        BackoffPolicy {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl BackoffPolicy {
    /// Delay after the given failed attempt (0-indexed).
    ///
    /// initial_delay * multiplier^attempt, capped at max_delay
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Sends the terminal outcome of a task to the scheduler.
///
/// Delivery does not take the task's scope: a report for a cancelled task
/// is still sent.
pub struct CompletionReporter {
    scheduler: Arc<dyn SchedulerApi>,
    policy: BackoffPolicy,
}

impl CompletionReporter {
    pub fn new(scheduler: Arc<dyn SchedulerApi>, policy: BackoffPolicy) -> Self {
        CompletionReporter { scheduler, policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Deliver one report, retrying failed calls. Returns false if every
    /// attempt failed; the report is then dropped.
    pub async fn report(
        &self,
        task_id: &str,
        output: Option<TaskPayload>,
        success: bool,
        error_msg: Option<String>,
        retryable: bool,
    ) -> bool {
        let req = CompleteTaskRequest {
            task_id: task_id.to_string(),
            output_args: output.unwrap_or_default(),
            success,
            error_msg,
            retryable,
        };

        for attempt in 0..self.policy.max_attempts {
            match self.scheduler.complete_task(req.clone()).await {
                Ok(()) => {
                    debug!(task_id, success, attempt = attempt + 1, "Completion reported");
                    return true;
                }
                Err(e) if attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        task_id,
                        attempt = attempt + 1,
                        error = %e,
                        "Completion report failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        task_id,
                        attempts = self.policy.max_attempts,
                        error = %e,
                        "Giving up on completion report"
                    );
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use taskmill_core::{Status, Task, TaskId};
    use taskmill_protocol::{LongPollRequest, RegisterTaskRequest, Result};

    /// Fails the first `failures` completion calls
    struct FlakyScheduler {
        failures: Mutex<u32>,
        delivered: Mutex<Vec<CompleteTaskRequest>>,
        calls: Mutex<u32>,
    }

    impl FlakyScheduler {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(FlakyScheduler {
                failures: Mutex::new(failures),
                delivered: Mutex::new(Vec::new()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl SchedulerApi for FlakyScheduler {
        async fn register_task(&self, _req: RegisterTaskRequest) -> Result<TaskId> {
            unimplemented!()
        }
        async fn get_task(&self, _task_id: &str) -> Result<Task> {
            unimplemented!()
        }
        async fn abort_task(&self, _task_id: &str) -> Result<()> {
            unimplemented!()
        }
        async fn long_poll(&self, _req: LongPollRequest) -> Result<Option<Task>> {
            unimplemented!()
        }
        async fn accept_task(&self, _task_id: &str) -> Result<()> {
            unimplemented!()
        }
        async fn complete_task(&self, req: CompleteTaskRequest) -> Result<()> {
            *self.calls.lock() += 1;
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(Status::unavailable("try later").into());
            }
            self.delivered.lock().push(req);
            Ok(())
        }
        async fn report_progress(&self, _task_id: &str, _progress: i32) -> Result<bool> {
            unimplemented!()
        }
    }

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(7), Duration::from_secs(10));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_report_retries_until_delivered() {
        let scheduler = FlakyScheduler::new(2);
        let reporter = CompletionReporter::new(scheduler.clone(), fast_policy(5));

        let delivered = reporter
            .report("t-1", Some(b"ok".to_vec()), true, None, false)
            .await;

        assert!(delivered);
        assert_eq!(*scheduler.calls.lock(), 3);
        let reports = scheduler.delivered.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].output_args, b"ok");
        assert!(reports[0].success);
    }

    #[tokio::test]
    async fn test_report_gives_up_after_max_attempts() {
        let scheduler = FlakyScheduler::new(10);
        let reporter = CompletionReporter::new(scheduler.clone(), fast_policy(3));

        let delivered = reporter
            .report("t-2", None, false, Some("boom".to_string()), true)
            .await;

        assert!(!delivered);
        assert_eq!(*scheduler.calls.lock(), 3);
        assert!(scheduler.delivered.lock().is_empty());
    }
}
