// Worker tests against the in-memory scheduler

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskmill_client::{Client, ScheduleOptions};
use taskmill_core::{
    Cancelled, Code, Status, Task, TaskId, TaskResult, TaskState, HANDLER_PANIC, UNLIMITED_RETRIES,
};
use taskmill_protocol::{CompleteTaskRequest, LongPollRequest, RegisterTaskRequest, SchedulerApi};
use taskmill_scheduler::{MemoryScheduler, SchedulerConfig};
use taskmill_worker::{Worker, WorkerConfig, WorkerError};
use tokio::sync::Notify;

const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Email {
    to: String,
    subject: String,
}

fn scheduler() -> MemoryScheduler {
    let mut config = SchedulerConfig::default();
    config.long_poll_timeout_ms = 200;
    config.retry_delay_ms = 20;
    config.sweep_interval_ms = 50;
    config.callback.enabled = false;
    MemoryScheduler::new(config)
}

fn worker_config() -> WorkerConfig {
    let mut config = WorkerConfig::default();
    config.worker_id = Some("test-worker".to_string());
    config.heartbeat_interval_ms = 50;
    config.long_poll_timeout_ms = 200;
    config.poll_error_delay_ms = 20;
    config.report.initial_delay_ms = 10;
    config
}

fn setup(config: WorkerConfig) -> (MemoryScheduler, Client, Worker) {
    let scheduler = scheduler();
    let client = Client::new(Arc::new(scheduler.clone()), "default");
    let worker = Worker::new(config, Arc::new(scheduler.clone()));
    (scheduler, client, worker)
}

/// Handler that fails with a retryable error on every call, counting calls
fn register_always_failing(worker: &Worker, task_type: &str, calls: Arc<AtomicUsize>) {
    worker.register_fn(task_type, move |_ctx| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            TaskResult::retryable(Status::unavailable("downstream unavailable"))
        }
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_task_output_round_trip() {
    let (_, client, worker) = setup(worker_config());
    worker.register_fn("send_email", |ctx| async move {
        match ctx.task().input_as::<Email>() {
            Ok(email) => TaskResult::success_json(&email),
            Err(e) => TaskResult::non_retryable(e),
        }
    });
    worker.start().unwrap();

    let email = Email {
        to: "ops@example.com".to_string(),
        subject: "report".to_string(),
    };
    let id = client
        .schedule("send_email", Some(&email), ScheduleOptions::new().max_retry(3))
        .await
        .unwrap();

    let output = client.wait_for_output::<Email>(&id, WAIT).await.unwrap();
    assert_eq!(output, Some(email));

    let task = client.get_task(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Success);
    assert_eq!(task.attempts, 1);

    worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flaky_handler_succeeds_on_retry() {
    let (_, client, worker) = setup(worker_config());
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        worker.register_fn("flaky", move |_ctx| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    TaskResult::retryable(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
                } else {
                    TaskResult::success_json("ok")
                }
            }
        });
    }
    worker.start().unwrap();

    let id = client
        .schedule::<()>("flaky", None, ScheduleOptions::new().max_retry(3))
        .await
        .unwrap();
    let task = client.wait_for_result(&id, WAIT).await.unwrap();

    assert_eq!(task.state, TaskState::Success);
    assert_eq!(task.attempts, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounded_retries_are_exhausted() {
    let (_, client, worker) = setup(worker_config());
    let calls = Arc::new(AtomicUsize::new(0));
    register_always_failing(&worker, "doomed", calls.clone());
    worker.start().unwrap();

    let id = client
        .schedule::<()>("doomed", None, ScheduleOptions::new().max_retry(2))
        .await
        .unwrap();
    let task = client.wait_for_result(&id, WAIT).await.unwrap();

    assert_eq!(task.state, TaskState::Failure);
    assert_eq!(task.attempts, 3);
    assert!(task.error_msg.unwrap().contains("downstream unavailable"));

    // no late executions once the task is final
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_retries_runs_once() {
    let (_, client, worker) = setup(worker_config());
    let calls = Arc::new(AtomicUsize::new(0));
    register_always_failing(&worker, "once", calls.clone());
    worker.start().unwrap();

    let id = client
        .schedule::<()>("once", None, ScheduleOptions::new())
        .await
        .unwrap();
    let task = client.wait_for_result(&id, WAIT).await.unwrap();

    assert_eq!(task.state, TaskState::Failure);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_non_retryable_failure_is_final() {
    let (_, client, worker) = setup(worker_config());
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        worker.register_fn("invalid", move |_ctx| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                TaskResult::auto_retry(Status::invalid_argument("bad recipient"))
            }
        });
    }
    worker.start().unwrap();

    let id = client
        .schedule::<()>("invalid", None, ScheduleOptions::new().max_retry(5))
        .await
        .unwrap();
    let task = client.wait_for_result(&id, WAIT).await.unwrap();

    assert_eq!(task.state, TaskState::Failure);
    assert_eq!(task.attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unlimited_retries_end_in_expiry() {
    let (_, client, worker) = setup(worker_config());
    let calls = Arc::new(AtomicUsize::new(0));
    register_always_failing(&worker, "forever", calls.clone());
    worker.start().unwrap();

    let id = client
        .schedule::<()>(
            "forever",
            None,
            ScheduleOptions::new()
                .max_retry(UNLIMITED_RETRIES)
                .expire_in(Duration::from_millis(500)),
        )
        .await
        .unwrap();
    let task = client.wait_for_result(&id, WAIT).await.unwrap();

    assert_eq!(task.state, TaskState::Expired);
    assert!(calls.load(Ordering::SeqCst) >= 2);

    worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_reaches_running_handler() {
    let (_, client, worker) = setup(worker_config());
    let started = Arc::new(Notify::new());
    let observed = Arc::new(Notify::new());
    {
        let started = started.clone();
        let observed = observed.clone();
        worker.register_fn("long_job", move |ctx| {
            let started = started.clone();
            let observed = observed.clone();
            async move {
                started.notify_one();
                tokio::select! {
                    _ = ctx.abort_signal() => {
                        assert!(ctx.scope().is_cancelled());
                        observed.notify_one();
                        TaskResult::non_retryable(Cancelled)
                    }
                    _ = tokio::time::sleep(Duration::from_secs(30)) => TaskResult::success_json("late"),
                }
            }
        });
    }
    worker.start().unwrap();

    let id = client
        .schedule::<()>("long_job", None, ScheduleOptions::new().max_retry(3))
        .await
        .unwrap();
    tokio::time::timeout(WAIT, started.notified()).await.unwrap();

    client.abort_task(&id).await.unwrap();
    // heartbeat is 50ms; allow generous slack
    tokio::time::timeout(Duration::from_secs(1), observed.notified())
        .await
        .expect("handler saw the abort");

    let task = client.wait_for_result(&id, WAIT).await.unwrap();
    assert_eq!(task.state, TaskState::Failure);
    assert_eq!(task.error_msg.as_deref(), Some("aborted"));

    worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_progress_provider_feeds_heartbeat() {
    let (_, client, worker) = setup(worker_config());
    worker.register_fn("render", |ctx| async move {
        ctx.set_progress_provider(|| 42);
        tokio::time::sleep(Duration::from_millis(300)).await;
        TaskResult::success(Vec::new())
    });
    worker.start().unwrap();

    let id = client
        .schedule::<()>("render", None, ScheduleOptions::new())
        .await
        .unwrap();
    let task = client.wait_for_result(&id, WAIT).await.unwrap();

    assert_eq!(task.state, TaskState::Success);
    assert_eq!(task.progress, 42);

    worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_handler_fails_task() {
    let (_, client, worker) = setup(worker_config());
    worker.register_fn("explode", |_ctx| async move {
        if true {
            panic!("kaboom");
        }
        TaskResult::success(Vec::new())
    });
    worker.start().unwrap();

    let id = client
        .schedule::<()>("explode", None, ScheduleOptions::new().max_retry(3))
        .await
        .unwrap();
    let task = client.wait_for_result(&id, WAIT).await.unwrap();

    assert_eq!(task.state, TaskState::Failure);
    assert_eq!(task.error_msg.as_deref(), Some(HANDLER_PANIC));
    assert_eq!(task.attempts, 1);

    // the dispatcher survives the panic
    let id = client
        .schedule::<()>("explode", None, ScheduleOptions::new())
        .await
        .unwrap();
    let task = client.wait_for_result(&id, WAIT).await.unwrap();
    assert_eq!(task.state, TaskState::Failure);

    worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_limit_is_respected() {
    let mut config = worker_config();
    config.concurrency = 2;
    let (_, client, worker) = setup(config);

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    {
        let current = current.clone();
        let peak = peak.clone();
        worker.register_fn("batch", move |_ctx| {
            let current = current.clone();
            let peak = peak.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                TaskResult::success(Vec::new())
            }
        });
    }
    worker.start().unwrap();

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(
            client
                .schedule::<()>("batch", None, ScheduleOptions::new())
                .await
                .unwrap(),
        );
    }
    for id in &ids {
        let task = client.wait_for_result(id, WAIT).await.unwrap();
        assert_eq!(task.state, TaskState::Success);
    }

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 2, "peak concurrency was {}", peak);
    assert!(worker.active_tasks("batch") <= 2);

    worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_interrupts_long_poll() {
    let scheduler = {
        let mut config = SchedulerConfig::default();
        config.long_poll_timeout_ms = 60_000;
        config.callback.enabled = false;
        MemoryScheduler::new(config)
    };
    let worker = Worker::new(worker_config(), Arc::new(scheduler));
    worker.register_fn("idle", |_ctx| async { TaskResult::success(Vec::new()) });
    worker.start().unwrap();
    assert!(worker.is_running());

    // let the dispatcher park in its poll
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(2), worker.stop())
        .await
        .expect("stop returns while a long-poll is in flight");
    assert!(!worker.is_running());

    // idempotent, and a stopped worker cannot restart
    worker.stop().await;
    assert!(matches!(worker.start(), Err(WorkerError::Stopped)));
}

/// Scheduler whose long-poll never answers and whose cancellation takes a
/// while to unwind, so a dispatcher exits noticeably after `stop` begins
#[derive(Default)]
struct SlowUnwindScheduler {
    polling: AtomicBool,
    unwound: Arc<AtomicBool>,
}

struct UnwindGuard(Arc<AtomicBool>);

impl Drop for UnwindGuard {
    fn drop(&mut self) {
        std::thread::sleep(Duration::from_millis(300));
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SchedulerApi for SlowUnwindScheduler {
    async fn register_task(&self, _req: RegisterTaskRequest) -> taskmill_protocol::Result<TaskId> {
        Err(Status::new(Code::Unimplemented, "register").into())
    }
    async fn get_task(&self, _task_id: &str) -> taskmill_protocol::Result<Task> {
        Err(Status::new(Code::Unimplemented, "get").into())
    }
    async fn abort_task(&self, _task_id: &str) -> taskmill_protocol::Result<()> {
        Err(Status::new(Code::Unimplemented, "abort").into())
    }
    async fn long_poll(&self, _req: LongPollRequest) -> taskmill_protocol::Result<Option<Task>> {
        let _guard = UnwindGuard(self.unwound.clone());
        self.polling.store(true, Ordering::SeqCst);
        std::future::pending().await
    }
    async fn accept_task(&self, _task_id: &str) -> taskmill_protocol::Result<()> {
        Err(Status::new(Code::Unimplemented, "accept").into())
    }
    async fn complete_task(&self, _req: CompleteTaskRequest) -> taskmill_protocol::Result<()> {
        Err(Status::new(Code::Unimplemented, "complete").into())
    }
    async fn report_progress(&self, _task_id: &str, _progress: i32) -> taskmill_protocol::Result<bool> {
        Err(Status::new(Code::Unimplemented, "progress").into())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stops_all_wait_for_dispatchers() {
    let scheduler = Arc::new(SlowUnwindScheduler::default());
    let worker = Arc::new(Worker::new(worker_config(), scheduler.clone()));
    worker.register_fn("idle", |_ctx| async { TaskResult::success(Vec::new()) });
    worker.start().unwrap();

    while !scheduler.polling.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let first = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.stop().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    tokio::time::timeout(Duration::from_secs(5), worker.stop())
        .await
        .expect("second stop returns");
    assert!(
        scheduler.unwound.load(Ordering::SeqCst),
        "second stop returned before the dispatcher exited"
    );

    first.await.unwrap();
    assert!(!worker.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_leaves_running_tasks_alone_by_default() {
    let (_, client, worker) = setup(worker_config());
    let started = Arc::new(Notify::new());
    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let started = started.clone();
        let cancelled = cancelled.clone();
        worker.register_fn("steady", move |ctx| {
            let started = started.clone();
            let cancelled = cancelled.clone();
            async move {
                started.notify_one();
                tokio::select! {
                    _ = ctx.scope().cancelled() => {
                        cancelled.store(true, Ordering::SeqCst);
                        TaskResult::non_retryable(Cancelled)
                    }
                    _ = tokio::time::sleep(Duration::from_millis(400)) => TaskResult::success(Vec::new()),
                }
            }
        });
    }
    worker.start().unwrap();

    let id = client
        .schedule::<()>("steady", None, ScheduleOptions::new())
        .await
        .unwrap();
    tokio::time::timeout(WAIT, started.notified()).await.unwrap();
    worker.stop().await;

    let task = client.wait_for_result(&id, WAIT).await.unwrap();
    assert_eq!(task.state, TaskState::Success);
    assert!(!cancelled.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_cancels_running_tasks_when_configured() {
    let mut config = worker_config();
    config.cancel_tasks_on_stop = true;
    let (_, client, worker) = setup(config);

    let started = Arc::new(Notify::new());
    let cancelled = Arc::new(Notify::new());
    {
        let started = started.clone();
        let cancelled = cancelled.clone();
        worker.register_fn("stoppable", move |ctx| {
            let started = started.clone();
            let cancelled = cancelled.clone();
            async move {
                started.notify_one();
                tokio::select! {
                    _ = ctx.scope().cancelled() => {
                        cancelled.notify_one();
                        TaskResult::non_retryable(Cancelled)
                    }
                    _ = tokio::time::sleep(Duration::from_secs(30)) => TaskResult::success(Vec::new()),
                }
            }
        });
    }
    worker.start().unwrap();

    let id = client
        .schedule::<()>("stoppable", None, ScheduleOptions::new())
        .await
        .unwrap();
    tokio::time::timeout(WAIT, started.notified()).await.unwrap();
    worker.stop().await;

    tokio::time::timeout(Duration::from_secs(2), cancelled.notified())
        .await
        .expect("handler scope cancelled by stop");
    let task = client.wait_for_result(&id, WAIT).await.unwrap();
    assert_eq!(task.state, TaskState::Failure);
}

#[tokio::test]
async fn test_start_preconditions() {
    let (_, _, worker) = setup(worker_config());
    assert!(matches!(worker.start(), Err(WorkerError::NoHandlers)));

    worker.register_fn("echo", |ctx| async move { TaskResult::success(ctx.task().input_args.clone()) });
    worker.start().unwrap();
    assert!(matches!(worker.start(), Err(WorkerError::AlreadyRunning)));
    assert_eq!(worker.task_types(), vec!["echo".to_string()]);
    assert_eq!(worker.worker_id(), "test-worker");

    worker.stop().await;
}
