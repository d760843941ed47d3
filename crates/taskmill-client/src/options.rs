use chrono::{DateTime, Utc};
use std::time::Duration;

/// Expiry applied when neither an absolute nor a relative one is given
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Submission options for [`crate::Client::schedule`]
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    pub namespace: Option<String>,
    pub callback_url: Option<String>,
    /// -1 = unlimited, 0 = none, >0 = bounded
    pub max_retry: i32,
    pub expire_at: Option<DateTime<Utc>>,
    pub expire_in: Option<Duration>,
    pub trace_id: Option<String>,
}

impl ScheduleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target namespace; the client's default is used when unset
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn max_retry(mut self, max_retry: i32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Absolute deadline; takes precedence over [`expire_in`](Self::expire_in)
    pub fn expire_at(mut self, at: DateTime<Utc>) -> Self {
        self.expire_at = Some(at);
        self
    }

    /// Deadline relative to submission time
    pub fn expire_in(mut self, duration: Duration) -> Self {
        self.expire_in = Some(duration);
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Absolute expiry for a task submitted at `now`
    pub fn resolve_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(at) = self.expire_at {
            return at;
        }
        let relative = self.expire_in.unwrap_or(DEFAULT_EXPIRY);
        let relative = chrono::Duration::from_std(relative).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(relative).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
