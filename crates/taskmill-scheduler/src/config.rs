use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub host: String,
    pub port: u16,
    /// How long a long-poll is held open without work
    pub long_poll_timeout_ms: u64,
    /// Delay before a failed attempt is queued again
    pub retry_delay_ms: u64,
    pub sweep_interval_ms: u64,
    /// A polled task not accepted within this window is queued again
    pub accept_timeout_ms: u64,
    pub callback: CallbackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub enabled: bool,
    /// Also call back for failed and expired tasks
    pub on_failure: bool,
    pub timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            host: "127.0.0.1".to_string(),
            port: 7400,
            long_poll_timeout_ms: 30_000,
            retry_delay_ms: 1_000,
            sweep_interval_ms: 1_000,
            accept_timeout_ms: 30_000,
            callback: CallbackConfig::default(),
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        CallbackConfig {
            enabled: true,
            on_failure: false,
            timeout_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SchedulerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port: 9000\nlong_poll_timeout_ms: 500\ncallback:\n  on_failure: true").unwrap();

        let config = SchedulerConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.long_poll_timeout(), Duration::from_millis(500));
        assert_eq!(config.host, "127.0.0.1");
        assert!(config.callback.enabled);
        assert!(config.callback.on_failure);
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
    }
}
