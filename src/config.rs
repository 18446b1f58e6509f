//! 运行参数：重试预算、单飞锁重试间隔、日志截断宽度等。
//!
//! 默认值可被环境变量覆盖：
//! - `COOL_MAX_EXECUTION_TIME`：重试总时长（秒，可为小数）
//! - `COOL_REDIS_LOCK_RETRY_DELAY`：单飞锁重试间隔（秒，可为小数）
//! - `COOL_MYSQL_MAX_QUERY_LOG_LENGTH`：诊断信息中查询的最大长度（字节）

use std::time::Duration;

pub const ENV_MAX_EXECUTION_TIME: &str = "COOL_MAX_EXECUTION_TIME";
pub const ENV_LOCK_RETRY_DELAY: &str = "COOL_REDIS_LOCK_RETRY_DELAY";
pub const ENV_MAX_QUERY_LOG_LENGTH: &str = "COOL_MYSQL_MAX_QUERY_LOG_LENGTH";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// 重试包装允许消耗的最长时间。
    pub max_execution_time: Duration,
    pub max_attempts: u32,
    pub lock_retry_delay: Duration,
    pub max_query_log_length: usize,
    /// 覆盖服务端的 `max_allowed_packet`；`None` 时首次使用前查询一次并缓存。
    pub max_allowed_packet: Option<usize>,
    pub warn_unknown_columns: bool,
    pub backoff_initial: Duration,
    pub backoff_multiplier: f64,
    pub backoff_max: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_execution_time: Duration::from_secs(27),
            max_attempts: 10,
            lock_retry_delay: Duration::from_millis(20),
            max_query_log_length: 4096,
            max_allowed_packet: None,
            warn_unknown_columns: true,
            backoff_initial: Duration::from_millis(100),
            backoff_multiplier: 1.5,
            backoff_max: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// 默认值 + 环境变量覆盖。
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// 同 `from_env`，但从给定函数读取变量。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(d) = seconds_var(&lookup, ENV_MAX_EXECUTION_TIME) {
            cfg.max_execution_time = d;
        }
        if let Some(d) = seconds_var(&lookup, ENV_LOCK_RETRY_DELAY) {
            cfg.lock_retry_delay = d;
        }
        if let Some(raw) = lookup(ENV_MAX_QUERY_LOG_LENGTH) {
            match raw.trim().parse::<usize>() {
                Ok(n) => cfg.max_query_log_length = n,
                Err(err) => {
                    tracing::warn!(var = ENV_MAX_QUERY_LOG_LENGTH, value = %raw, error = %err, "ignoring malformed env var");
                }
            }
        }
        cfg
    }

    pub fn max_execution_time(mut self, d: Duration) -> Self {
        self.max_execution_time = d;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn lock_retry_delay(mut self, d: Duration) -> Self {
        self.lock_retry_delay = d;
        self
    }

    pub fn max_query_log_length(mut self, n: usize) -> Self {
        self.max_query_log_length = n;
        self
    }

    pub fn max_allowed_packet(mut self, n: usize) -> Self {
        self.max_allowed_packet = Some(n);
        self
    }

    pub fn warn_unknown_columns(mut self, on: bool) -> Self {
        self.warn_unknown_columns = on;
        self
    }
}

fn seconds_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<Duration> {
    let raw = lookup(name)?;
    match raw.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Some(Duration::from_secs_f64(secs)),
        Ok(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring out of range env var");
            None
        }
        Err(err) => {
            tracing::warn!(var = name, value = %raw, error = %err, "ignoring malformed env var");
            None
        }
    }
}
