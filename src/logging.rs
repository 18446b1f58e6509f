//! 查询日志：每次查询结束后产出一条 `LogDetail`，交给可替换的 `QueryLogger`。

use crate::error::truncate_query;
use crate::params::Params;
use std::time::Duration;

/// 一次查询的诊断记录。
#[derive(Debug, Clone)]
pub struct LogDetail {
    pub query: String,
    pub params: Params,
    pub duration: Duration,
    pub cache_hit: bool,
    /// 第几次尝试（从 1 开始）；缓存命中为 0。
    pub attempt: u32,
    pub error: Option<String>,
    pub in_tx: bool,
}

pub trait QueryLogger: Send + Sync {
    fn log(&self, detail: &LogDetail);
}

/// 默认实现：成功查询输出 debug，失败查询输出 warn。
#[derive(Debug, Clone)]
pub struct TracingQueryLogger {
    pub max_query_length: usize,
}

impl Default for TracingQueryLogger {
    fn default() -> Self {
        Self {
            max_query_length: 4096,
        }
    }
}

impl QueryLogger for TracingQueryLogger {
    fn log(&self, d: &LogDetail) {
        let query = truncate_query(&d.query, self.max_query_length);
        match &d.error {
            Some(err) => tracing::warn!(
                query = %query,
                duration_ms = d.duration.as_millis() as u64,
                attempt = d.attempt,
                tx = d.in_tx,
                error = %err,
                "query failed"
            ),
            None => tracing::debug!(
                query = %query,
                duration_ms = d.duration.as_millis() as u64,
                cache_hit = d.cache_hit,
                attempt = d.attempt,
                tx = d.in_tx,
                "query"
            ),
        }
    }
}
