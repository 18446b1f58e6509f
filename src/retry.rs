//! 重试包装：指数退避，受最大耗时与最大尝试次数约束。
//!
//! 只重试可重试的驱动错误；连接失效时先做一次重连探测。
//! 探测在进程级互斥锁下进行，并发的探测会合并排队。

use crate::config::Config;
use crate::context::Context;
use crate::driver::{Driver, DriverError};
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

static RECONNECT: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    multiplier: f64,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(cfg: &Config) -> Self {
        Self {
            next: cfg.backoff_initial,
            multiplier: cfg.backoff_multiplier.max(1.0),
            max: cfg.backoff_max,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let d = self.next.min(self.max);
        self.next = self.next.mul_f64(self.multiplier).min(self.max);
        d
    }
}

/// 执行 `op`，返回结果与实际尝试次数；`max_attempts` 覆盖配置中的次数上限。
pub(crate) async fn retry<T, F, Fut>(
    ctx: &Context,
    cfg: &Config,
    max_attempts: u32,
    reconnect: Option<&dyn Driver>,
    mut op: F,
) -> (Result<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, DriverError>>,
{
    let started = Instant::now();
    let mut backoff = Backoff::new(cfg);
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let res = ctx.run(async { op().await.map_err(Error::from) }).await;
        let err = match res {
            Ok(v) => return (Ok(v), attempt),
            Err(Error::Driver(e)) if e.is_retryable() => e,
            Err(e) => return (Err(e), attempt),
        };

        let delay = backoff.next_delay();
        if attempt >= max_attempts || started.elapsed() + delay > cfg.max_execution_time {
            return (Err(err.into()), attempt);
        }
        tracing::warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying query");

        if err == DriverError::BadConnection
            && let Some(driver) = reconnect
        {
            probe(ctx, driver).await;
        }
        if let Err(e) = ctx.sleep(delay).await {
            return (Err(e), attempt);
        }
    }
}

async fn probe(ctx: &Context, driver: &dyn Driver) {
    let _guard = RECONNECT.lock().await;
    if let Err(err) = driver.ping(ctx).await {
        tracing::warn!(error = %err, "reconnect probe failed");
    }
}
