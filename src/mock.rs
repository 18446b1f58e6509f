//! 测试用脚本驱动：按语句文本返回预设结果，并记录所有语句。

use crate::config::Config;
use crate::context::Context;
use crate::db::{Database, DatabaseBuilder};
use crate::driver::{Driver, DriverError, DriverTx, ExecResult, Queryer, Rows, VecRows};
use crate::value::SqlValue;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) enum MockReply {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<SqlValue>>,
    },
    Exec(ExecResult),
    Err(DriverError),
}

impl MockReply {
    pub(crate) fn rows(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Rows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    pub(crate) fn affected(n: u64) -> Self {
        Self::Exec(ExecResult {
            rows_affected: n,
            last_insert_id: 0,
        })
    }
}

type Handler = Box<dyn FnMut(&str) -> MockReply + Send>;

struct Inner {
    handler: Mutex<Handler>,
    log: Mutex<Vec<String>>,
    pings: AtomicUsize,
}

impl Inner {
    fn record(&self, q: &str) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(q.to_string());
    }

    fn reply(&self, q: &str) -> MockReply {
        self.record(q);
        let mut h = self.handler.lock().unwrap_or_else(|e| e.into_inner());
        (*h)(q)
    }

    fn query(&self, q: &str) -> Result<Box<dyn Rows>, DriverError> {
        match self.reply(q) {
            MockReply::Rows { columns, rows } => Ok(Box::new(VecRows::new(columns, rows))),
            MockReply::Exec(_) => Ok(Box::new(VecRows::default())),
            MockReply::Err(e) => Err(e),
        }
    }

    fn exec(&self, q: &str) -> Result<ExecResult, DriverError> {
        match self.reply(q) {
            MockReply::Exec(r) => Ok(r),
            MockReply::Rows { .. } => Ok(ExecResult::default()),
            MockReply::Err(e) => Err(e),
        }
    }
}

#[derive(Clone)]
pub(crate) struct MockDriver {
    inner: Arc<Inner>,
}

impl MockDriver {
    pub(crate) fn new(handler: impl FnMut(&str) -> MockReply + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler: Mutex::new(Box::new(handler)),
                log: Mutex::new(Vec::new()),
                pings: AtomicUsize::new(0),
            }),
        }
    }

    /// 到目前为止收到的所有语句（含 BEGIN/COMMIT/ROLLBACK）。
    pub(crate) fn statements(&self) -> Vec<String> {
        self.inner
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn pings(&self) -> usize {
        self.inner.pings.load(Ordering::SeqCst)
    }

    /// 读写共用该驱动；包大小固定，避免额外的 `@@max_allowed_packet` 查询。
    pub(crate) fn builder(&self) -> DatabaseBuilder {
        let driver: Arc<dyn Driver> = Arc::new(self.clone());
        Database::builder(Arc::clone(&driver), driver).config(test_config())
    }

    pub(crate) fn database(&self) -> Database {
        self.builder().build()
    }
}

pub(crate) fn test_config() -> Config {
    let mut cfg = Config::default()
        .max_allowed_packet(1 << 20)
        .lock_retry_delay(Duration::from_millis(5));
    cfg.backoff_initial = Duration::from_millis(1);
    cfg.backoff_max = Duration::from_millis(10);
    cfg
}

#[async_trait]
impl Queryer for MockDriver {
    async fn query(&self, _ctx: &Context, q: &str) -> Result<Box<dyn Rows>, DriverError> {
        self.inner.query(q)
    }

    async fn exec(&self, _ctx: &Context, q: &str) -> Result<ExecResult, DriverError> {
        self.inner.exec(q)
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn begin(&self, _ctx: &Context) -> Result<Box<dyn DriverTx>, DriverError> {
        self.inner.record("BEGIN");
        Ok(Box::new(MockTx {
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn ping(&self, _ctx: &Context) -> Result<(), DriverError> {
        self.inner.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockTx {
    inner: Arc<Inner>,
}

#[async_trait]
impl Queryer for MockTx {
    async fn query(&self, _ctx: &Context, q: &str) -> Result<Box<dyn Rows>, DriverError> {
        self.inner.query(q)
    }

    async fn exec(&self, _ctx: &Context, q: &str) -> Result<ExecResult, DriverError> {
        self.inner.exec(q)
    }
}

#[async_trait]
impl DriverTx for MockTx {
    async fn commit(&self, _ctx: &Context) -> Result<(), DriverError> {
        self.inner.record("COMMIT");
        Ok(())
    }

    async fn rollback(&self, _ctx: &Context) -> Result<(), DriverError> {
        self.inner.record("ROLLBACK");
        Ok(())
    }
}
