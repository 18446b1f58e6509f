//! 行分发引擎：内联、（可选）缓存、带重试执行，再把结果行逐行写入目标。
//!
//! 连接池与事务共用同一套流程，区别只在 `Conn`：事务内不重试、不做重连探测。

use crate::cache::{Cache, CacheError, CachedRows, exists_cache_key, row_cache_key};
use crate::context::Context;
use crate::db::Shared;
use crate::driver::{Driver, DriverError, DriverTx, ExecResult, Rows, VecRows};
use crate::error::{Error, QueryError, Result};
use crate::interpolate::{Interpolated, interpolate};
use crate::logging::LogDetail;
use crate::params::{Param, Params};
use crate::retry::retry;
use crate::scan::{FromRow, ScanPlan};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// 结果行的去向。
pub enum Destination<'a, T> {
    /// 单值：只取第一行，没有行时返回 `Error::NoRows`。
    One(&'a mut T),
    /// 追加到切片。
    Slice(&'a mut Vec<T>),
    /// 逐行发送到通道；通道关闭返回 `Error::ChannelClosed`。
    Channel(mpsc::Sender<T>),
    /// 每行调用一次；回调返回错误即中止。
    Callback(Box<dyn FnMut(T) -> Result<()> + Send + 'a>),
    /// 单值，写入 `Some`。
    Slot(&'a mut Option<T>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

impl<'a, T: Send> Destination<'a, T> {
    pub fn one(out: &'a mut T) -> Self {
        Self::One(out)
    }

    pub fn slice(out: &'a mut Vec<T>) -> Self {
        Self::Slice(out)
    }

    pub fn channel(tx: mpsc::Sender<T>) -> Self {
        Self::Channel(tx)
    }

    pub fn callback(f: impl FnMut(T) -> Result<()> + Send + 'a) -> Self {
        Self::Callback(Box::new(f))
    }

    fn is_single(&self) -> bool {
        matches!(self, Self::One(_) | Self::Slot(_))
    }

    /// 参与缓存键：同一查询按单值与多值读取时缓存的行数不同。
    fn kind(&self) -> &'static str {
        if self.is_single() { "one" } else { "many" }
    }

    async fn emit(&mut self, ctx: &Context, row: T) -> Result<Flow> {
        match self {
            Self::One(out) => {
                **out = row;
                Ok(Flow::Stop)
            }
            Self::Slot(out) => {
                **out = Some(row);
                Ok(Flow::Stop)
            }
            Self::Slice(out) => {
                out.push(row);
                Ok(Flow::Continue)
            }
            Self::Callback(f) => f(row).map(|_| Flow::Continue),
            Self::Channel(tx) => {
                tokio::select! {
                    biased;
                    _ = ctx.done() => {
                        ctx.cancel();
                        Err(ctx.err().unwrap_or(Error::Cancelled))
                    }
                    sent = tx.send(row) => sent.map(|_| Flow::Continue).map_err(|_| Error::ChannelClosed),
                }
            }
        }
    }
}

/// 一次查询的执行轨迹，用于日志。
#[derive(Debug, Clone, Copy, Default)]
struct Trace {
    attempt: u32,
    cache_hit: bool,
}

/// 执行语句的连接：连接池或事务。
#[derive(Clone, Copy)]
pub(crate) enum Conn<'a> {
    Pool(&'a dyn Driver),
    Tx(&'a dyn DriverTx),
}

impl Conn<'_> {
    async fn query(&self, ctx: &Context, q: &str) -> std::result::Result<Box<dyn Rows>, DriverError> {
        match self {
            Self::Pool(d) => d.query(ctx, q).await,
            Self::Tx(t) => t.query(ctx, q).await,
        }
    }

    async fn exec(&self, ctx: &Context, q: &str) -> std::result::Result<ExecResult, DriverError> {
        match self {
            Self::Pool(d) => d.exec(ctx, q).await,
            Self::Tx(t) => t.exec(ctx, q).await,
        }
    }

    fn reconnect(&self) -> Option<&dyn Driver> {
        match self {
            Self::Pool(d) => Some(*d),
            Self::Tx(_) => None,
        }
    }
}

#[derive(Clone)]
pub(crate) struct Session<'a> {
    pub(crate) shared: Arc<Shared>,
    pub(crate) conn: Conn<'a>,
    pub(crate) in_tx: bool,
}

impl<'a> Session<'a> {
    pub(crate) fn new(shared: Arc<Shared>, conn: Conn<'a>, in_tx: bool) -> Self {
        Self {
            shared,
            conn,
            in_tx,
        }
    }

    pub(crate) fn interpolate(&self, query: &str, params: &[Param]) -> Result<Interpolated> {
        interpolate(
            query,
            &self.shared.template_funcs,
            &self.shared.valuers,
            params,
        )
        .map_err(|e| self.wrap(e, query, query, &Params::new()))
    }

    fn wrap(&self, err: Error, query: &str, inlined: &str, params: &Params) -> Error {
        QueryError::wrap(
            err,
            query,
            inlined,
            params,
            self.shared.config.max_query_log_length,
        )
    }

    fn max_attempts(&self) -> u32 {
        if self.in_tx { 1 } else { self.shared.config.max_attempts }
    }

    fn log(&self, inter: &Interpolated, started: Instant, trace: Trace, err: Option<&Error>) {
        self.shared.logger.log(&LogDetail {
            query: inter.query.clone(),
            params: inter.params.clone(),
            duration: started.elapsed(),
            cache_hit: trace.cache_hit,
            attempt: trace.attempt,
            error: err.filter(|e| !e.is_no_rows()).map(|e| e.to_string()),
            in_tx: self.in_tx,
        });
    }

    /// 缓存错误交给处理器：吞掉返回 `Ok(())`，否则上抛。
    fn cache_error(&self, err: CacheError) -> Result<()> {
        if err == CacheError::Miss {
            return Ok(());
        }
        (self.shared.cache_error_handler)(err).map_err(Error::from)
    }

    async fn cache_get(&self, cache: &dyn Cache, key: &str) -> Result<Option<Vec<u8>>> {
        match cache.get(key).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) => self.cache_error(e).map(|_| None),
        }
    }

    async fn cache_set(&self, cache: &dyn Cache, key: &str, raw: Vec<u8>, ttl: Duration) -> Result<()> {
        match cache.set(key, raw, ttl).await {
            Ok(()) => Ok(()),
            Err(e) => self.cache_error(e),
        }
    }

    async fn query_rows(&self, ctx: &Context, inlined: &str, trace: &mut Trace) -> Result<Box<dyn Rows>> {
        let conn = self.conn;
        let (res, attempt) = retry(
            ctx,
            &self.shared.config,
            self.max_attempts(),
            conn.reconnect(),
            || conn.query(ctx, inlined),
        )
        .await;
        trace.attempt = attempt;
        res
    }

    /// 查询并把结果行写入 `dest`。`ttl` 为零或未配置缓存时直接查询。
    pub(crate) async fn select<T: FromRow>(
        &self,
        ctx: &Context,
        mut dest: Destination<'_, T>,
        query: &str,
        ttl: Duration,
        params: &[Param],
    ) -> Result<()> {
        let inter = self.interpolate(query, params)?;
        let started = Instant::now();
        let mut trace = Trace::default();
        let cache = self.shared.cache.clone().filter(|_| !ttl.is_zero());
        let res = match cache {
            Some(cache) => {
                self.select_cached(ctx, cache.as_ref(), &mut dest, &inter, ttl, &mut trace)
                    .await
            }
            None => self.select_direct(ctx, &mut dest, &inter.query, &mut trace, None).await,
        };
        self.log(&inter, started, trace, res.as_ref().err());
        res.map_err(|e| self.wrap(e, query, &inter.query, &inter.params))
    }

    async fn select_direct<T: FromRow>(
        &self,
        ctx: &Context,
        dest: &mut Destination<'_, T>,
        inlined: &str,
        trace: &mut Trace,
        acc: Option<&mut CachedRows>,
    ) -> Result<()> {
        let mut rows = self.query_rows(ctx, inlined, trace).await?;
        self.deliver(ctx, rows.as_mut(), dest, acc).await
    }

    async fn select_cached<T: FromRow>(
        &self,
        ctx: &Context,
        cache: &dyn Cache,
        dest: &mut Destination<'_, T>,
        inter: &Interpolated,
        ttl: Duration,
        trace: &mut Trace,
    ) -> Result<()> {
        let type_name = format!("{}:{}", dest.kind(), std::any::type_name::<T>());
        let key = row_cache_key(&type_name, &inter.query, ttl);
        loop {
            if let Some(cached) = self.cached_rows(cache, &key).await? {
                trace.cache_hit = true;
                let mut rows = VecRows::new(cached.columns, cached.rows);
                return self.deliver(ctx, &mut rows, dest, None).await;
            }
            match cache.lock(&key, ttl).await {
                Ok(Some(_guard)) => {
                    // 持锁后再查一次，前一个持锁者可能刚写入
                    if let Some(cached) = self.cached_rows(cache, &key).await? {
                        trace.cache_hit = true;
                        let mut rows = VecRows::new(cached.columns, cached.rows);
                        return self.deliver(ctx, &mut rows, dest, None).await;
                    }
                    return self.fill_cache(ctx, cache, dest, inter, &key, ttl, trace).await;
                }
                Ok(None) => ctx.sleep(self.shared.config.lock_retry_delay).await?,
                Err(e) => {
                    self.cache_error(e)?;
                    return self.fill_cache(ctx, cache, dest, inter, &key, ttl, trace).await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fill_cache<T: FromRow>(
        &self,
        ctx: &Context,
        cache: &dyn Cache,
        dest: &mut Destination<'_, T>,
        inter: &Interpolated,
        key: &str,
        ttl: Duration,
        trace: &mut Trace,
    ) -> Result<()> {
        let mut acc = CachedRows::default();
        let res = self
            .select_direct(ctx, dest, &inter.query, trace, Some(&mut acc))
            .await;
        if matches!(res, Ok(()) | Err(Error::NoRows)) {
            let raw = match acc.encode() {
                Ok(raw) => raw,
                Err(e) => {
                    self.cache_error(e)?;
                    return res;
                }
            };
            self.cache_set(cache, key, raw, ttl).await?;
        }
        res
    }

    async fn cached_rows(&self, cache: &dyn Cache, key: &str) -> Result<Option<CachedRows>> {
        let Some(raw) = self.cache_get(cache, key).await? else {
            return Ok(None);
        };
        match CachedRows::decode(&raw) {
            Ok(rows) => Ok(Some(rows)),
            Err(e) => self.cache_error(e).map(|_| None),
        }
    }

    /// 逐行扫描并写入目标；`acc` 非空时同时收集原始行用于写缓存。
    async fn deliver<T: FromRow>(
        &self,
        ctx: &Context,
        rows: &mut dyn Rows,
        dest: &mut Destination<'_, T>,
        mut acc: Option<&mut CachedRows>,
    ) -> Result<()> {
        let plan = ScanPlan::new(
            rows.columns(),
            T::shape()?,
            self.shared.config.warn_unknown_columns,
        )?;
        if let Some(acc) = acc.as_deref_mut() {
            acc.columns = rows.columns().to_vec();
        }

        let mut delivered = 0usize;
        loop {
            let next = ctx.run(async { rows.next().await.map_err(Error::from) }).await?;
            let Some(values) = next else { break };
            if let Some(acc) = acc.as_deref_mut() {
                acc.rows.push(values.clone());
            }
            let row = T::from_row(plan.cells(values)?)?;
            delivered += 1;
            if dest.emit(ctx, row).await? == Flow::Stop {
                break;
            }
        }

        if delivered == 0 && dest.is_single() {
            return Err(Error::NoRows);
        }
        Ok(())
    }

    /// 是否至少返回一行。结果同样可缓存。
    pub(crate) async fn exists(
        &self,
        ctx: &Context,
        query: &str,
        ttl: Duration,
        params: &[Param],
    ) -> Result<bool> {
        let inter = self.interpolate(query, params)?;
        let started = Instant::now();
        let mut trace = Trace::default();
        let res = self.exists_inner(ctx, &inter, ttl, &mut trace).await;
        self.log(&inter, started, trace, res.as_ref().err());
        res.map_err(|e| self.wrap(e, query, &inter.query, &inter.params))
    }

    async fn exists_inner(
        &self,
        ctx: &Context,
        inter: &Interpolated,
        ttl: Duration,
        trace: &mut Trace,
    ) -> Result<bool> {
        let cache = self.shared.cache.clone().filter(|_| !ttl.is_zero());
        let key = exists_cache_key(&inter.query, ttl);
        if let Some(cache) = &cache
            && let Some(raw) = self.cache_get(cache.as_ref(), &key).await?
        {
            match rmp_serde::from_slice::<bool>(&raw) {
                Ok(found) => {
                    trace.cache_hit = true;
                    return Ok(found);
                }
                Err(e) => self.cache_error(CacheError::Codec(e.to_string()))?,
            }
        }

        let mut rows = self.query_rows(ctx, &inter.query, trace).await?;
        let found = ctx
            .run(async { rows.next().await.map_err(Error::from) })
            .await?
            .is_some();
        drop(rows);

        if let Some(cache) = &cache {
            match rmp_serde::to_vec(&found) {
                Ok(raw) => self.cache_set(cache.as_ref(), &key, raw, ttl).await?,
                Err(e) => self.cache_error(CacheError::Codec(e.to_string()))?,
            }
        }
        Ok(found)
    }

    pub(crate) async fn exec(&self, ctx: &Context, query: &str, params: &[Param]) -> Result<ExecResult> {
        let inter = self.interpolate(query, params)?;
        self.exec_interpolated(ctx, query, &inter).await
    }

    /// 执行已内联的语句（分块插入、上插探测）。
    pub(crate) async fn exec_interpolated(
        &self,
        ctx: &Context,
        query: &str,
        inter: &Interpolated,
    ) -> Result<ExecResult> {
        let started = Instant::now();
        let conn = self.conn;
        let (res, attempt) = retry(
            ctx,
            &self.shared.config,
            self.max_attempts(),
            conn.reconnect(),
            || conn.exec(ctx, &inter.query),
        )
        .await;
        let trace = Trace {
            attempt,
            cache_hit: false,
        };
        self.log(inter, started, trace, res.as_ref().err());
        res.map_err(|e| self.wrap(e, query, &inter.query, &inter.params))
    }

    /// 单条语句的字节预算：配置优先，否则向服务端查询一次并记住。
    pub(crate) async fn max_allowed_packet(&self, ctx: &Context) -> Result<usize> {
        if let Some(n) = self.shared.config.max_allowed_packet {
            return Ok(n);
        }
        self.shared
            .max_packet
            .get_or_try_init(|| async {
                let mut n: u64 = 0;
                self.select(
                    ctx,
                    Destination::one(&mut n),
                    "SELECT @@max_allowed_packet",
                    Duration::ZERO,
                    &[],
                )
                .await?;
                Ok::<usize, Error>(usize::try_from(n).unwrap_or(usize::MAX))
            })
            .await
            .copied()
    }
}
