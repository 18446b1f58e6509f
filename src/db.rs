//! 数据库句柄：读写两个驱动、配置、缓存与各类注册表。

use crate::cache::{Cache, CacheErrorHandler, surface_cache_errors};
use crate::config::Config;
use crate::context::Context;
use crate::dispatch::{Conn, Destination, Session};
use crate::driver::{Driver, ExecResult};
use crate::error::{Error, Result};
use crate::insert::{InsertRow, Inserter, Source};
use crate::interpolate::Interpolated;
use crate::logging::{QueryLogger, TracingQueryLogger};
use crate::params::Param;
use crate::scan::FromRow;
use crate::sqlwriter::SqlFileWriter;
use crate::template::TemplateFuncs;
use crate::tx::Tx;
use crate::valuer::ValuerFuncs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// 离线写文件时的默认单语句预算。
pub const FILE_WRITER_PACKET: usize = 4 << 20;

/// 数据库句柄与事务共享的状态；事务只持有它的弱引用。
pub(crate) struct Shared {
    pub(crate) writes: Arc<dyn Driver>,
    pub(crate) reads: Arc<dyn Driver>,
    pub(crate) config: Config,
    pub(crate) valuers: ValuerFuncs,
    pub(crate) template_funcs: TemplateFuncs,
    pub(crate) cache: Option<Arc<dyn Cache>>,
    pub(crate) cache_error_handler: CacheErrorHandler,
    pub(crate) logger: Arc<dyn QueryLogger>,
    pub(crate) max_packet: OnceCell<usize>,
}

/// 构造 `Database`。
pub struct DatabaseBuilder {
    writes: Arc<dyn Driver>,
    reads: Arc<dyn Driver>,
    config: Config,
    valuers: ValuerFuncs,
    template_funcs: TemplateFuncs,
    cache: Option<Arc<dyn Cache>>,
    cache_error_handler: CacheErrorHandler,
    logger: Option<Arc<dyn QueryLogger>>,
}

impl DatabaseBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache_error_handler(mut self, handler: CacheErrorHandler) -> Self {
        self.cache_error_handler = handler;
        self
    }

    pub fn valuers(mut self, valuers: ValuerFuncs) -> Self {
        self.valuers = valuers;
        self
    }

    pub fn template_funcs(mut self, funcs: TemplateFuncs) -> Self {
        self.template_funcs = funcs;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn QueryLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Database {
        let logger = self.logger.unwrap_or_else(|| {
            Arc::new(TracingQueryLogger {
                max_query_length: self.config.max_query_log_length,
            })
        });
        Database {
            shared: Arc::new(Shared {
                writes: self.writes,
                reads: self.reads,
                config: self.config,
                valuers: self.valuers,
                template_funcs: self.template_funcs,
                cache: self.cache,
                cache_error_handler: self.cache_error_handler,
                logger,
                max_packet: OnceCell::new(),
            }),
        }
    }
}

/// 数据库句柄；克隆代价很低，可在任务间共享。
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.shared.config)
            .field("cached", &self.shared.cache.is_some())
            .finish()
    }
}

impl Database {
    /// 读写分离：写语句走 `writes`，读查询走 `reads`。
    pub fn builder(writes: Arc<dyn Driver>, reads: Arc<dyn Driver>) -> DatabaseBuilder {
        DatabaseBuilder {
            writes,
            reads,
            config: Config::from_env(),
            valuers: ValuerFuncs::new(),
            template_funcs: TemplateFuncs::new(),
            cache: None,
            cache_error_handler: surface_cache_errors(),
            logger: None,
        }
    }

    /// 读写共用同一个驱动。
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::builder(Arc::clone(&driver), driver).build()
    }

    /// 所有写语句落到 `dir` 下的 gzip 文件，读查询一律报错。
    pub fn file_writer(dir: impl AsRef<Path>) -> Result<Self> {
        let writer: Arc<dyn Driver> = Arc::new(SqlFileWriter::new(dir)?);
        let mut config = Config::from_env();
        config.max_allowed_packet.get_or_insert(FILE_WRITER_PACKET);
        Ok(Self::builder(Arc::clone(&writer), writer).config(config).build())
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    fn session(&self, writes: bool) -> Session<'_> {
        let driver = if writes {
            self.shared.writes.as_ref()
        } else {
            self.shared.reads.as_ref()
        };
        Session::new(Arc::clone(&self.shared), Conn::Pool(driver), false)
    }

    /// 展开模板并内联参数，不执行。
    pub fn interpolate(&self, query: &str, params: &[Param]) -> Result<Interpolated> {
        self.session(false).interpolate(query, params)
    }

    /// 在读库上查询，结果写入 `dest`；`ttl` 非零且配置了缓存时走缓存。
    pub async fn select<T: FromRow>(
        &self,
        ctx: &Context,
        dest: Destination<'_, T>,
        query: &str,
        ttl: Duration,
        params: &[Param],
    ) -> Result<()> {
        self.session(false)
            .select(ctx, dest, query, ttl, params)
            .await
    }

    /// 同 `select`，但在写库上查询（读自己刚写入的数据）。
    pub async fn select_writes<T: FromRow>(
        &self,
        ctx: &Context,
        dest: Destination<'_, T>,
        query: &str,
        ttl: Duration,
        params: &[Param],
    ) -> Result<()> {
        self.session(true)
            .select(ctx, dest, query, ttl, params)
            .await
    }

    /// 取第一行；没有行返回 `Error::NoRows`。
    pub async fn select_one<T: FromRow>(
        &self,
        ctx: &Context,
        query: &str,
        ttl: Duration,
        params: &[Param],
    ) -> Result<T> {
        let mut slot = None;
        self.select(ctx, Destination::Slot(&mut slot), query, ttl, params)
            .await?;
        slot.ok_or(Error::NoRows)
    }

    pub async fn select_all<T: FromRow>(
        &self,
        ctx: &Context,
        query: &str,
        ttl: Duration,
        params: &[Param],
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();
        self.select(ctx, Destination::slice(&mut out), query, ttl, params)
            .await?;
        Ok(out)
    }

    pub async fn exists(
        &self,
        ctx: &Context,
        query: &str,
        ttl: Duration,
        params: &[Param],
    ) -> Result<bool> {
        self.session(false).exists(ctx, query, ttl, params).await
    }

    pub async fn exists_writes(
        &self,
        ctx: &Context,
        query: &str,
        ttl: Duration,
        params: &[Param],
    ) -> Result<bool> {
        self.session(true).exists(ctx, query, ttl, params).await
    }

    pub async fn exec(&self, ctx: &Context, query: &str, params: &[Param]) -> Result<ExecResult> {
        self.session(true).exec(ctx, query, params).await
    }

    /// 带钩子的批量插入器。
    pub fn inserter(&self) -> Inserter<'_> {
        Inserter::new(self.session(true))
    }

    /// 批量插入；`target` 是表名或 `insert into t(...)` 语句头。
    pub async fn insert<R: InsertRow>(
        &self,
        ctx: &Context,
        target: &str,
        source: impl Into<Source<R>>,
    ) -> Result<ExecResult> {
        self.inserter().insert(ctx, target, source).await
    }

    /// 先按唯一列探测（更新或存在性检查），探测未命中的行再批量插入。
    pub async fn upsert<R: InsertRow>(
        &self,
        ctx: &Context,
        table: &str,
        unique: &[&str],
        update: &[&str],
        where_: &str,
        source: impl Into<Source<R>>,
    ) -> Result<ExecResult> {
        self.inserter()
            .upsert(ctx, table, unique, update, where_, source)
            .await
    }

    /// 在写库上开启事务。
    pub async fn begin(&self, ctx: &Context) -> Result<Tx> {
        let tx = self.shared.writes.begin(ctx).await?;
        Ok(Tx::new(Arc::downgrade(&self.shared), tx))
    }

    pub async fn max_allowed_packet(&self, ctx: &Context) -> Result<usize> {
        self.session(true).max_allowed_packet(ctx).await
    }
}
