//! 事务：持有驱动事务，弱引用数据库共享状态。
//!
//! 未提交也未回滚就被 drop 的事务会在后台回滚并告警。

use crate::context::Context;
use crate::db::Shared;
use crate::dispatch::{Conn, Destination, Session};
use crate::driver::{DriverTx, ExecResult};
use crate::error::{Error, Result};
use crate::insert::{InsertRow, Inserter, Source};
use crate::params::Param;
use crate::scan::FromRow;
use std::sync::{Arc, Weak};
use std::time::Duration;

pub struct Tx {
    shared: Weak<Shared>,
    tx: Option<Box<dyn DriverTx>>,
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("done", &self.tx.is_none())
            .finish()
    }
}

impl Tx {
    pub(crate) fn new(shared: Weak<Shared>, tx: Box<dyn DriverTx>) -> Self {
        Self {
            shared,
            tx: Some(tx),
        }
    }

    fn session(&self) -> Result<Session<'_>> {
        let shared: Arc<Shared> = self.shared.upgrade().ok_or(Error::DatabaseClosed)?;
        let tx = self.tx.as_deref().ok_or(Error::TxDone)?;
        Ok(Session::new(shared, Conn::Tx(tx), true))
    }

    pub async fn select<T: FromRow>(
        &self,
        ctx: &Context,
        dest: Destination<'_, T>,
        query: &str,
        params: &[Param],
    ) -> Result<()> {
        // 事务内读到的可能是未提交数据，不走缓存
        self.session()?
            .select(ctx, dest, query, Duration::ZERO, params)
            .await
    }

    pub async fn select_one<T: FromRow>(
        &self,
        ctx: &Context,
        query: &str,
        params: &[Param],
    ) -> Result<T> {
        let mut slot = None;
        self.select(ctx, Destination::Slot(&mut slot), query, params)
            .await?;
        slot.ok_or(Error::NoRows)
    }

    pub async fn exists(&self, ctx: &Context, query: &str, params: &[Param]) -> Result<bool> {
        self.session()?
            .exists(ctx, query, Duration::ZERO, params)
            .await
    }

    pub async fn exec(&self, ctx: &Context, query: &str, params: &[Param]) -> Result<ExecResult> {
        self.session()?.exec(ctx, query, params).await
    }

    pub fn inserter(&self) -> Result<Inserter<'_>> {
        Ok(Inserter::new(self.session()?))
    }

    pub async fn insert<R: InsertRow>(
        &self,
        ctx: &Context,
        target: &str,
        source: impl Into<Source<R>>,
    ) -> Result<ExecResult> {
        self.inserter()?.insert(ctx, target, source).await
    }

    pub async fn upsert<R: InsertRow>(
        &self,
        ctx: &Context,
        table: &str,
        unique: &[&str],
        update: &[&str],
        where_: &str,
        source: impl Into<Source<R>>,
    ) -> Result<ExecResult> {
        self.inserter()?
            .upsert(ctx, table, unique, update, where_, source)
            .await
    }

    pub async fn commit(mut self, ctx: &Context) -> Result<()> {
        let tx = self.tx.take().ok_or(Error::TxDone)?;
        tx.commit(ctx).await.map_err(Error::from)
    }

    pub async fn rollback(mut self, ctx: &Context) -> Result<()> {
        let tx = self.tx.take().ok_or(Error::TxDone)?;
        tx.rollback(ctx).await.map_err(Error::from)
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else { return };
        tracing::warn!("transaction dropped without commit or rollback; rolling back");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = tx.rollback(&Context::background()).await {
                        tracing::error!(error = %err, "rollback of dropped transaction failed");
                    }
                });
            }
            Err(_) => tracing::error!("no async runtime; dropped transaction was not rolled back"),
        }
    }
}
