//! 上插：逐行探测，探测未命中的行经有界通道交给批量插入器。
//!
//! 探测有两种：给了更新列时执行 `update ... where 唯一列<=>值`，影响行数大于 0 即视为已处理；
//! 否则执行 `select 0 ... where ...`，已存在即跳过。
//! 生产者与消费者并发执行，任一方出错都会取消共享的子上下文。

use crate::context::Context;
use crate::dispatch::Session;
use crate::driver::ExecResult;
use crate::error::{Error, Result};
use crate::insert::{InsertCell, InsertRow, Inserter, Source, find_cell, quote_ident};
use crate::params::{Param, ParamMeta, ParamMetas, Params};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

/// 一行的探测语句。
#[derive(Debug, Clone, Copy)]
pub(crate) struct Probe<'a> {
    pub(crate) table: &'a str,
    pub(crate) unique: &'a [&'a str],
    pub(crate) update: &'a [&'a str],
    pub(crate) where_: &'a str,
}

impl Probe<'_> {
    /// 生成探测语句与参数。
    pub(crate) fn statement(&self, cells: &[InsertCell]) -> Result<(String, Param)> {
        if self.unique.is_empty() {
            return Err(Error::InvalidSource(
                "upsert needs at least one unique column".to_string(),
            ));
        }
        let mut values = Params::new();
        let mut meta = ParamMetas::new();
        // where 子句可直接引用行内各列
        for cell in cells {
            if let Some(column) = cell.column.as_deref() {
                if let Some(m) = cell_meta(cell, column) {
                    meta.insert(column.to_string(), m);
                }
                values.insert(column.to_string(), cell.value.clone());
            }
        }
        let mut bind = |column: &str, name: String| -> Result<String> {
            let cell = find_cell(cells, column).ok_or_else(|| {
                Error::InvalidSource(format!("upsert row has no column {column:?}"))
            })?;
            if let Some(m) = cell_meta(cell, column) {
                meta.insert(name.clone(), m);
            }
            values.insert(name.clone(), cell.value.clone());
            Ok(format!("@@{name}"))
        };

        let mut query = if self.update.is_empty() {
            format!("select 0 from {} where ", self.table)
        } else {
            let mut sets = Vec::with_capacity(self.update.len());
            for (i, col) in self.update.iter().enumerate() {
                sets.push(format!("{}={}", quote_ident(col), bind(col, format!("s{i}"))?));
            }
            format!("update {} set {} where ", self.table, sets.join(","))
        };

        for (i, col) in self.unique.iter().enumerate() {
            if i > 0 {
                query.push_str(" and ");
            }
            query.push_str(&quote_ident(col));
            query.push_str("<=>");
            query.push_str(&bind(col, format!("u{i}"))?);
        }
        if !self.where_.trim().is_empty() {
            query.push_str(" and (");
            query.push_str(self.where_);
            query.push(')');
        }
        Ok((query, Param::with_meta(values, meta)))
    }

    /// 该行是否已由探测处理（已更新或已存在）。
    async fn handled(&self, session: &Session<'_>, ctx: &Context, cells: &[InsertCell]) -> Result<bool> {
        let (query, param) = self.statement(cells)?;
        if self.update.is_empty() {
            session
                .exists(ctx, &query, Duration::ZERO, std::slice::from_ref(&param))
                .await
        } else {
            let res = session
                .exec(ctx, &query, std::slice::from_ref(&param))
                .await?;
            Ok(res.rows_affected > 0)
        }
    }
}

fn cell_meta(cell: &InsertCell, column: &str) -> Option<ParamMeta> {
    cell.options.default_on_zero().then(|| ParamMeta {
        default_on_zero: true,
        column: if cell.options.default_zero {
            column.to_string()
        } else {
            String::new()
        },
    })
}

async fn cancel_on_error<T>(ctx: &Context, fut: impl Future<Output = Result<T>>) -> Result<T> {
    let res = fut.await;
    if res.is_err() {
        ctx.cancel();
    }
    res
}

impl Inserter<'_> {
    /// 逐行探测后插入剩余行；返回插入部分的结果。
    pub async fn upsert<R: InsertRow>(
        &mut self,
        ctx: &Context,
        table: &str,
        unique: &[&str],
        update: &[&str],
        where_: &str,
        source: impl Into<Source<R>>,
    ) -> Result<ExecResult> {
        let mut source = source.into();
        let child = ctx.child();
        let (tx, rx) = mpsc::channel::<R>(1);
        let probe = Probe {
            table,
            unique,
            update,
            where_,
        };
        let session = self.session.clone();

        let producer = async {
            let tx = tx;
            while let Some(row) = source.next(&child).await? {
                let cells = row.insert_cells()?;
                if probe.handled(&session, &child, &cells).await? {
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = child.done() => return Err(child.err().unwrap_or(Error::Cancelled)),
                    sent = tx.send(row) => sent.map_err(|_| Error::ChannelClosed)?,
                }
            }
            Ok::<(), Error>(())
        };
        let consumer = self.insert(&child, table, Source::Channel(rx));

        let ((), total) = tokio::try_join!(
            cancel_on_error(&child, producer),
            cancel_on_error(&child, consumer)
        )?;
        Ok(total)
    }
}
