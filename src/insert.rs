//! 批量插入：从第一行推导列，逐行编码成 `(...)`，按服务端包大小分块执行。
//!
//! 分块规则：缓冲区超过预算的 80% 且已有不止一行时，先去掉刚追加的行，
//! 执行已有内容，再用语句头重新开始并放回这一行。单行超限时照样发送，由服务端决定。

use crate::context::Context;
use crate::dispatch::Session;
use crate::driver::ExecResult;
use crate::error::{Error, Result};
use crate::interpolate::Interpolated;
use crate::marshal::{MarshalError, MarshalOpts, marshal_into};
use crate::params::Params;
use crate::scan::{MapRow, SliceRow};
use crate::structs::{FieldOptions, SqlRow};
use crate::tokenizer::{TokenKind, tokenize};
use crate::value::SqlValue;
use crate::valuer::ValuerFuncs;
use std::sync::Arc;
use tokio::sync::mpsc;

/// 一行中的一个单元格。
#[derive(Debug, Clone, PartialEq)]
pub struct InsertCell {
    /// 列名；按位置插入的行为 `None`。
    pub column: Option<String>,
    pub value: SqlValue,
    pub options: FieldOptions,
}

impl InsertCell {
    pub fn named(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            column: Some(column.into()),
            value: value.into(),
            options: FieldOptions::default(),
        }
    }

    pub fn positional(value: impl Into<SqlValue>) -> Self {
        Self {
            column: None,
            value: value.into(),
            options: FieldOptions::default(),
        }
    }
}

/// 可以作为插入源的一行。`sql_row!` 结构体、`MapRow`、`SliceRow` 与 map/vec 都已实现。
pub trait InsertRow: Send {
    fn insert_cells(&self) -> Result<Vec<InsertCell>>;
}

/// `sql_row!` 生成的实现：跳过 `-` 字段，带上 tag 选项。
pub fn struct_cells<T: SqlRow>(row: &T) -> Result<Vec<InsertCell>> {
    let fields = T::fields()?;
    let values = row.values()?;
    Ok(fields
        .iter()
        .zip(values)
        .filter(|(f, _)| !f.is_skipped())
        .map(|(f, value)| InsertCell {
            column: Some(f.column.clone()),
            value,
            options: f.options,
        })
        .collect())
}

impl InsertRow for Params {
    fn insert_cells(&self) -> Result<Vec<InsertCell>> {
        Ok(self
            .iter()
            .map(|(k, v)| InsertCell::named(k.clone(), v.clone()))
            .collect())
    }
}

impl InsertRow for MapRow {
    fn insert_cells(&self) -> Result<Vec<InsertCell>> {
        self.0.insert_cells()
    }
}

impl InsertRow for Vec<SqlValue> {
    fn insert_cells(&self) -> Result<Vec<InsertCell>> {
        Ok(self.iter().cloned().map(InsertCell::positional).collect())
    }
}

impl InsertRow for SliceRow {
    fn insert_cells(&self) -> Result<Vec<InsertCell>> {
        self.0.insert_cells()
    }
}

/// 插入源。
pub enum Source<R> {
    One(Option<R>),
    Vec(std::vec::IntoIter<R>),
    Iter(Box<dyn Iterator<Item = R> + Send>),
    /// 通道关闭即结束。
    Channel(mpsc::Receiver<R>),
}

impl<R: Send> Source<R> {
    pub fn one(row: R) -> Self {
        Self::One(Some(row))
    }

    pub fn iter<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        I::IntoIter: Send + 'static,
    {
        Self::Iter(Box::new(rows.into_iter()))
    }

    pub(crate) async fn next(&mut self, ctx: &Context) -> Result<Option<R>> {
        match self {
            Self::One(row) => Ok(row.take()),
            Self::Vec(rows) => Ok(rows.next()),
            Self::Iter(rows) => Ok(rows.next()),
            Self::Channel(rx) => ctx.run(async { Ok(rx.recv().await) }).await,
        }
    }
}

impl<R> From<Vec<R>> for Source<R> {
    fn from(rows: Vec<R>) -> Self {
        Self::Vec(rows.into_iter())
    }
}

impl<R> From<mpsc::Receiver<R>> for Source<R> {
    fn from(rx: mpsc::Receiver<R>) -> Self {
        Self::Channel(rx)
    }
}

/// 解析后的插入目标。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InsertTarget {
    /// `insert into t` 或调用方写好的 `insert into t(a,b)`，不含 `values`。
    pub(crate) head: String,
    /// 调用方在语句里写明的列。
    pub(crate) columns: Option<Vec<String>>,
}

/// 表名（可带库名）或 `insert`/`replace` 语句头。
pub(crate) fn parse_insert_target(target: &str) -> InsertTarget {
    let target = target.trim();
    let tokens = tokenize(target);
    let is_statement = tokens
        .iter()
        .find(|t| t.kind == TokenKind::Word)
        .is_some_and(|t| {
            t.text.eq_ignore_ascii_case("insert") || t.text.eq_ignore_ascii_case("replace")
        });
    if !is_statement {
        return InsertTarget {
            head: format!("insert into{}", quote_table(target)),
            columns: None,
        };
    }

    if let Some(open) = tokens
        .iter()
        .position(|t| t.kind == TokenKind::Paren && t.text == "(")
    {
        let close = tokens[open..]
            .iter()
            .position(|t| t.kind == TokenKind::Paren && t.text == ")")
            .map(|i| open + i);
        let inner = &tokens[open + 1..close.unwrap_or(tokens.len())];
        let columns = inner
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Word | TokenKind::String))
            .map(|t| unquote(t.text))
            .collect();
        let end = close.map_or(target.len(), |i| tokens[i].end);
        return InsertTarget {
            head: target[..end].to_string(),
            columns: Some(columns),
        };
    }

    let mut head = target;
    if let Some(last) = tokens.iter().rev().find(|t| t.kind == TokenKind::Word)
        && last.text.eq_ignore_ascii_case("values")
        && target[last.end..].trim().is_empty()
    {
        head = target[..last.start].trim_end();
    }
    InsertTarget {
        head: head.to_string(),
        columns: None,
    }
}

/// `db.people` -> `` `db`.`people` ``；已带反引号的原样返回。
fn quote_table(table: &str) -> String {
    if table.contains('`') {
        return table.to_string();
    }
    table
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn unquote(s: &str) -> String {
    let b = s.as_bytes();
    if b.len() >= 2 && matches!(b[0], b'`' | b'"' | b'\'') && b[b.len() - 1] == b[0] {
        let q = &s[..1];
        return s[1..s.len() - 1].replace(&format!("{q}{q}"), q);
    }
    s.to_string()
}

/// 行的列布局，由目标与第一行决定。
#[derive(Debug, Clone, PartialEq, Eq)]
enum Layout {
    /// 按列名取值；`explicit` 表示列名来自调用方的语句。
    Named { columns: Vec<String>, explicit: bool },
    Positional(usize),
}

impl Layout {
    fn new(target: &InsertTarget, first: &[InsertCell]) -> Result<Self> {
        let named = first.iter().any(|c| c.column.is_some());
        let layout = match (&target.columns, named) {
            (Some(columns), true) => Self::Named {
                columns: columns.clone(),
                explicit: true,
            },
            (Some(columns), false) => Self::Positional(columns.len()),
            (None, true) => Self::Named {
                columns: first.iter().filter_map(|c| c.column.clone()).collect(),
                explicit: false,
            },
            (None, false) => Self::Positional(first.len()),
        };
        match &layout {
            Self::Named { columns, .. } if columns.is_empty() => Err(Error::NoColumns),
            Self::Positional(0) => Err(Error::NoColumns),
            _ => Ok(layout),
        }
    }

    /// 完整的语句头，以 `values` 结尾。
    fn header(&self, head: &str) -> String {
        match self {
            Self::Named {
                columns,
                explicit: false,
            } => {
                let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
                format!("{head}({})values", cols.join(","))
            }
            Self::Named { explicit: true, .. } => format!("{head}values"),
            Self::Positional(_) => {
                if head.ends_with(')') || head.ends_with('`') {
                    format!("{head}values")
                } else {
                    format!("{head} values")
                }
            }
        }
    }

    fn push_tuple(
        &self,
        out: &mut String,
        cells: &[InsertCell],
        valuers: &ValuerFuncs,
    ) -> Result<(), MarshalError> {
        out.push('(');
        match self {
            Self::Named { columns, .. } => {
                for (i, col) in columns.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    match find_cell(cells, col) {
                        Some(cell) => push_cell(out, cell, col, valuers)?,
                        None => out.push_str("default"),
                    }
                }
            }
            Self::Positional(n) => {
                for i in 0..*n {
                    if i > 0 {
                        out.push(',');
                    }
                    match cells.get(i) {
                        Some(cell) => push_cell(out, cell, "", valuers)?,
                        None => out.push_str("default"),
                    }
                }
            }
        }
        out.push(')');
        Ok(())
    }
}

/// 先精确匹配，再忽略大小写。
pub(crate) fn find_cell<'c>(cells: &'c [InsertCell], column: &str) -> Option<&'c InsertCell> {
    cells
        .iter()
        .find(|c| c.column.as_deref() == Some(column))
        .or_else(|| {
            cells.iter().find(|c| {
                c.column
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(column))
            })
        })
}

fn push_cell(
    out: &mut String,
    cell: &InsertCell,
    column: &str,
    valuers: &ValuerFuncs,
) -> Result<(), MarshalError> {
    let mut opts = MarshalOpts::JSON_SLICE;
    if cell.options.default_on_zero() {
        opts = opts | MarshalOpts::DEFAULT_ON_ZERO;
    }
    let field = if cell.options.default_zero { column } else { "" };
    marshal_into(out, &cell.value, opts, field, valuers)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkState {
    /// 只有语句头。
    Empty,
    HasRows,
    /// 刚执行过一块，缓冲区回到语句头。
    Flushed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub(crate) sql: String,
    pub(crate) rows: usize,
}

/// 按字节预算切块的语句缓冲区。
#[derive(Debug)]
pub(crate) struct Chunker {
    header: String,
    limit: usize,
    buf: String,
    rows: usize,
    flushed: usize,
}

impl Chunker {
    pub(crate) fn new(header: String, budget: usize) -> Self {
        Self {
            buf: header.clone(),
            header,
            limit: budget.saturating_mul(4) / 5,
            rows: 0,
            flushed: 0,
        }
    }

    pub(crate) fn state(&self) -> ChunkState {
        match (self.rows, self.flushed) {
            (0, 0) => ChunkState::Empty,
            (0, _) => ChunkState::Flushed,
            _ => ChunkState::HasRows,
        }
    }

    /// 追加一行；需要先执行一块时返回它。
    pub(crate) fn push(&mut self, tuple: &str) -> Option<Chunk> {
        let mark = self.buf.len();
        if self.state() == ChunkState::HasRows {
            self.buf.push(',');
        }
        self.buf.push_str(tuple);
        self.rows += 1;
        if self.buf.len() <= self.limit || self.rows == 1 {
            return None;
        }

        self.buf.truncate(mark);
        let chunk = self.take(self.rows - 1);
        self.buf.push_str(tuple);
        self.rows = 1;
        Some(chunk)
    }

    /// 取出剩余的行。
    pub(crate) fn finish(&mut self) -> Option<Chunk> {
        (self.state() == ChunkState::HasRows).then(|| self.take(self.rows))
    }

    fn take(&mut self, rows: usize) -> Chunk {
        let sql = std::mem::replace(&mut self.buf, self.header.clone());
        self.rows = 0;
        self.flushed += 1;
        Chunk { sql, rows }
    }
}

/// 行级钩子参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowInfo {
    /// 从 0 开始的行序号。
    pub index: usize,
}

/// 块级钩子参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub index: usize,
    pub rows: usize,
    pub bytes: usize,
}

type RowHook<'a> = Box<dyn FnMut(RowInfo) + Send + 'a>;
type ChunkHook<'a> = Box<dyn FnMut(ChunkInfo) + Send + 'a>;
type AfterChunkHook<'a> = Box<dyn FnMut(ChunkInfo, ExecResult) + Send + 'a>;

/// 批量插入器，可挂进度钩子。
pub struct Inserter<'a> {
    pub(crate) session: Session<'a>,
    on_row: Option<RowHook<'a>>,
    before_chunk: Option<ChunkHook<'a>>,
    after_chunk: Option<AfterChunkHook<'a>>,
    chunks: usize,
}

impl<'a> Inserter<'a> {
    pub(crate) fn new(session: Session<'a>) -> Self {
        Self {
            session,
            on_row: None,
            before_chunk: None,
            after_chunk: None,
            chunks: 0,
        }
    }

    /// 每编码一行调用一次。
    pub fn on_row(mut self, f: impl FnMut(RowInfo) + Send + 'a) -> Self {
        self.on_row = Some(Box::new(f));
        self
    }

    pub fn before_chunk(mut self, f: impl FnMut(ChunkInfo) + Send + 'a) -> Self {
        self.before_chunk = Some(Box::new(f));
        self
    }

    pub fn after_chunk(mut self, f: impl FnMut(ChunkInfo, ExecResult) + Send + 'a) -> Self {
        self.after_chunk = Some(Box::new(f));
        self
    }

    /// 插入 `source` 的所有行，返回各块结果之和。空源不执行任何语句。
    pub async fn insert<R: InsertRow>(
        &mut self,
        ctx: &Context,
        target: &str,
        source: impl Into<Source<R>>,
    ) -> Result<ExecResult> {
        let mut source = source.into();
        let mut total = ExecResult::default();
        let Some(first) = source.next(ctx).await? else {
            return Ok(total);
        };
        let first = first.insert_cells()?;

        let target = parse_insert_target(target);
        let layout = Layout::new(&target, &first)?;
        let budget = self.session.max_allowed_packet(ctx).await?;
        let mut chunker = Chunker::new(layout.header(&target.head), budget);
        let shared = Arc::clone(&self.session.shared);

        let mut tuple = String::new();
        let mut pending = Some(first);
        let mut index = 0usize;
        loop {
            let cells = match pending.take() {
                Some(cells) => cells,
                None => match source.next(ctx).await? {
                    Some(row) => row.insert_cells()?,
                    None => break,
                },
            };
            tuple.clear();
            layout.push_tuple(&mut tuple, &cells, &shared.valuers)?;
            if let Some(hook) = self.on_row.as_mut() {
                hook(RowInfo { index });
            }
            index += 1;
            if let Some(chunk) = chunker.push(&tuple) {
                self.flush(ctx, chunk, &mut total).await?;
            }
        }
        if let Some(chunk) = chunker.finish() {
            self.flush(ctx, chunk, &mut total).await?;
        }
        Ok(total)
    }

    async fn flush(&mut self, ctx: &Context, chunk: Chunk, total: &mut ExecResult) -> Result<()> {
        let info = ChunkInfo {
            index: self.chunks,
            rows: chunk.rows,
            bytes: chunk.sql.len(),
        };
        self.chunks += 1;
        if let Some(hook) = self.before_chunk.as_mut() {
            hook(info);
        }
        tracing::debug!(chunk = info.index, rows = info.rows, bytes = info.bytes, "insert chunk");
        let inter = Interpolated {
            query: chunk.sql,
            params: Params::new(),
        };
        let res = self
            .session
            .exec_interpolated(ctx, &inter.query, &inter)
            .await?;
        if let Some(hook) = self.after_chunk.as_mut() {
            hook(info, res);
        }
        total.merge(res);
        Ok(())
    }
}
