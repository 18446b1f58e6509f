//! 错误类型：按成因分类，面向调用方的错误统一带上查询诊断信息。

use crate::cache::CacheError;
use crate::driver::DriverError;
use crate::marshal::MarshalError;
use crate::params::Params;
use crate::scan::ScanError;
use crate::structs::TagError;
use crate::template::TemplateError;
use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 单值目标没有收到任何行。
    #[error("no rows in result set")]
    NoRows,
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Tag(#[from] TagError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    #[error("destination channel closed")]
    ChannelClosed,
    #[error("source must be a struct, slice of structs, or channel of structs: {0}")]
    InvalidSource(String),
    #[error("no column names could be derived")]
    NoColumns,
    #[error("database handle has been dropped")]
    DatabaseClosed,
    #[error("transaction already finished")]
    TxDone,
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Query(Box<QueryError>),
}

impl Error {
    /// 是否为 "no rows"（穿透诊断包装）。
    pub fn is_no_rows(&self) -> bool {
        match self {
            Self::NoRows => true,
            Self::Query(q) => q.source.is_no_rows(),
            _ => false,
        }
    }

    /// 是否由取消或超时引起。
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled | Self::DeadlineExceeded => true,
            Self::Driver(DriverError::Cancelled) => true,
            Self::Query(q) => q.source.is_cancelled(),
            _ => false,
        }
    }

    /// 底层驱动错误（穿透诊断包装）。
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Driver(e) => Some(e),
            Self::Query(q) => q.source.driver_error(),
            _ => None,
        }
    }

    /// 诊断包装内的查询信息。
    pub fn query_error(&self) -> Option<&QueryError> {
        match self {
            Self::Query(q) => Some(q),
            _ => None,
        }
    }
}

/// 诊断包装：原始查询、截断后的内联查询、归一化参数和底层错误。
#[derive(Debug)]
pub struct QueryError {
    pub query: String,
    pub inlined: String,
    pub params: Params,
    pub source: Error,
}

impl QueryError {
    /// 包装错误；`NoRows` 与已包装的错误原样返回。
    pub fn wrap(err: Error, query: &str, inlined: &str, params: &Params, max_len: usize) -> Error {
        match err {
            Error::NoRows | Error::Query(_) => err,
            source => Error::Query(Box::new(QueryError {
                query: query.to_string(),
                inlined: truncate_query(inlined, max_len),
                params: params.clone(),
                source,
            })),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n  query: {}", self.source, self.inlined)?;
        if !self.params.is_empty() {
            write!(f, "\n  params: {:?}", self.params)?;
        }
        Ok(())
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// 超过 `max_len` 字节时保留首尾，中间替换为 `/* N characters hidden */`。
pub fn truncate_query(query: &str, max_len: usize) -> String {
    if max_len == 0 || query.len() <= max_len {
        return query.to_string();
    }
    let head = floor_char_boundary(query, max_len / 2);
    let tail = ceil_char_boundary(query, query.len() - (max_len - max_len / 2));
    let hidden = query[head..tail].chars().count();
    format!(
        "{}/* {hidden} characters hidden */{}",
        &query[..head],
        &query[tail..]
    )
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
