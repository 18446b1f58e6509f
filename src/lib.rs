//! halo-cool-mysql：MySQL 查询引擎。
//!
//! 负责把带 `@@name` 参数与 `{{ }}` 模板的查询内联成字面量 SQL，
//! 经可选的结果缓存与重试包装执行，再把结果行分发到单值、切片、通道或回调；
//! 另含按服务端包大小分块的批量插入与逐行探测的上插。

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod insert;
#[cfg(test)]
mod insert_tests;
pub mod interpolate;
#[cfg(test)]
mod interpolate_tests;
pub mod logging;
pub mod marshal;
#[cfg(test)]
mod marshal_tests;
#[cfg(test)]
mod mock;
pub mod params;
mod retry;
pub mod scan;
#[cfg(test)]
mod scan_tests;
pub mod sqlwriter;
pub mod structs;
pub mod template;
pub mod tokenizer;
pub mod tx;
pub mod upsert;
pub mod value;
pub mod valuer;

pub use crate::cache::{
    Cache, CacheError, CacheErrorHandler, CacheGuard, MemoryCache, MultiCache,
    ignore_cache_errors, surface_cache_errors,
};
pub use crate::config::Config;
pub use crate::context::Context;
pub use crate::db::{Database, DatabaseBuilder};
pub use crate::dispatch::Destination;
pub use crate::driver::{
    Driver, DriverError, DriverTx, ErrorClass, ExecResult, Queryer, Rows, VecRows,
};
pub use crate::error::{Error, QueryError, Result};
pub use crate::insert::{ChunkInfo, InsertCell, InsertRow, Inserter, RowInfo, Source};
pub use crate::interpolate::{Interpolated, interpolate};
pub use crate::logging::{LogDetail, QueryLogger, TracingQueryLogger};
pub use crate::marshal::{MarshalError, MarshalOpts, marshal};
pub use crate::params::{Param, ParamMeta, Params};
pub use crate::scan::{FromRow, FromSql, Json, MapRow, ScanError, SliceRow};
pub use crate::sqlwriter::SqlFileWriter;
pub use crate::structs::{FieldMeta, FieldOptions, SqlRow, TagError};
pub use crate::template::{TemplateError, TemplateFuncs};
pub use crate::tokenizer::{Token, TokenKind, tokenize};
pub use crate::tx::Tx;
pub use crate::value::SqlValue;
pub use crate::valuer::{CustomValue, SqlValuer, ValuerError, ValuerFuncs};

/// 便捷命名空间：`use cool_mysql::mysql::{...}`。
pub mod mysql {
    pub use crate::*;
}
