//! 驱动契约：底层 MySQL 客户端需要提供的最小能力，以及错误分类。

use crate::context::Context;
use crate::value::SqlValue;
use async_trait::async_trait;

/// 执行语句的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

impl ExecResult {
    /// 累加多次执行的结果（分块插入）。
    pub fn merge(&mut self, other: ExecResult) {
        self.rows_affected += other.rows_affected;
        if other.last_insert_id != 0 {
            self.last_insert_id = other.last_insert_id;
        }
    }
}

/// 结果集游标；drop 即释放。
#[async_trait]
pub trait Rows: Send {
    fn columns(&self) -> &[String];

    /// 下一行；结果集结束返回 `None`。
    async fn next(&mut self) -> Result<Option<Vec<SqlValue>>, DriverError>;
}

/// 内存中的结果集（缓存命中、测试与离线驱动使用）。
#[derive(Debug, Clone, Default)]
pub struct VecRows {
    columns: Vec<String>,
    rows: std::collections::VecDeque<Vec<SqlValue>>,
}

impl VecRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }
}

#[async_trait]
impl Rows for VecRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next(&mut self) -> Result<Option<Vec<SqlValue>>, DriverError> {
        Ok(self.rows.pop_front())
    }
}

#[async_trait]
pub trait Queryer: Send + Sync {
    async fn query(&self, ctx: &Context, query: &str) -> Result<Box<dyn Rows>, DriverError>;

    async fn exec(&self, ctx: &Context, query: &str) -> Result<ExecResult, DriverError>;
}

#[async_trait]
pub trait Driver: Queryer {
    async fn begin(&self, ctx: &Context) -> Result<Box<dyn DriverTx>, DriverError>;

    /// 重连探测：连接不可用时由重试包装调用。
    async fn ping(&self, ctx: &Context) -> Result<(), DriverError>;
}

#[async_trait]
pub trait DriverTx: Queryer {
    async fn commit(&self, ctx: &Context) -> Result<(), DriverError>;

    async fn rollback(&self, ctx: &Context) -> Result<(), DriverError>;
}

/// 驱动错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// 服务端错误号 + 消息。
    #[error("Error {code}: {message}")]
    Server { code: u16, message: String },
    /// 连接已失效，需要重新建立连接。
    #[error("driver: bad connection")]
    BadConnection,
    #[error("query canceled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// 错误成因分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 连接失效、服务端离线、连接数过多等。
    Transport,
    /// 死锁、锁等待超时。
    Concurrency,
    /// 唯一键冲突、表不存在等。
    Logical,
    BadConnection,
    Cancelled,
    Other,
}

pub mod codes {
    pub const CON_COUNT_ERROR: u16 = 1040;
    pub const BAD_DB_ERROR: u16 = 1049;
    pub const UNKNOWN_COM_ERROR: u16 = 1047;
    pub const SERVER_SHUTDOWN: u16 = 1053;
    pub const DUP_ENTRY: u16 = 1062;
    pub const NO_SUCH_TABLE: u16 = 1146;
    pub const LOCK_WAIT_TIMEOUT: u16 = 1205;
    pub const LOCK_DEADLOCK: u16 = 1213;
    pub const UNKNOWN_STMT_HANDLER: u16 = 1243;
    pub const ROW_IS_REFERENCED_2: u16 = 1451;
    pub const NO_REFERENCED_ROW_2: u16 = 1452;
    pub const PS_MANY_PARAM: u16 = 1390;
    pub const MAX_PREPARED_STMT_COUNT_REACHED: u16 = 1461;
    pub const BAD_NULL_ERROR: u16 = 1048;
    pub const CONNECTION_ERROR: u16 = 2002;
    pub const CONN_HOST_ERROR: u16 = 2003;
    pub const SERVER_GONE_ERROR: u16 = 2006;
    pub const SERVER_LOST: u16 = 2013;
}

impl DriverError {
    pub fn server(code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        use codes::*;
        match self {
            Self::Server { code, .. } => match *code {
                SERVER_GONE_ERROR | SERVER_LOST | CON_COUNT_ERROR | BAD_DB_ERROR
                | SERVER_SHUTDOWN | UNKNOWN_COM_ERROR | CONNECTION_ERROR | CONN_HOST_ERROR => {
                    ErrorClass::Transport
                }
                LOCK_DEADLOCK | LOCK_WAIT_TIMEOUT => ErrorClass::Concurrency,
                DUP_ENTRY | NO_SUCH_TABLE | MAX_PREPARED_STMT_COUNT_REACHED | PS_MANY_PARAM
                | UNKNOWN_STMT_HANDLER | ROW_IS_REFERENCED_2 | NO_REFERENCED_ROW_2
                | BAD_NULL_ERROR => ErrorClass::Logical,
                _ => ErrorClass::Other,
            },
            Self::BadConnection => ErrorClass::BadConnection,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Other(_) => ErrorClass::Other,
        }
    }

    /// 可重试：传输层、并发冲突与失效连接。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Transport | ErrorClass::Concurrency | ErrorClass::BadConnection
        )
    }
}
