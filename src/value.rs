//! SQL 值模型：参数与驱动返回值共用同一个封闭枚举。

use crate::valuer::{CustomValue, SqlValuer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use time::macros::{date, datetime};
use time::{Date, OffsetDateTime};

/// 时间零值，插值时输出 `null`。
pub const ZERO_TIME: OffsetDateTime = datetime!(0001-01-01 0:00 UTC);

/// 日期零值，插值时输出 `null`。
pub const ZERO_DATE: Date = date!(0001-01-01);

/// 内置参数 `@@MaxTime` 的取值。
pub const MAX_TIME: OffsetDateTime = datetime!(9999-12-31 23:59:59.999999 UTC);

/// SQL 值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(Cow<'static, str>),
    /// 原始 JSON 文本，按字符串编码。
    Json(String),
    Bytes(Vec<u8>),
    /// 时间戳（插值时统一转换成 UTC）。
    DateTime(OffsetDateTime),
    /// 不含时区的日历日期。
    Date(Date),
    Decimal(Decimal),
    /// 原样拼入 SQL 的片段。
    Raw(String),
    List(Vec<SqlValue>),
    #[serde(skip)]
    Valuer(Box<dyn SqlValuer>),
    #[serde(skip)]
    Custom(CustomValue),
}

impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::U64(a), Self::U64(b)) => a == b,
            (Self::F32(a), Self::F32(b)) => a == b,
            (Self::F64(a), Self::F64(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::Raw(a), Self::Raw(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Valuer(_), _) | (_, Self::Valuer(_)) => false,
            (Self::Custom(_), _) | (_, Self::Custom(_)) => false,
            _ => false,
        }
    }
}

impl SqlValue {
    /// 将 `Option<T>` 映射为 `SqlValue`：`None => Null`，`Some(v) => v.into()`。
    pub fn from_option<T: Into<SqlValue>>(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }

    /// 列表值：插值时展开为逗号分隔的字面量。
    pub fn list<T: Into<SqlValue>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// 原样拼入 SQL 的片段。
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw(sql.into())
    }

    /// 把任意可序列化的值编码成 JSON 文本。
    pub fn json<T: Serialize + ?Sized>(v: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::Json(serde_json::to_string(v)?))
    }

    /// 交给已注册 valuer 函数处理的自定义类型。
    pub fn custom<T: std::any::Any + Send + Sync>(v: T) -> Self {
        Self::Custom(CustomValue::new(v))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// 是否为该类型的零值（`defaultzero` / `omitempty` 判定依据）。
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(b) => !*b,
            Self::I64(n) => *n == 0,
            Self::U64(n) => *n == 0,
            // 按 bits 判断 0（-0.0 不是零值）
            Self::F32(n) => n.to_bits() == 0,
            Self::F64(n) => n.to_bits() == 0,
            Self::String(s) => s.is_empty(),
            Self::Json(s) => s.is_empty() || s == "null",
            Self::Bytes(b) => b.is_empty(),
            Self::DateTime(t) => *t == ZERO_TIME,
            Self::Date(d) => *d == ZERO_DATE,
            Self::Decimal(d) => d.is_zero(),
            Self::Raw(s) => s.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Valuer(_) => false,
            Self::Custom(c) => c.is_nil(),
        }
    }

    /// 变体名，用于错误信息。
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::I64(_) => "i64",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::String(_) => "string",
            Self::Json(_) => "json",
            Self::Bytes(_) => "bytes",
            Self::DateTime(_) => "datetime",
            Self::Date(_) => "date",
            Self::Decimal(_) => "decimal",
            Self::Raw(_) => "raw",
            Self::List(_) => "list",
            Self::Valuer(_) => "valuer",
            Self::Custom(c) => c.type_name(),
        }
    }
}

impl From<()> for SqlValue {
    fn from(_: ()) -> Self {
        Self::Null
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

macro_rules! from_signed {
    ($($t:ty),+ $(,)?) => {
        $(impl From<$t> for SqlValue {
            fn from(v: $t) -> Self {
                Self::I64(v as i64)
            }
        })+
    };
}

macro_rules! from_unsigned {
    ($($t:ty),+ $(,)?) => {
        $(impl From<$t> for SqlValue {
            fn from(v: $t) -> Self {
                Self::U64(v as u64)
            }
        })+
    };
}

from_signed!(i8, i16, i32, i64, isize);
from_unsigned!(u8, u16, u32, u64, usize);

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::String(Cow::Owned(v))
    }
}

impl From<&'static str> for SqlValue {
    fn from(v: &'static str) -> Self {
        Self::String(Cow::Borrowed(v))
    }
}

impl From<Cow<'static, str>> for SqlValue {
    fn from(v: Cow<'static, str>) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<OffsetDateTime> for SqlValue {
    fn from(v: OffsetDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<Date> for SqlValue {
    fn from(v: Date) -> Self {
        Self::Date(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v.to_string())
    }
}

impl From<Box<dyn SqlValuer>> for SqlValue {
    fn from(v: Box<dyn SqlValuer>) -> Self {
        Self::Valuer(v)
    }
}

impl From<CustomValue> for SqlValue {
    fn from(v: CustomValue) -> Self {
        Self::Custom(v)
    }
}

macro_rules! from_vec {
    ($($t:ty),+ $(,)?) => {
        $(impl From<Vec<$t>> for SqlValue {
            fn from(v: Vec<$t>) -> Self {
                Self::list(v)
            }
        })+
    };
}

// `Vec<u8>` 是二进制，不在此列
from_vec!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    &'static str,
    OffsetDateTime,
    Date,
    Decimal,
    SqlValue,
);

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        Self::from_option(v)
    }
}
