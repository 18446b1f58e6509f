//! 查询参数：调用方传入的每个参数先归一化成 `名称 -> 值` 的映射，再交给插值。
//!
//! 归一化规则：
//! - 单个值（含列表）：`{首个参数名: 值}`
//! - 映射：原样复制
//! - `Param::indexed`：`{"0": a, "1": b, ...}`
//! - 结构体行：`{列名: 值}`，并带上 tag 选项导出的元数据

use crate::error::Result;
use crate::scan::{MapRow, SliceRow};
use crate::structs::SqlRow;
use crate::value::SqlValue;
use crate::valuer::{CustomValue, SqlValuer};
use rust_decimal::Decimal;
use std::borrow::Cow;
use std::collections::BTreeMap;
use time::{Date, OffsetDateTime};

/// 参数映射。
pub type Params = BTreeMap<String, SqlValue>;

/// 参数元数据（来自 struct tag）。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMeta {
    pub default_on_zero: bool,
    /// 非空时零值输出 `default(`column`)`，否则输出 `default`。
    pub column: String,
}

pub type ParamMetas = BTreeMap<String, ParamMeta>;

#[derive(Debug, Clone)]
pub enum Param {
    Value(SqlValue),
    Map(Params),
    Indexed(Vec<SqlValue>),
    Row { values: Params, meta: ParamMetas },
}

impl Param {
    /// 结构体行：以列名为键。
    pub fn row<T: SqlRow>(row: &T) -> Result<Self> {
        let fields = T::fields()?;
        let values = row.values()?;
        let mut map = Params::new();
        let mut meta = ParamMetas::new();
        for (f, v) in fields.iter().zip(values) {
            if f.is_skipped() {
                continue;
            }
            let m = f.param_meta();
            if m.default_on_zero {
                meta.insert(f.column.clone(), m);
            }
            map.insert(f.column.clone(), v);
        }
        Ok(Self::Row { values: map, meta })
    }

    /// 按下标命名：`@@0`、`@@1`……
    pub fn indexed<T: Into<SqlValue>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::Indexed(items.into_iter().map(Into::into).collect())
    }

    pub fn map<K: Into<String>, V: Into<SqlValue>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// 带元数据的映射（upsert 探测语句使用）。
    pub fn with_meta(values: Params, meta: ParamMetas) -> Self {
        Self::Row { values, meta }
    }

    /// 归一化成映射；`first` 为查询中第一个参数的名字。
    pub fn to_params(&self, first: &str) -> (Params, ParamMetas) {
        match self {
            Self::Value(v) => {
                let mut m = Params::new();
                m.insert(first.to_string(), v.clone());
                (m, ParamMetas::new())
            }
            Self::Map(m) => (m.clone(), ParamMetas::new()),
            Self::Indexed(items) => (
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v.clone()))
                    .collect(),
                ParamMetas::new(),
            ),
            Self::Row { values, meta } => (values.clone(), meta.clone()),
        }
    }
}

/// 构造 `Param::Map`：`params! { "id" => 1, "name" => "x" }`。
#[macro_export]
macro_rules! params {
    () => {
        $crate::params::Param::Map($crate::params::Params::new())
    };
    ( $( $k:expr => $v:expr ),+ $(,)? ) => {{
        let mut m = $crate::params::Params::new();
        $( m.insert(::std::string::String::from($k), $crate::value::SqlValue::from($v)); )+
        $crate::params::Param::Map(m)
    }};
}

impl From<Params> for Param {
    fn from(v: Params) -> Self {
        Self::Map(v)
    }
}

impl From<MapRow> for Param {
    fn from(v: MapRow) -> Self {
        Self::Map(v.into_inner())
    }
}

impl From<SliceRow> for Param {
    fn from(v: SliceRow) -> Self {
        Self::Indexed(v.into_inner())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        Self::Value(SqlValue::from_option(v))
    }
}

macro_rules! from_value {
    ($($t:ty),+ $(,)?) => {
        $(impl From<$t> for Param {
            fn from(v: $t) -> Self {
                Self::Value(v.into())
            }
        })+
    };
}

from_value!(
    SqlValue,
    (),
    bool,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    String,
    &'static str,
    Cow<'static, str>,
    Vec<u8>,
    OffsetDateTime,
    Date,
    Decimal,
    serde_json::Value,
    Box<dyn SqlValuer>,
    CustomValue,
    Vec<bool>,
    Vec<i8>,
    Vec<i16>,
    Vec<i32>,
    Vec<i64>,
    Vec<u16>,
    Vec<u32>,
    Vec<u64>,
    Vec<f32>,
    Vec<f64>,
    Vec<String>,
    Vec<&'static str>,
    Vec<OffsetDateTime>,
    Vec<Date>,
    Vec<Decimal>,
    Vec<SqlValue>,
);
