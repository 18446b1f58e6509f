//! Scan：把驱动返回的一行值写入调用方的元素类型。
//!
//! - `FromSql`：单个驱动值 -> 目标类型（NULL 变成目标类型的零值，`Option<T>` 除外）
//! - `FromRow`：元素的形态（标量 / 结构体 / map 行 / slice 行）以及由一行单元格构造元素
//! - `ScanPlan`：每次查询按列名建立一次的列分发表

use crate::structs::{FieldKind, FieldMeta, SqlRow, TagError};
use crate::value::{SqlValue, ZERO_DATE, ZERO_TIME};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// 扫描/转换错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("cannot scan {from} into {to}")]
    Convert { from: &'static str, to: &'static str },
    #[error("cannot parse {value:?} as {to}")]
    Parse { to: &'static str, value: String },
    #[error("value out of range for {to}")]
    Overflow { to: &'static str },
    #[error("field {field}: {source}")]
    Field {
        field: &'static str,
        source: Box<ScanError>,
    },
    #[error("expected {expected} column(s), got {got}")]
    ColumnCount { expected: usize, got: usize },
    #[error("row does not match element shape {0}")]
    Shape(&'static str),
    #[error("json: {0}")]
    Json(String),
    #[error(transparent)]
    Tag(#[from] TagError),
}

/// 单个驱动值 -> 目标类型。
pub trait FromSql: Sized {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError>;

    /// NULL 对应的值（目标类型的零值）。
    fn from_null() -> Result<Self, ScanError>;

    fn from_opt(v: Option<SqlValue>) -> Result<Self, ScanError> {
        match v {
            None | Some(SqlValue::Null) => Self::from_null(),
            Some(v) => Self::from_sql(v),
        }
    }
}

fn text(v: &SqlValue) -> Option<&str> {
    match v {
        SqlValue::String(s) => Some(s),
        SqlValue::Json(s) | SqlValue::Raw(s) => Some(s),
        SqlValue::Bytes(b) => std::str::from_utf8(b).ok(),
        _ => None,
    }
}

fn convert_err(v: &SqlValue, to: &'static str) -> ScanError {
    ScanError::Convert {
        from: v.kind_name(),
        to,
    }
}

fn parse_text<T: FromStr>(v: &SqlValue, to: &'static str) -> Result<T, ScanError> {
    let s = text(v).ok_or_else(|| convert_err(v, to))?;
    s.trim().parse::<T>().map_err(|_| ScanError::Parse {
        to,
        value: s.to_string(),
    })
}

macro_rules! from_sql_int {
    ($($t:ty),+ $(,)?) => {
        $(impl FromSql for $t {
            fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
                const TO: &str = stringify!($t);
                match v {
                    SqlValue::I64(n) => <$t>::try_from(n).map_err(|_| ScanError::Overflow { to: TO }),
                    SqlValue::U64(n) => <$t>::try_from(n).map_err(|_| ScanError::Overflow { to: TO }),
                    SqlValue::Bool(b) => Ok(<$t>::from(b)),
                    SqlValue::Decimal(d) if d.fract().is_zero() => d
                        .to_i128()
                        .and_then(|n| <$t>::try_from(n).ok())
                        .ok_or(ScanError::Overflow { to: TO }),
                    SqlValue::F64(f) if f.fract() == 0.0 => {
                        Decimal::try_from(f).map_err(|_| ScanError::Overflow { to: TO }).and_then(|d| Self::from_sql(SqlValue::Decimal(d)))
                    }
                    ref other => parse_text(other, TO),
                }
            }

            fn from_null() -> Result<Self, ScanError> {
                Ok(0)
            }
        })+
    };
}

from_sql_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl FromSql for f64 {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        match v {
            SqlValue::F64(f) => Ok(f),
            SqlValue::F32(f) => Ok(f64::from(f)),
            SqlValue::I64(n) => Ok(n as f64),
            SqlValue::U64(n) => Ok(n as f64),
            SqlValue::Decimal(d) => d.to_f64().ok_or(ScanError::Overflow { to: "f64" }),
            ref other => parse_text(other, "f64"),
        }
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(0.0)
    }
}

impl FromSql for f32 {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        match v {
            SqlValue::F32(f) => Ok(f),
            ref other if text(other).is_some() => parse_text(other, "f32"),
            other => f64::from_sql(other).map(|f| f as f32),
        }
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(0.0)
    }
}

impl FromSql for bool {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        match v {
            SqlValue::Bool(b) => Ok(b),
            SqlValue::I64(n) => Ok(n != 0),
            SqlValue::U64(n) => Ok(n != 0),
            ref other => match text(other).map(str::trim) {
                Some("1") => Ok(true),
                Some("0") => Ok(false),
                Some(s) if s.eq_ignore_ascii_case("true") => Ok(true),
                Some(s) if s.eq_ignore_ascii_case("false") => Ok(false),
                Some(s) => Err(ScanError::Parse {
                    to: "bool",
                    value: s.to_string(),
                }),
                None => Err(convert_err(other, "bool")),
            },
        }
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(false)
    }
}

impl FromSql for String {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        match v {
            SqlValue::String(s) => Ok(s.into_owned()),
            SqlValue::Json(s) | SqlValue::Raw(s) => Ok(s),
            SqlValue::Bytes(b) => String::from_utf8(b).map_err(|_| ScanError::Convert {
                from: "bytes",
                to: "String",
            }),
            SqlValue::I64(n) => Ok(n.to_string()),
            SqlValue::U64(n) => Ok(n.to_string()),
            SqlValue::F64(n) => Ok(n.to_string()),
            SqlValue::F32(n) => Ok(n.to_string()),
            SqlValue::Bool(b) => Ok(if b { "1" } else { "0" }.to_string()),
            SqlValue::Decimal(d) => Ok(d.to_string()),
            SqlValue::Date(d) => d
                .format(format_description!("[year]-[month]-[day]"))
                .map_err(|_| ScanError::Convert {
                    from: "date",
                    to: "String",
                }),
            SqlValue::DateTime(t) => t
                .format(format_description!(
                    "[year]-[month]-[day] [hour]:[minute]:[second]"
                ))
                .map_err(|_| ScanError::Convert {
                    from: "datetime",
                    to: "String",
                }),
            other => Err(convert_err(&other, "String")),
        }
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(String::new())
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        match v {
            SqlValue::Bytes(b) => Ok(b),
            SqlValue::String(s) => Ok(s.into_owned().into_bytes()),
            SqlValue::Json(s) | SqlValue::Raw(s) => Ok(s.into_bytes()),
            other => String::from_sql(other).map(String::into_bytes),
        }
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(Vec::new())
    }
}

/// `YYYY-MM-DD HH:MM:SS[.ffffff]`、RFC3339 或恰好 `YYYY-MM-DD`；无时区的按 UTC 解释，
/// MySQL 零日期映射为零值。
fn parse_datetime(s: &str) -> Result<OffsetDateTime, ScanError> {
    let s = s.trim();
    if s.starts_with("0000-00-00") {
        return Ok(ZERO_TIME);
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(dt.to_offset(UtcOffset::UTC));
    }
    let with_time = format_description!(
        "[year]-[month]-[day][first [ ][T]][hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    if let Ok(dt) = PrimitiveDateTime::parse(s, with_time) {
        return Ok(dt.assume_utc());
    }
    if s.len() == DATE_LEN {
        return parse_date(s).map(|d| d.with_time(Time::MIDNIGHT).assume_utc());
    }
    Err(ScanError::Parse {
        to: "datetime",
        value: s.to_string(),
    })
}

const DATE_LEN: usize = "YYYY-MM-DD".len();

fn parse_date(s: &str) -> Result<Date, ScanError> {
    let s = s.trim();
    if s.starts_with("0000-00-00") {
        return Ok(ZERO_DATE);
    }
    let parse_err = || ScanError::Parse {
        to: "date",
        value: s.to_string(),
    };
    if s.len() != DATE_LEN {
        return parse_datetime(s)
            .map(OffsetDateTime::date)
            .map_err(|_| parse_err());
    }
    Date::parse(s, format_description!("[year]-[month]-[day]")).map_err(|_| parse_err())
}

impl FromSql for OffsetDateTime {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        match v {
            SqlValue::DateTime(t) => Ok(t.to_offset(UtcOffset::UTC)),
            SqlValue::Date(d) => Ok(d.with_time(Time::MIDNIGHT).assume_utc()),
            ref other => match text(other) {
                Some(s) => parse_datetime(s),
                None => Err(convert_err(other, "OffsetDateTime")),
            },
        }
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(ZERO_TIME)
    }
}

/// 日期列先按时间扫描，再取 UTC 日期部分。
impl FromSql for Date {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        match v {
            SqlValue::Date(d) => Ok(d),
            ref other if text(other).is_some() => parse_date(text(other).unwrap_or_default()),
            other => OffsetDateTime::from_sql(other).map(|t| t.date()),
        }
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(ZERO_DATE)
    }
}

impl FromSql for Decimal {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        match v {
            SqlValue::Decimal(d) => Ok(d),
            SqlValue::I64(n) => Ok(Decimal::from(n)),
            SqlValue::U64(n) => Ok(Decimal::from(n)),
            SqlValue::F64(f) => Decimal::try_from(f).map_err(|_| ScanError::Overflow { to: "Decimal" }),
            SqlValue::F32(f) => Decimal::try_from(f).map_err(|_| ScanError::Overflow { to: "Decimal" }),
            ref other => {
                let s = text(other).ok_or_else(|| convert_err(other, "Decimal"))?;
                Decimal::from_str(s.trim())
                    .or_else(|_| Decimal::from_scientific(s.trim()))
                    .map_err(|_| ScanError::Parse {
                        to: "Decimal",
                        value: s.to_string(),
                    })
            }
        }
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(Decimal::ZERO)
    }
}

impl FromSql for serde_json::Value {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        match v {
            SqlValue::Bool(b) => Ok(Self::Bool(b)),
            SqlValue::I64(n) => Ok(Self::from(n)),
            SqlValue::U64(n) => Ok(Self::from(n)),
            SqlValue::F64(f) => Ok(Self::from(f)),
            ref other => {
                let s = text(other).ok_or_else(|| convert_err(other, "json"))?;
                serde_json::from_str(s).map_err(|e| ScanError::Json(e.to_string()))
            }
        }
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(Self::Null)
    }
}

impl FromSql for SqlValue {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        Ok(v)
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(SqlValue::Null)
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        T::from_sql(v).map(Some)
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(None)
    }
}

/// 以 JSON 存储的列：空值与 NULL 得到 `T::default()`。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

pub(crate) fn decode_json<T: DeserializeOwned + Default>(v: Option<SqlValue>) -> Result<T, ScanError> {
    let Some(v) = v else {
        return Ok(T::default());
    };
    let raw: &[u8] = match &v {
        SqlValue::Null => return Ok(T::default()),
        SqlValue::String(s) => s.as_bytes(),
        SqlValue::Json(s) | SqlValue::Raw(s) => s.as_bytes(),
        SqlValue::Bytes(b) => b,
        // 数字等标量直接按 JSON 值解码
        other => {
            let json = serde_json::Value::from_sql(other.clone())?;
            return serde_json::from_value(json).map_err(|e| ScanError::Json(e.to_string()));
        }
    };
    if raw.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(raw).map_err(|e| ScanError::Json(e.to_string()))
}

impl<T: DeserializeOwned + Default> FromSql for Json<T> {
    fn from_sql(v: SqlValue) -> Result<Self, ScanError> {
        decode_json(Some(v)).map(Json)
    }

    fn from_null() -> Result<Self, ScanError> {
        Ok(Json(T::default()))
    }
}

/// 列名 -> 值；列名保持原始大小写。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapRow(pub BTreeMap<String, SqlValue>);

impl MapRow {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.get(column)
    }

    pub fn into_inner(self) -> BTreeMap<String, SqlValue> {
        self.0
    }
}

/// 按列序排列的值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceRow(pub Vec<SqlValue>);

impl SliceRow {
    pub fn get(&self, i: usize) -> Option<&SqlValue> {
        self.0.get(i)
    }

    pub fn into_inner(self) -> Vec<SqlValue> {
        self.0
    }
}

/// 元素形态。
#[derive(Debug, Clone, Copy)]
pub enum RowShape {
    Scalar,
    Struct(&'static [FieldMeta]),
    Map,
    Slice,
}

/// 一行扫描结果，形态与 `RowShape` 对应。
#[derive(Debug)]
pub enum RowCells {
    Scalar(SqlValue),
    Fields(FieldCells),
    Map(MapRow),
    Slice(SliceRow),
}

/// 结构体字段单元格：按 `SqlRow::fields()` 顺序依次取出。
#[derive(Debug)]
pub struct FieldCells {
    fields: &'static [FieldMeta],
    cells: Vec<Option<SqlValue>>,
    pos: usize,
}

impl FieldCells {
    pub fn new(fields: &'static [FieldMeta], cells: Vec<Option<SqlValue>>) -> Self {
        Self {
            fields,
            cells,
            pos: 0,
        }
    }

    fn next_cell(&mut self) -> (&'static str, Option<SqlValue>) {
        let i = self.pos;
        self.pos += 1;
        let name = self.fields.get(i).map(|f| f.rust).unwrap_or("?");
        (name, self.cells.get_mut(i).and_then(Option::take))
    }

    pub fn take<T: FromSql>(&mut self) -> Result<T, ScanError> {
        let (field, v) = self.next_cell();
        T::from_opt(v).map_err(|e| ScanError::Field {
            field,
            source: Box::new(e),
        })
    }

    pub fn take_json<T: DeserializeOwned + Default>(&mut self) -> Result<T, ScanError> {
        let (field, v) = self.next_cell();
        decode_json(v).map_err(|e| ScanError::Field {
            field,
            source: Box::new(e),
        })
    }

    pub fn skip(&mut self) {
        self.pos += 1;
    }
}

/// 结果行元素。
pub trait FromRow: Sized + Send {
    fn shape() -> Result<RowShape, ScanError>;

    fn from_row(row: RowCells) -> Result<Self, ScanError>;
}

pub fn struct_from_row<T: SqlRow>(row: RowCells) -> Result<T, ScanError> {
    match row {
        RowCells::Fields(mut cells) => T::from_fields(&mut cells),
        _ => Err(ScanError::Shape("struct")),
    }
}

fn scalar_from_row<T: FromSql>(row: RowCells) -> Result<T, ScanError> {
    match row {
        RowCells::Scalar(v) => T::from_opt(Some(v)),
        _ => Err(ScanError::Shape("scalar")),
    }
}

/// 为实现了 `FromSql` 的类型实现标量 `FromRow`。
#[macro_export]
macro_rules! scalar_row {
    ($($t:ty),+ $(,)?) => {
        $(impl $crate::scan::FromRow for $t {
            fn shape() -> ::std::result::Result<$crate::scan::RowShape, $crate::scan::ScanError> {
                Ok($crate::scan::RowShape::Scalar)
            }

            fn from_row(
                row: $crate::scan::RowCells,
            ) -> ::std::result::Result<Self, $crate::scan::ScanError> {
                $crate::scan::scalar_cell(row)
            }
        })+
    };
}

#[doc(hidden)]
pub fn scalar_cell<T: FromSql>(row: RowCells) -> Result<T, ScanError> {
    scalar_from_row(row)
}

scalar_row!(
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
    bool,
    String,
    Vec<u8>,
    OffsetDateTime,
    Date,
    Decimal,
    serde_json::Value,
    SqlValue,
);

impl<T: FromSql + Send> FromRow for Option<T> {
    fn shape() -> Result<RowShape, ScanError> {
        Ok(RowShape::Scalar)
    }

    fn from_row(row: RowCells) -> Result<Self, ScanError> {
        scalar_from_row(row)
    }
}

impl<T: DeserializeOwned + Default + Send> FromRow for Json<T> {
    fn shape() -> Result<RowShape, ScanError> {
        Ok(RowShape::Scalar)
    }

    fn from_row(row: RowCells) -> Result<Self, ScanError> {
        scalar_from_row(row)
    }
}

impl FromRow for MapRow {
    fn shape() -> Result<RowShape, ScanError> {
        Ok(RowShape::Map)
    }

    fn from_row(row: RowCells) -> Result<Self, ScanError> {
        match row {
            RowCells::Map(m) => Ok(m),
            _ => Err(ScanError::Shape("map row")),
        }
    }
}

impl FromRow for SliceRow {
    fn shape() -> Result<RowShape, ScanError> {
        Ok(RowShape::Slice)
    }

    fn from_row(row: RowCells) -> Result<Self, ScanError> {
        match row {
            RowCells::Slice(s) => Ok(s),
            _ => Err(ScanError::Shape("slice row")),
        }
    }
}

/// 单列的去向。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ColumnSink {
    Scalar,
    /// 结构体字段下标。
    Field(usize),
    /// 多列字段：保留原始字节，构造时再做 JSON 解码。
    Json(usize),
    Map(String),
    Index(usize),
    Discard,
}

/// 每次查询建立一次的列分发表。
#[derive(Debug)]
pub(crate) struct ScanPlan {
    shape: RowShape,
    sinks: Vec<ColumnSink>,
}

impl ScanPlan {
    pub(crate) fn new(
        columns: &[String],
        shape: RowShape,
        warn_unknown: bool,
    ) -> Result<Self, ScanError> {
        let sinks = match shape {
            RowShape::Scalar => {
                if columns.len() != 1 {
                    return Err(ScanError::ColumnCount {
                        expected: 1,
                        got: columns.len(),
                    });
                }
                vec![ColumnSink::Scalar]
            }
            RowShape::Struct(fields) => {
                let mut by_name: HashMap<String, usize> = HashMap::with_capacity(fields.len());
                for (i, f) in fields.iter().enumerate() {
                    if !f.is_skipped() {
                        by_name.entry(f.column.to_lowercase()).or_insert(i);
                    }
                }
                columns
                    .iter()
                    .map(|c| match by_name.get(&c.to_lowercase()) {
                        Some(&i) if fields[i].kind == FieldKind::Json => ColumnSink::Json(i),
                        Some(&i) => ColumnSink::Field(i),
                        None => {
                            if warn_unknown {
                                tracing::warn!(column = %c, "result column has no matching field");
                            }
                            ColumnSink::Discard
                        }
                    })
                    .collect()
            }
            RowShape::Map => columns.iter().map(|c| ColumnSink::Map(c.clone())).collect(),
            RowShape::Slice => (0..columns.len()).map(ColumnSink::Index).collect(),
        };
        Ok(Self { shape, sinks })
    }

    /// 按分发表把一行驱动值装进单元格。
    pub(crate) fn cells(&self, values: Vec<SqlValue>) -> Result<RowCells, ScanError> {
        if values.len() != self.sinks.len() {
            return Err(ScanError::ColumnCount {
                expected: self.sinks.len(),
                got: values.len(),
            });
        }
        Ok(match self.shape {
            RowShape::Scalar => RowCells::Scalar(values.into_iter().next().unwrap_or(SqlValue::Null)),
            RowShape::Struct(fields) => {
                let mut cells: Vec<Option<SqlValue>> = vec![None; fields.len()];
                for (sink, v) in self.sinks.iter().zip(values) {
                    match sink {
                        ColumnSink::Field(i) | ColumnSink::Json(i) => cells[*i] = Some(v),
                        _ => {}
                    }
                }
                RowCells::Fields(FieldCells::new(fields, cells))
            }
            RowShape::Map => {
                let mut m = BTreeMap::new();
                for (sink, v) in self.sinks.iter().zip(values) {
                    if let ColumnSink::Map(name) = sink {
                        m.insert(name.clone(), v);
                    }
                }
                RowCells::Map(MapRow(m))
            }
            RowShape::Slice => RowCells::Slice(SliceRow(values)),
        })
    }

    #[cfg(test)]
    pub(crate) fn sinks(&self) -> &[ColumnSink] {
        &self.sinks
    }
}
