//! 字面量编码：把 `SqlValue` 转成可直接内联到 MySQL 语句中的 SQL 片段。
//!
//! 纯函数，无 I/O；相同输入总是得到相同输出。
//! 字符串一律以十六进制输出，不依赖转义规则：
//! `_utf8mb4 0x<hex> collate utf8mb4_unicode_ci`。

use crate::value::{SqlValue, ZERO_DATE, ZERO_TIME};
use crate::valuer::{ValuerError, ValuerFuncs};
use base64::Engine as _;
use std::ops::BitOr;
use std::sync::Once;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

/// 编码选项（位集合）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarshalOpts(u8);

impl MarshalOpts {
    pub const NONE: Self = Self(0);
    /// 列表两侧加括号：`(a,b)`。
    pub const WRAP_SLICE_WITH_PARENS: Self = Self(1);
    /// 列表编码成 JSON 字符串。
    pub const JSON_SLICE: Self = Self(1 << 1);
    /// 零值输出 `default(`col`)` / `default`。
    pub const DEFAULT_ON_ZERO: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for MarshalOpts {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("unencodable type {type_name}{}", field_suffix(.field))]
    Unencodable { type_name: String, field: String },
    #[error("unencodable float {0}")]
    NonFinite(f64),
    #[error(transparent)]
    Valuer(#[from] ValuerError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("time format: {0}")]
    Format(#[from] time::error::Format),
}

fn field_suffix(field: &str) -> String {
    if field.is_empty() {
        String::new()
    } else {
        format!(" for field {field}")
    }
}

/// 编码单个值。`field` 为列名，仅在输出 `default(`col`)` 与报错时使用。
pub fn marshal(
    v: &SqlValue,
    opts: MarshalOpts,
    field: &str,
    valuers: &ValuerFuncs,
) -> Result<String, MarshalError> {
    let mut out = String::new();
    marshal_into(&mut out, v, opts, field, valuers)?;
    Ok(out)
}

pub fn marshal_into(
    out: &mut String,
    v: &SqlValue,
    opts: MarshalOpts,
    field: &str,
    valuers: &ValuerFuncs,
) -> Result<(), MarshalError> {
    if opts.contains(MarshalOpts::DEFAULT_ON_ZERO) && v.is_zero() {
        if field.is_empty() {
            out.push_str("default");
        } else {
            out.push_str("default(`");
            out.push_str(field);
            out.push_str("`)");
        }
        return Ok(());
    }
    // 递归时不再做零值判断
    let opts = opts.without(MarshalOpts::DEFAULT_ON_ZERO);

    match v {
        SqlValue::Null => out.push_str("null"),
        SqlValue::Bool(b) => out.push(if *b { '1' } else { '0' }),
        SqlValue::I64(n) => out.push_str(&n.to_string()),
        SqlValue::U64(n) => out.push_str(&n.to_string()),
        SqlValue::F32(n) => {
            check_float(f64::from(*n))?;
            out.push_str(&normalize_exponent(format!("{n:E}")));
        }
        SqlValue::F64(n) => {
            check_float(*n)?;
            out.push_str(&normalize_exponent(format!("{n:E}")));
        }
        SqlValue::String(s) => push_string(out, s),
        SqlValue::Json(s) => push_string(out, s),
        SqlValue::Bytes(b) => {
            if b.is_empty() {
                out.push_str("''");
            } else {
                out.push_str("0x");
                push_hex(out, b);
            }
        }
        SqlValue::DateTime(t) => push_datetime(out, t)?,
        SqlValue::Date(d) => push_date(out, d)?,
        SqlValue::Decimal(d) => out.push_str(&d.to_string()),
        SqlValue::Raw(s) => out.push_str(s),
        SqlValue::List(items) => {
            if opts.contains(MarshalOpts::JSON_SLICE) {
                let json = serde_json::to_string(&to_json(v, valuers)?)?;
                push_string(out, &json);
                return Ok(());
            }
            let wrap = opts.contains(MarshalOpts::WRAP_SLICE_WITH_PARENS);
            if wrap {
                out.push('(');
            }
            if items.is_empty() {
                out.push_str("null");
            }
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                marshal_into(out, item, opts, field, valuers)?;
            }
            if wrap {
                out.push(')');
            }
        }
        SqlValue::Valuer(val) => {
            let inner = val.value()?;
            marshal_into(out, &inner, opts, field, valuers)?;
        }
        SqlValue::Custom(c) => match valuers.call(c) {
            Some(Ok(Some(inner))) => marshal_into(out, &inner, opts, field, valuers)?,
            Some(Ok(None)) => out.push_str("null"),
            Some(Err(err)) => return Err(err.into()),
            None if c.is_nil() => out.push_str("null"),
            None => {
                return Err(MarshalError::Unencodable {
                    type_name: c.type_name().to_string(),
                    field: field.to_string(),
                });
            }
        },
    }
    Ok(())
}

fn push_string(out: &mut String, s: &str) {
    if s.is_empty() {
        out.push_str("''");
        return;
    }
    out.push_str("_utf8mb4 0x");
    push_hex(out, s.as_bytes());
    out.push_str(" collate utf8mb4_unicode_ci");
}

pub(crate) fn push_hex(out: &mut String, data: &[u8]) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    out.reserve(data.len() * 2);
    for &b in data {
        out.push(HEX[((b >> 4) & 0xF) as usize] as char);
        out.push(HEX[(b & 0xF) as usize] as char);
    }
}

fn push_datetime(out: &mut String, t: &OffsetDateTime) -> Result<(), MarshalError> {
    if *t == ZERO_TIME {
        out.push_str("null");
        return Ok(());
    }
    let utc = t.to_offset(UtcOffset::UTC);
    let s = utc.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
    ))?;
    out.push_str("convert_tz('");
    out.push_str(&s);
    out.push_str("','UTC',@@session.time_zone)");
    Ok(())
}

fn push_date(out: &mut String, d: &Date) -> Result<(), MarshalError> {
    if *d == ZERO_DATE {
        out.push_str("null");
        return Ok(());
    }
    out.push('\'');
    out.push_str(&d.format(format_description!("[year]-[month]-[day]"))?);
    out.push('\'');
    Ok(())
}

/// `1.5E0` -> `1.5E+00`：最短表示，指数至少两位并带符号。
fn normalize_exponent(s: String) -> String {
    let Some((mantissa, exp)) = s.split_once('E') else {
        return s;
    };
    signed_exponent(mantissa, 'E', exp)
}

fn signed_exponent(mantissa: &str, marker: char, exp: &str) -> String {
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exp),
    };
    format!("{mantissa}{marker}{sign}{digits:0>2}")
}

/// 浮点数的文本形式：最短表示，十进制指数小于 -4 或不小于 6 时用 `1e+21` 这样的科学计数法。
pub(crate) fn display_float<F: std::fmt::Display + std::fmt::LowerExp>(f: F) -> String {
    let sci = format!("{f:e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return match sci.as_str() {
            "inf" => "+Inf".to_string(),
            "-inf" => "-Inf".to_string(),
            _ => sci,
        };
    };
    match exp.parse::<i32>() {
        Ok(e) if !(-4..6).contains(&e) => signed_exponent(mantissa, 'e', exp),
        _ => f.to_string(),
    }
}

const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0; // 2^53

static PRECISION_WARNING: Once = Once::new();

fn check_float(f: f64) -> Result<(), MarshalError> {
    if !f.is_finite() {
        return Err(MarshalError::NonFinite(f));
    }
    if f.abs() > MAX_EXACT_FLOAT {
        PRECISION_WARNING.call_once(|| {
            tracing::warn!(
                value = f,
                "float exceeds 2^53 and may have lost integer precision; consider a decimal type"
            );
        });
    }
    Ok(())
}

/// 值的 JSON 形态（列表的 JSON 编码、模板与 JSON 列写入）。
pub fn to_json(v: &SqlValue, valuers: &ValuerFuncs) -> Result<serde_json::Value, MarshalError> {
    use serde_json::Value;
    Ok(match v {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Bool(*b),
        SqlValue::I64(n) => Value::from(*n),
        SqlValue::U64(n) => Value::from(*n),
        SqlValue::F32(n) => Value::from(f64::from(*n)),
        SqlValue::F64(n) => Value::from(*n),
        SqlValue::String(s) => Value::String(s.to_string()),
        SqlValue::Json(s) => serde_json::from_str(s)?,
        SqlValue::Bytes(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
        SqlValue::DateTime(t) => Value::String(t.format(&time::format_description::well_known::Rfc3339)?),
        SqlValue::Date(d) => Value::String(d.format(format_description!("[year]-[month]-[day]"))?),
        SqlValue::Decimal(d) => Value::String(d.to_string()),
        SqlValue::Raw(s) => Value::String(s.clone()),
        SqlValue::List(items) => Value::Array(
            items
                .iter()
                .map(|i| to_json(i, valuers))
                .collect::<Result<_, _>>()?,
        ),
        SqlValue::Valuer(val) => to_json(&val.value()?, valuers)?,
        SqlValue::Custom(c) => match valuers.call(c) {
            Some(Ok(Some(inner))) => to_json(&inner, valuers)?,
            Some(Ok(None)) => Value::Null,
            Some(Err(err)) => return Err(err.into()),
            None if c.is_nil() => Value::Null,
            None => {
                return Err(MarshalError::Unencodable {
                    type_name: c.type_name().to_string(),
                    field: String::new(),
                });
            }
        },
    })
}
