//! 结构体行：字段元数据、`mysql` tag 解析与 `sql_row!` 宏。
//!
//! Rust 无运行时反射；通过 `macro_rules!` 为业务 struct 生成字段元数据、取值与按列构造逻辑，
//! 同一个 struct 因此既能当查询参数，也能作为结果行和插入行。
//!
//! tag 语法：`"<列名>[,<选项>...]"`，选项：
//! - `-`：忽略该字段
//! - `omitempty` / `insertDefault`：零值输出 `default`
//! - `defaultzero`：零值输出 `default(`列名`)`
//!
//! 列名中的 `0xHH` 会被解码成对应字节（用于逗号等无法直接写进 tag 的字符）。

use crate::marshal::MarshalError;
use crate::params::ParamMeta;
use crate::scan::FieldCells;
use crate::scan::ScanError;
use crate::value::SqlValue;

/// tag 解析错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("tag {tag:?} decodes to invalid utf-8")]
    InvalidUtf8 { tag: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldOptions {
    pub skip: bool,
    pub omitempty: bool,
    pub default_zero: bool,
    pub insert_default: bool,
}

impl FieldOptions {
    /// 零值是否需要替换成 `default`。
    pub fn default_on_zero(&self) -> bool {
        self.omitempty || self.default_zero || self.insert_default
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 单列。
    Column,
    /// 多列字段：从一列 JSON 解码。
    Json,
    /// 不参与任何列映射。
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    /// Rust 字段名
    pub rust: &'static str,
    /// 解码后的列名；tag 未写列名时等于 `rust`。
    pub column: String,
    pub kind: FieldKind,
    pub options: FieldOptions,
}

impl FieldMeta {
    pub fn new(rust: &'static str, tag: &str, kind: FieldKind) -> Result<Self, TagError> {
        let (name, options) = parse_tag(tag)?;
        let kind = if options.skip { FieldKind::Skip } else { kind };
        Ok(Self {
            rust,
            column: if name.is_empty() { rust.to_string() } else { name },
            kind,
            options,
        })
    }

    pub fn skipped(rust: &'static str) -> Self {
        Self {
            rust,
            column: rust.to_string(),
            kind: FieldKind::Skip,
            options: FieldOptions {
                skip: true,
                ..FieldOptions::default()
            },
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.kind == FieldKind::Skip
    }

    /// 作为查询参数时的元数据。
    pub fn param_meta(&self) -> ParamMeta {
        ParamMeta {
            default_on_zero: self.options.default_on_zero(),
            column: if self.options.default_zero {
                self.column.clone()
            } else {
                String::new()
            },
        }
    }
}

/// 解析 `mysql` tag，返回（解码后的列名，选项）。
pub fn parse_tag(tag: &str) -> Result<(String, FieldOptions), TagError> {
    let mut parts = tag.split(',');
    let name = parts.next().unwrap_or("").trim();
    let mut options = FieldOptions::default();
    if name == "-" {
        options.skip = true;
        return Ok((String::new(), options));
    }
    for opt in parts {
        match opt.trim() {
            "omitempty" => options.omitempty = true,
            "defaultzero" => options.default_zero = true,
            "insertDefault" => options.insert_default = true,
            "-" => options.skip = true,
            _ => {}
        }
    }
    Ok((decode_hex_escapes(name)?, options))
}

/// `a0x2cb` -> `a,b`；非法的 `0x` 序列原样保留。
pub fn decode_hex_escapes(name: &str) -> Result<String, TagError> {
    let bytes = name.as_bytes();
    if !name.contains("0x") {
        return Ok(name.to_string());
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'0'
            && bytes.get(i + 1) == Some(&b'x')
            && let (Some(hi), Some(lo)) = (
                bytes.get(i + 2).and_then(|&b| hex_val(b)),
                bytes.get(i + 3).and_then(|&b| hex_val(b)),
            )
        {
            out.push((hi << 4) | lo);
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).map_err(|_| TagError::InvalidUtf8 {
        tag: name.to_string(),
    })
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// 由 `sql_row!` 为业务 struct 实现。
pub trait SqlRow: Sized + Send + Sync {
    /// 字段元数据（展开 `flatten` 后按声明顺序），进程内只解析一次。
    fn fields() -> Result<&'static [FieldMeta], TagError>;

    /// 与 `fields()` 一一对应的取值；忽略的字段为 `Null`。
    fn values(&self) -> Result<Vec<SqlValue>, MarshalError>;

    /// 按 `fields()` 顺序从单元格构造。
    fn from_fields(cells: &mut FieldCells) -> Result<Self, ScanError>;
}

/// 为 struct 生成 `SqlRow`、`FromRow` 与 `InsertRow`。
///
/// ```ignore
/// sql_row! {
///     impl Person {
///         id: col("id"),
///         name: col("name,omitempty"),
///         tags: json("tags"),
///         audit: flatten(Audit),
///         scratch: skip,
///     }
/// }
/// ```
#[macro_export]
macro_rules! sql_row {
    (
        impl $ty:ty {
            $( $field:ident : $kind:ident $( ( $($arg:tt)* ) )? ),* $(,)?
        }
    ) => {
        impl $crate::structs::SqlRow for $ty {
            fn fields() -> ::std::result::Result<
                &'static [$crate::structs::FieldMeta],
                $crate::structs::TagError,
            > {
                static FIELDS: ::std::sync::OnceLock<
                    ::std::result::Result<
                        ::std::vec::Vec<$crate::structs::FieldMeta>,
                        $crate::structs::TagError,
                    >,
                > = ::std::sync::OnceLock::new();
                FIELDS
                    .get_or_init(|| {
                        let mut out = ::std::vec::Vec::new();
                        $( $crate::__sql_row_meta!(out, $field, $kind $( ( $($arg)* ) )?); )*
                        Ok(out)
                    })
                    .as_deref()
                    .map_err(::std::clone::Clone::clone)
            }

            fn values(
                &self,
            ) -> ::std::result::Result<
                ::std::vec::Vec<$crate::value::SqlValue>,
                $crate::marshal::MarshalError,
            > {
                let mut out = ::std::vec::Vec::new();
                $( $crate::__sql_row_value!(self, out, $field, $kind $( ( $($arg)* ) )?); )*
                Ok(out)
            }

            fn from_fields(
                cells: &mut $crate::scan::FieldCells,
            ) -> ::std::result::Result<Self, $crate::scan::ScanError> {
                Ok(Self {
                    $( $field: $crate::__sql_row_take!(cells, $kind $( ( $($arg)* ) )?), )*
                })
            }
        }

        impl $crate::scan::FromRow for $ty {
            fn shape() -> ::std::result::Result<$crate::scan::RowShape, $crate::scan::ScanError> {
                Ok($crate::scan::RowShape::Struct(
                    <Self as $crate::structs::SqlRow>::fields()?,
                ))
            }

            fn from_row(
                row: $crate::scan::RowCells,
            ) -> ::std::result::Result<Self, $crate::scan::ScanError> {
                $crate::scan::struct_from_row(row)
            }
        }

        impl $crate::insert::InsertRow for $ty {
            fn insert_cells(
                &self,
            ) -> ::std::result::Result<::std::vec::Vec<$crate::insert::InsertCell>, $crate::error::Error>
            {
                $crate::insert::struct_cells(self)
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __sql_row_meta {
    ($out:ident, $field:ident, col($tag:literal)) => {
        $out.push($crate::structs::FieldMeta::new(
            stringify!($field),
            $tag,
            $crate::structs::FieldKind::Column,
        )?);
    };
    ($out:ident, $field:ident, col) => {
        $out.push($crate::structs::FieldMeta::new(
            stringify!($field),
            "",
            $crate::structs::FieldKind::Column,
        )?);
    };
    ($out:ident, $field:ident, json($tag:literal)) => {
        $out.push($crate::structs::FieldMeta::new(
            stringify!($field),
            $tag,
            $crate::structs::FieldKind::Json,
        )?);
    };
    ($out:ident, $field:ident, skip) => {
        $out.push($crate::structs::FieldMeta::skipped(stringify!($field)));
    };
    ($out:ident, $field:ident, flatten($inner:ty)) => {
        $out.extend(
            <$inner as $crate::structs::SqlRow>::fields()?
                .iter()
                .cloned(),
        );
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __sql_row_value {
    ($this:ident, $out:ident, $field:ident, col $( ($tag:literal) )?) => {
        $out.push($crate::value::SqlValue::from(::std::clone::Clone::clone(
            &$this.$field,
        )));
    };
    ($this:ident, $out:ident, $field:ident, json($tag:literal)) => {
        $out.push($crate::value::SqlValue::json(&$this.$field)?);
    };
    ($this:ident, $out:ident, $field:ident, skip) => {
        $out.push($crate::value::SqlValue::Null);
    };
    ($this:ident, $out:ident, $field:ident, flatten($inner:ty)) => {
        $out.extend(<$inner as $crate::structs::SqlRow>::values(&$this.$field)?);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __sql_row_take {
    ($cells:ident, col $( ($tag:literal) )?) => {
        $cells.take()?
    };
    ($cells:ident, json($tag:literal)) => {
        $cells.take_json()?
    };
    ($cells:ident, skip) => {{
        $cells.skip();
        ::std::default::Default::default()
    }};
    ($cells:ident, flatten($inner:ty)) => {
        <$inner as $crate::structs::SqlRow>::from_fields($cells)?
    };
}
