//! SQL 插值：展开模板，再把 `@@name` 参数替换成字面量（参数替换基于 `tokenizer`）。
//!
//! 安全说明：所有字符串都以十六进制字面量内联，不经过转义；
//! 未知参数 `@@unknown` 原样保留，交给服务端按会话变量解释。

use crate::error::Result;
use crate::marshal::{MarshalOpts, marshal_into};
use crate::params::{Param, ParamMetas, Params};
use crate::template::{self, TemplateFuncs};
use crate::tokenizer::{PARAM_SENTINEL, TokenKind, tokenize};
use crate::value::{MAX_TIME, SqlValue};
use crate::valuer::ValuerFuncs;
use std::collections::BTreeSet;
use time::OffsetDateTime;

/// 模板起始标记。
pub const TEMPLATE_OPENER: &str = "{{";

/// 插值结果：内联后的查询与实际被替换的参数（键为小写）。
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolated {
    pub query: String,
    pub params: Params,
}

/// 展开模板并内联参数。
pub fn interpolate(
    query: &str,
    funcs: &TemplateFuncs,
    valuers: &ValuerFuncs,
    params: &[Param],
) -> Result<Interpolated> {
    let rendered;
    let text = if query.contains(TEMPLATE_OPENER) {
        rendered = template::render(query, &template_data(params), funcs, valuers)?;
        rendered.as_str()
    } else {
        query
    };

    if !text.contains(PARAM_SENTINEL) {
        return Ok(Interpolated {
            query: text.to_string(),
            params: Params::new(),
        });
    }

    let tokens = tokenize(text);
    let first = tokens
        .iter()
        .find_map(|t| t.param_name())
        .unwrap_or_default();

    let (merged, metas) = merge_params(first, params);

    let mut out = String::with_capacity(text.len() + 32);
    let mut used = BTreeSet::new();
    for (i, tok) in tokens.iter().enumerate() {
        let Some(name) = tok.param_name() else {
            out.push_str(tok.text);
            continue;
        };
        let key = name.to_lowercase();
        let Some(v) = merged.get(&key) else {
            out.push_str(tok.text);
            continue;
        };

        let (opts, field) = match metas.get(&key) {
            Some(m) if m.default_on_zero => (MarshalOpts::DEFAULT_ON_ZERO, m.column.as_str()),
            _ => (MarshalOpts::NONE, ""),
        };
        marshal_into(&mut out, v, opts, field, valuers)?;
        used.insert(key);

        // 紧贴的下一个 token 可能与内联结果粘连（如 0x.. 后接单词），补一个空格
        if let Some(next) = tokens.get(i + 1)
            && next.start == tok.end
            && matches!(
                next.kind,
                TokenKind::String | TokenKind::Word | TokenKind::Var | TokenKind::Param
            )
        {
            out.push(' ');
        }
    }

    let params = merged
        .into_iter()
        .filter(|(k, _)| used.contains(k))
        .collect();
    Ok(Interpolated { query: out, params })
}

/// 合并参数（键转小写，后者覆盖前者）；最前面是内置的 `now` 与 `MaxTime`。
pub(crate) fn merge_params(first: &str, params: &[Param]) -> (Params, ParamMetas) {
    let mut merged = Params::new();
    merged.insert("now".to_string(), SqlValue::DateTime(OffsetDateTime::now_utc()));
    merged.insert("maxtime".to_string(), SqlValue::DateTime(MAX_TIME));
    let mut metas = ParamMetas::new();
    for p in params {
        let (values, meta) = p.to_params(first);
        for (k, v) in values {
            let k = k.to_lowercase();
            metas.remove(&k);
            merged.insert(k, v);
        }
        for (k, m) in meta {
            metas.insert(k.to_lowercase(), m);
        }
    }
    (merged, metas)
}

/// 模板数据：区分大小写的合并结果。
fn template_data(params: &[Param]) -> Params {
    let mut data = Params::new();
    for p in params {
        // 单个值没有名字可挂，模板里无法引用
        if matches!(p, Param::Value(_)) {
            continue;
        }
        let (values, _) = p.to_params("");
        data.extend(values);
    }
    data
}
