//! 查询模板：在参数替换之前展开 `{{ ... }}` 动作。
//!
//! 支持的子集：
//! - `{{.Key}}`、`{{.}}`：输出值
//! - `{{marshal .Key}}`、`{{.Key | marshal}}`：输出 SQL 字面量
//! - 注册函数：`{{fn .A "lit" 3}}`，管道把前一段的结果作为最后一个参数
//! - `{{if .Key}}...{{else}}...{{end}}`、`{{range .List}}...{{else}}...{{end}}`
//! - `{{/* 注释 */}}`，`{{-` / `-}}` 去掉相邻空白
//!
//! 模板数据区分大小写；引用不存在的键直接报错。

use crate::marshal::{MarshalError, MarshalOpts, display_float, marshal};
use crate::params::Params;
use crate::value::SqlValue;
use crate::valuer::ValuerFuncs;
use std::collections::HashMap;
use std::sync::Arc;
use time::macros::format_description;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template: parse error: {0}")]
    Parse(String),
    #[error("template: map has no entry for key {0:?}")]
    MissingKey(String),
    #[error("template: function {0:?} not defined")]
    UnknownFunc(String),
    #[error("template: {0}")]
    Exec(String),
    #[error("template: {0}")]
    Marshal(#[from] MarshalError),
}

pub type TemplateFunc =
    Arc<dyn Fn(&[SqlValue]) -> Result<SqlValue, TemplateError> + Send + Sync>;

/// 调用方注册的模板函数；`marshal` 为内置函数，不能被覆盖。
#[derive(Clone, Default)]
pub struct TemplateFuncs {
    funcs: HashMap<String, TemplateFunc>,
}

impl TemplateFuncs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[SqlValue]) -> Result<SqlValue, TemplateError> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<&TemplateFunc> {
        self.funcs.get(name)
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

impl std::fmt::Debug for TemplateFuncs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.funcs.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TemplateFuncs").field("names", &names).finish()
    }
}

pub const MARSHAL_FUNC: &str = "marshal";

/// 展开模板。
pub fn render(
    src: &str,
    data: &Params,
    funcs: &TemplateFuncs,
    valuers: &ValuerFuncs,
) -> Result<String, TemplateError> {
    let items = lex(src)?;
    let mut parser = Parser { items, pos: 0 };
    let (nodes, end) = parser.parse_list()?;
    if let Some(end) = end {
        return Err(TemplateError::Parse(format!("unexpected {{{{{end}}}}}")));
    }
    let ev = Eval { funcs, valuers };
    let mut out = String::with_capacity(src.len());
    ev.walk(&nodes, Dot::Map(data), &mut out)?;
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Text(String),
    Action(String),
}

/// 切出文本段与动作段，并处理 `{{-` / `-}}`。
fn lex(src: &str) -> Result<Vec<Item>, TemplateError> {
    let mut items = Vec::new();
    let mut rest = src;
    let mut trim_next = false;
    while let Some(open) = rest.find("{{") {
        let mut text = &rest[..open];
        if trim_next {
            text = text.trim_start();
        }
        let after = &rest[open + 2..];
        let (trim_prev, body_start) = match after.strip_prefix('-') {
            Some(r) if r.starts_with(char::is_whitespace) => (true, r),
            _ => (false, after),
        };
        if trim_prev {
            text = text.trim_end();
        }
        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }
        let close = find_close(body_start)
            .ok_or_else(|| TemplateError::Parse("unclosed action".to_string()))?;
        let mut body = &body_start[..close];
        trim_next = false;
        if let Some(b) = body.strip_suffix('-')
            && b.ends_with(char::is_whitespace)
        {
            body = b;
            trim_next = true;
        }
        items.push(Item::Action(body.trim().to_string()));
        rest = &body_start[close + 2..];
    }
    let text = if trim_next { rest.trim_start() } else { rest };
    if !text.is_empty() {
        items.push(Item::Text(text.to_string()));
    }
    Ok(items)
}

/// 找到动作结束的 `}}`，跳过字符串字面量。
fn find_close(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' && q == b'"' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'`' {
                    quote = Some(b);
                } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Dot,
    Field(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Ident(String),
}

/// 一段管道命令：首个参数为函数名时是调用，否则是取值。
type Command = Vec<Arg>;
type Pipeline = Vec<Command>;

#[derive(Debug)]
enum Node {
    Text(String),
    Output(Pipeline),
    If {
        cond: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        over: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

struct Parser {
    items: Vec<Item>,
    pos: usize,
}

impl Parser {
    /// 解析到 `end` / `else` 或输入结束；返回遇到的终止关键字。
    fn parse_list(&mut self) -> Result<(Vec<Node>, Option<&'static str>), TemplateError> {
        let mut nodes = Vec::new();
        while self.pos < self.items.len() {
            let item = self.items[self.pos].clone();
            self.pos += 1;
            match item {
                Item::Text(t) => nodes.push(Node::Text(t)),
                Item::Action(a) => {
                    if a.starts_with("/*") {
                        if !a.ends_with("*/") {
                            return Err(TemplateError::Parse("unclosed comment".to_string()));
                        }
                        continue;
                    }
                    let (keyword, rest) = split_keyword(&a);
                    match keyword {
                        "end" => return Ok((nodes, Some("end"))),
                        "else" => return Ok((nodes, Some("else"))),
                        "if" | "range" => {
                            let pipe = parse_pipeline(rest)?;
                            let (body, term) = self.parse_list()?;
                            let otherwise = match term {
                                Some("else") => {
                                    let (nodes, term) = self.parse_list()?;
                                    if term != Some("end") {
                                        return Err(TemplateError::Parse(format!(
                                            "missing {{{{end}}}} for {keyword}"
                                        )));
                                    }
                                    nodes
                                }
                                Some("end") => Vec::new(),
                                _ => {
                                    return Err(TemplateError::Parse(format!(
                                        "missing {{{{end}}}} for {keyword}"
                                    )));
                                }
                            };
                            nodes.push(if keyword == "if" {
                                Node::If {
                                    cond: pipe,
                                    then: body,
                                    otherwise,
                                }
                            } else {
                                Node::Range {
                                    over: pipe,
                                    body,
                                    otherwise,
                                }
                            });
                        }
                        _ => nodes.push(Node::Output(parse_pipeline(&a)?)),
                    }
                }
            }
        }
        Ok((nodes, None))
    }
}

fn split_keyword(action: &str) -> (&str, &str) {
    let end = action
        .find(char::is_whitespace)
        .unwrap_or(action.len());
    let (kw, rest) = action.split_at(end);
    match kw {
        "if" | "range" | "else" | "end" => (kw, rest.trim()),
        _ => ("", action),
    }
}

fn parse_pipeline(src: &str) -> Result<Pipeline, TemplateError> {
    let args = lex_args(src)?;
    let mut pipe = Vec::new();
    let mut cmd = Vec::new();
    for a in args {
        match a {
            None => {
                if cmd.is_empty() {
                    return Err(TemplateError::Parse("missing command in pipeline".to_string()));
                }
                pipe.push(std::mem::take(&mut cmd));
            }
            Some(a) => cmd.push(a),
        }
    }
    if cmd.is_empty() {
        return Err(TemplateError::Parse("empty pipeline".to_string()));
    }
    pipe.push(cmd);
    for (i, c) in pipe.iter().enumerate() {
        // 管道后续段必须是函数调用
        if i > 0 && !matches!(c.first(), Some(Arg::Ident(_))) {
            return Err(TemplateError::Parse(
                "non-function command in pipeline".to_string(),
            ));
        }
    }
    Ok(pipe)
}

/// 参数切分；`None` 表示管道分隔符 `|`。
fn lex_args(src: &str) -> Result<Vec<Option<Arg>>, TemplateError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '|' {
            out.push(None);
            i += 1;
            continue;
        }
        if c == '"' || c == '`' {
            let mut s = String::new();
            let mut j = i + 1;
            let mut closed = false;
            while j < chars.len() {
                let d = chars[j];
                if d == c {
                    closed = true;
                    break;
                }
                if d == '\\' && c == '"' && j + 1 < chars.len() {
                    j += 1;
                    s.push(match chars[j] {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                } else {
                    s.push(d);
                }
                j += 1;
            }
            if !closed {
                return Err(TemplateError::Parse("unterminated string".to_string()));
            }
            out.push(Some(Arg::Str(s)));
            i = j + 1;
            continue;
        }
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '|' {
            i += 1;
        }
        let word: String = chars[start..i].iter().collect();
        out.push(Some(parse_word(&word)?));
    }
    Ok(out)
}

fn parse_word(w: &str) -> Result<Arg, TemplateError> {
    if w == "." {
        return Ok(Arg::Dot);
    }
    if let Some(key) = w.strip_prefix('.') {
        if key.is_empty() || key.contains('.') {
            return Err(TemplateError::Parse(format!("unsupported field chain {w}")));
        }
        return Ok(Arg::Field(key.to_string()));
    }
    match w {
        "true" => return Ok(Arg::Bool(true)),
        "false" => return Ok(Arg::Bool(false)),
        "nil" => return Ok(Arg::Nil),
        _ => {}
    }
    if w.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+') {
        if let Ok(n) = w.parse::<i64>() {
            return Ok(Arg::Int(n));
        }
        if let Ok(f) = w.parse::<f64>() {
            return Ok(Arg::Float(f));
        }
        return Err(TemplateError::Parse(format!("bad number syntax {w:?}")));
    }
    if w.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Ok(Arg::Ident(w.to_string()));
    }
    Err(TemplateError::Parse(format!("unexpected {w:?} in command")))
}

#[derive(Clone, Copy)]
enum Dot<'a> {
    Map(&'a Params),
    Value(&'a SqlValue),
}

struct Eval<'a> {
    funcs: &'a TemplateFuncs,
    valuers: &'a ValuerFuncs,
}

impl Eval<'_> {
    fn walk(&self, nodes: &[Node], dot: Dot<'_>, out: &mut String) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Output(pipe) => {
                    let v = self.pipeline(pipe, dot)?;
                    print_value(out, &v)?;
                }
                Node::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    let v = self.pipeline(cond, dot)?;
                    if truthy(&v) {
                        self.walk(then, dot, out)?;
                    } else {
                        self.walk(otherwise, dot, out)?;
                    }
                }
                Node::Range {
                    over,
                    body,
                    otherwise,
                } => {
                    let v = self.pipeline(over, dot)?;
                    let items: Vec<SqlValue> = match v {
                        SqlValue::List(items) => items,
                        SqlValue::Null => Vec::new(),
                        other => {
                            return Err(TemplateError::Exec(format!(
                                "range can't iterate over {}",
                                other.kind_name()
                            )));
                        }
                    };
                    if items.is_empty() {
                        self.walk(otherwise, dot, out)?;
                    }
                    for item in &items {
                        self.walk(body, Dot::Value(item), out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn pipeline(&self, pipe: &[Command], dot: Dot<'_>) -> Result<SqlValue, TemplateError> {
        let mut prev: Option<SqlValue> = None;
        for cmd in pipe {
            prev = Some(self.command(cmd, dot, prev.take())?);
        }
        prev.ok_or_else(|| TemplateError::Parse("empty pipeline".to_string()))
    }

    fn command(
        &self,
        cmd: &[Arg],
        dot: Dot<'_>,
        piped: Option<SqlValue>,
    ) -> Result<SqlValue, TemplateError> {
        match cmd.first() {
            Some(Arg::Ident(name)) => {
                let mut args = cmd[1..]
                    .iter()
                    .map(|a| self.arg(a, dot))
                    .collect::<Result<Vec<_>, _>>()?;
                args.extend(piped);
                self.call(name, &args)
            }
            Some(a) if cmd.len() == 1 => self.arg(a, dot),
            _ => Err(TemplateError::Exec("can't give argument to non-function".to_string())),
        }
    }

    fn arg(&self, a: &Arg, dot: Dot<'_>) -> Result<SqlValue, TemplateError> {
        Ok(match a {
            Arg::Dot => match dot {
                Dot::Map(m) => SqlValue::Json(
                    serde_json::to_string(
                        &m.iter()
                            .map(|(k, v)| Ok((k.clone(), crate::marshal::to_json(v, self.valuers)?)))
                            .collect::<Result<serde_json::Map<_, _>, MarshalError>>()?,
                    )
                    .map_err(MarshalError::from)?,
                ),
                Dot::Value(v) => v.clone(),
            },
            Arg::Field(key) => match dot {
                Dot::Map(m) => m
                    .get(key)
                    .cloned()
                    .ok_or_else(|| TemplateError::MissingKey(key.clone()))?,
                Dot::Value(v) => {
                    return Err(TemplateError::Exec(format!(
                        "can't evaluate field {key} in type {}",
                        v.kind_name()
                    )));
                }
            },
            Arg::Str(s) => SqlValue::from(s.clone()),
            Arg::Int(n) => SqlValue::I64(*n),
            Arg::Float(f) => SqlValue::F64(*f),
            Arg::Bool(b) => SqlValue::Bool(*b),
            Arg::Nil => SqlValue::Null,
            Arg::Ident(name) => self.call(name, &[])?,
        })
    }

    fn call(&self, name: &str, args: &[SqlValue]) -> Result<SqlValue, TemplateError> {
        if name == MARSHAL_FUNC {
            let [v] = args else {
                return Err(TemplateError::Exec(format!(
                    "wrong number of args for marshal: want 1 got {}",
                    args.len()
                )));
            };
            return Ok(SqlValue::Raw(marshal(v, MarshalOpts::NONE, "", self.valuers)?));
        }
        let f = self
            .funcs
            .get(name)
            .ok_or_else(|| TemplateError::UnknownFunc(name.to_string()))?;
        f(args)
    }
}

fn truthy(v: &SqlValue) -> bool {
    match v {
        SqlValue::Valuer(_) => true,
        other => !other.is_zero(),
    }
}

fn print_value(out: &mut String, v: &SqlValue) -> Result<(), TemplateError> {
    match v {
        SqlValue::Null => out.push_str("<nil>"),
        SqlValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        SqlValue::I64(n) => out.push_str(&n.to_string()),
        SqlValue::U64(n) => out.push_str(&n.to_string()),
        SqlValue::F32(n) => out.push_str(&display_float(*n)),
        SqlValue::F64(n) => out.push_str(&display_float(*n)),
        SqlValue::String(s) => out.push_str(s),
        SqlValue::Json(s) | SqlValue::Raw(s) => out.push_str(s),
        SqlValue::Bytes(b) => out.push_str(&String::from_utf8_lossy(b)),
        SqlValue::DateTime(t) => out.push_str(
            &t.format(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
            ))
            .map_err(MarshalError::from)?,
        ),
        SqlValue::Date(d) => out.push_str(
            &d.format(format_description!("[year]-[month]-[day]"))
                .map_err(MarshalError::from)?,
        ),
        SqlValue::Decimal(d) => out.push_str(&d.to_string()),
        SqlValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                print_value(out, item)?;
            }
            out.push(']');
        }
        SqlValue::Valuer(val) => {
            let inner = val.value().map_err(MarshalError::from)?;
            print_value(out, &inner)?;
        }
        SqlValue::Custom(c) => {
            return Err(TemplateError::Exec(format!(
                "can't print value of type {}",
                c.type_name()
            )));
        }
    }
    Ok(())
}
