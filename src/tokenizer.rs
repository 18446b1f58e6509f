//! 查询切分：把 SQL 文本切成带位置信息的 token，用于参数替换与 INSERT 头部解析。
//!
//! 单次前向扫描，手动推进下标；切分是全函数，不会失败。
//! 所有 token 的 `text` 按顺序拼接即为原始输入。

/// 参数哨兵：`@@name`。
pub const PARAM_SENTINEL: &str = "@@";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `@@` 开头的参数引用。
    Param,
    /// `(` 或 `)`。
    Paren,
    /// 单引号、双引号或反引号包裹的字面量。
    String,
    /// `[A-Za-z0-9_]` 组成的单词。
    Word,
    /// 单个 `@` 开头的服务端变量，原样输出。
    Var,
    Comma,
    Misc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
    pub kind: TokenKind,
}

impl<'a> Token<'a> {
    /// 参数名（去掉 `@@` 前缀）；非参数 token 返回 `None`。
    pub fn param_name(&self) -> Option<&'a str> {
        match self.kind {
            TokenKind::Param => self.text.strip_prefix(PARAM_SENTINEL),
            _ => None,
        }
    }
}

pub(crate) fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

pub(crate) fn is_param_byte(b: u8) -> bool {
    is_word_byte(b) || b == b'-' || b == b'.'
}

/// 切分查询文本。
pub fn tokenize(query: &str) -> Vec<Token<'_>> {
    let bytes = query.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 4 + 1);
    let mut i = 0usize;

    while i < bytes.len() {
        let start = i;
        let b = bytes[i];
        let kind = match b {
            b'\'' | b'"' | b'`' => {
                i = scan_quoted(bytes, i);
                TokenKind::String
            }
            b'@' if bytes.get(i + 1) == Some(&b'@')
                && bytes.get(i + 2).is_some_and(|&c| is_param_byte(c)) =>
            {
                i += 2;
                while i < bytes.len() && is_param_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Param
            }
            b'@' if bytes.get(i + 1).is_some_and(|&c| is_word_byte(c)) => {
                i += 1;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Var
            }
            b'(' | b')' => {
                i += 1;
                TokenKind::Paren
            }
            b',' => {
                i += 1;
                TokenKind::Comma
            }
            _ if is_word_byte(b) => {
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Word
            }
            _ => {
                // 多字节字符整体作为一个 misc token
                i += utf8_len(b);
                TokenKind::Misc
            }
        };
        let end = i.min(bytes.len());
        i = end;
        out.push(Token {
            text: &query[start..end],
            start,
            end,
            kind,
        });
    }

    out
}

/// 从开引号位置扫描到闭引号之后；未闭合时吞到结尾。
fn scan_quoted(bytes: &[u8], open: usize) -> usize {
    let delim = bytes[open];
    let mut i = open + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            i += 2;
            continue;
        }
        if b == delim {
            // 连续两个定界符表示转义
            if bytes.get(i + 1) == Some(&delim) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}
