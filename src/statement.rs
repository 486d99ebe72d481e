//! SQL statement handling
//!
//! This module provides the bind value type shared by prepared programs and
//! `bind_execute`, plus the lexical scan that counts parameter markers.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::BindType;

/// A value bound to a statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    /// 32-bit integer
    Int32(i32),
    /// 64-bit integer
    Int64(i64),
    /// Double-precision float
    Double(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Blob(Bytes),
    /// SQL NULL
    Null,
    /// A blob of the given length filled with zeros by the server
    ZeroBlob(usize),
}

impl BindValue {
    /// Wire bind type for this value
    pub fn bind_type(&self) -> BindType {
        match self {
            BindValue::Int32(_) => BindType::Integer,
            BindValue::Int64(_) => BindType::Int64,
            BindValue::Double(_) => BindType::Double,
            BindValue::Text(_) => BindType::Text,
            BindValue::Blob(_) => BindType::Blob,
            BindValue::Null => BindType::Null,
            BindValue::ZeroBlob(_) => BindType::ZeroBlob,
        }
    }

    /// Check if this is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, BindValue::Null)
    }

    /// Text rendering used for numbers on the wire
    ///
    /// Doubles use fixed notation with six decimals.
    fn numeric_text(&self) -> Option<String> {
        match self {
            BindValue::Int32(v) => Some(v.to_string()),
            BindValue::Int64(v) => Some(v.to_string()),
            BindValue::Double(v) => Some(format!("{:.6}", v)),
            _ => None,
        }
    }

    /// Payload of a VM_BIND request
    ///
    /// Numbers and text are sent without a terminator. NULL and zero-blob
    /// values carry no field at all.
    pub(crate) fn vm_payload(&self) -> Option<Bytes> {
        if let Some(text) = self.numeric_text() {
            return Some(Bytes::from(text));
        }
        match self {
            BindValue::Text(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            BindValue::Blob(b) => Some(b.clone()),
            _ => None,
        }
    }

    /// Bind type and payload of a bind-execute chunk
    ///
    /// Everything except blobs is NUL-terminated; NULL travels as an empty
    /// string. Zero-blobs are expanded client-side.
    pub(crate) fn chunk_payload(&self) -> (BindType, Bytes) {
        let terminated = |s: &[u8]| {
            let mut buf = BytesMut::with_capacity(s.len() + 1);
            buf.put_slice(s);
            buf.put_u8(0);
            buf.freeze()
        };
        if let Some(text) = self.numeric_text() {
            return (self.bind_type(), terminated(text.as_bytes()));
        }
        match self {
            BindValue::Text(s) => (BindType::Text, terminated(s.as_bytes())),
            BindValue::Blob(b) => (BindType::Blob, b.clone()),
            BindValue::ZeroBlob(n) => (BindType::Blob, Bytes::from(vec![0u8; *n])),
            _ => (BindType::Null, terminated(b"")),
        }
    }
}

impl From<i32> for BindValue {
    fn from(v: i32) -> Self {
        BindValue::Int32(v)
    }
}

impl From<i64> for BindValue {
    fn from(v: i64) -> Self {
        BindValue::Int64(v)
    }
}

impl From<f64> for BindValue {
    fn from(v: f64) -> Self {
        BindValue::Double(v)
    }
}

impl From<&str> for BindValue {
    fn from(v: &str) -> Self {
        BindValue::Text(v.to_string())
    }
}

impl From<String> for BindValue {
    fn from(v: String) -> Self {
        BindValue::Text(v)
    }
}

impl From<Bytes> for BindValue {
    fn from(v: Bytes) -> Self {
        BindValue::Blob(v)
    }
}

impl From<Vec<u8>> for BindValue {
    fn from(v: Vec<u8>) -> Self {
        BindValue::Blob(Bytes::from(v))
    }
}

impl<T: Into<BindValue>> From<Option<T>> for BindValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(BindValue::Null, Into::into)
    }
}

/// A SQL statement with its parameter markers counted
#[derive(Debug, Clone)]
pub struct Statement {
    sql: String,
    names: Vec<String>,
    param_count: usize,
}

impl Statement {
    /// Scan a statement
    pub fn new(sql: impl Into<String>) -> Self {
        let mut stmt = Self {
            sql: sql.into(),
            names: Vec::new(),
            param_count: 0,
        };
        stmt.parse_bind_markers();
        stmt
    }

    /// Get the SQL text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Highest parameter ordinal referenced by the statement
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Named parameters in order of first appearance, with their marker
    pub fn param_names(&self) -> &[String] {
        &self.names
    }

    /// Count `?`, `?NNN`, `:name`, `@name` and `$name` markers
    ///
    /// A bare `?` takes the next ordinal after the largest so far; `?NNN`
    /// names an ordinal directly. Each distinct name takes a new ordinal,
    /// repeats reuse it. Literals, quoted identifiers and comments are
    /// skipped.
    fn parse_bind_markers(&mut self) {
        let chars: Vec<char> = self.sql.chars().collect();
        let len = chars.len();
        let mut max = 0usize;
        let mut i = 0;

        while i < len {
            let ch = chars[i];

            // Quoted runs: 'text', "ident", `ident`, [ident]
            let close = match ch {
                '\'' => Some('\''),
                '"' => Some('"'),
                '`' => Some('`'),
                '[' => Some(']'),
                _ => None,
            };
            if let Some(close) = close {
                i += 1;
                while i < len && chars[i] != close {
                    i += 1;
                }
                i += 1;
                continue;
            }

            if ch == '-' && i + 1 < len && chars[i + 1] == '-' {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }

            if ch == '/' && i + 1 < len && chars[i + 1] == '*' {
                i += 2;
                while i < len && !(chars[i] == '*' && i + 1 < len && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
                continue;
            }

            if ch == '?' {
                let start = i + 1;
                let mut end = start;
                while end < len && chars[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start {
                    let digits: String = chars[start..end].iter().collect();
                    max = max.max(digits.parse().unwrap_or(0));
                } else {
                    max += 1;
                }
                i = end;
                continue;
            }

            if matches!(ch, ':' | '@' | '$') {
                let name = extract_bind_name(&chars, i + 1);
                if !name.is_empty() {
                    i += 1 + name.chars().count();
                    let marker = format!("{}{}", ch, name);
                    if !self.names.contains(&marker) {
                        self.names.push(marker);
                        max += 1;
                    }
                    continue;
                }
            }

            i += 1;
        }

        self.param_count = max;
    }
}

/// Extract a bind name starting at position
fn extract_bind_name(chars: &[char], start: usize) -> String {
    let mut i = start;
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    chars[start..i].iter().collect()
}

/// Number of parameters a statement expects
pub fn parameter_count(sql: &str) -> usize {
    Statement::new(sql).param_count()
}
