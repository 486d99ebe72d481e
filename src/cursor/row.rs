//! Row access and cell conversion
//!
//! Cells arrive as text (or raw bytes for blobs). Numeric getters parse the
//! longest valid prefix the way C's `strtoll(s, NULL, 0)` and `strtod` do:
//! leading whitespace and a sign are accepted, `0x` selects hex and a leading
//! `0` selects octal for integers, and trailing garbage is ignored. A cell
//! with no digits converts to zero.

use bytes::Bytes;

use super::result_set::ResultSet;
use crate::error::{Error, Result};

/// Longest prefix that fits the getters' scratch buffer
const MAX_NUMERIC_LEN: usize = 63;

/// Parse an integer prefix with C `strtoll(s, NULL, 0)` semantics
pub(crate) fn parse_int64(cell: &[u8]) -> i64 {
    let cell = &cell[..cell.len().min(MAX_NUMERIC_LEN)];
    let mut i = 0;
    while i < cell.len() && cell[i].is_ascii_whitespace() {
        i += 1;
    }

    let mut negative = false;
    if i < cell.len() && (cell[i] == b'+' || cell[i] == b'-') {
        negative = cell[i] == b'-';
        i += 1;
    }

    let mut radix = 10u32;
    if i + 1 < cell.len()
        && cell[i] == b'0'
        && (cell[i + 1] == b'x' || cell[i + 1] == b'X')
        && cell.get(i + 2).is_some_and(|b| b.is_ascii_hexdigit())
    {
        radix = 16;
        i += 2;
    } else if i < cell.len() && cell[i] == b'0' {
        radix = 8;
    }

    let mut value: i128 = 0;
    let limit = i64::MAX as i128 + 1;
    while i < cell.len() {
        let digit = match (cell[i] as char).to_digit(radix) {
            Some(d) => d as i128,
            None => break,
        };
        value = (value * radix as i128 + digit).min(limit);
        i += 1;
    }

    if negative {
        (-value).max(i64::MIN as i128) as i64
    } else {
        value.min(i64::MAX as i128) as i64
    }
}

/// Parse a float prefix with C `strtod` semantics (decimal forms only)
pub(crate) fn parse_double(cell: &[u8]) -> f64 {
    let cell = &cell[..cell.len().min(MAX_NUMERIC_LEN)];
    let text = String::from_utf8_lossy(cell);
    let s = text.trim_start();
    let bytes = s.as_bytes();

    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }

    let rest = s[end..].to_ascii_lowercase();
    for word in ["infinity", "inf", "nan"] {
        if rest.starts_with(word) {
            return s[..end + word.len()].parse().unwrap_or(0.0);
        }
    }

    let mut digits = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        digits += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return 0.0;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse().unwrap_or(0.0)
}

/// Cell as a value source: `None` for NULL or empty cells
fn non_empty(cell: Option<&Bytes>) -> Option<&Bytes> {
    cell.filter(|c| !c.is_empty())
}

/// A row of a cursor
///
/// Reached through [`Cursor::row`](super::Cursor::row) or
/// [`Cursor::current`](super::Cursor::current). Columns are 1-based.
#[derive(Debug, Clone, Copy)]
pub struct CursorRow<'a> {
    set: &'a ResultSet,
    index: usize,
}

impl<'a> CursorRow<'a> {
    /// `index` is 0-based and must be in range
    pub(crate) fn new(set: &'a ResultSet, index: usize) -> Self {
        Self { set, index }
    }

    /// 1-based row number
    pub fn row_number(&self) -> usize {
        self.index + 1
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.set.num_columns()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw cell; `None` is NULL
    pub fn field(&self, column: usize) -> Result<Option<&'a Bytes>> {
        self.set.cell(self.index, column).ok_or_else(|| {
            Error::OutOfRange(format!(
                "column {} out of range (1..={})",
                column,
                self.set.num_columns()
            ))
        })
    }

    /// Check if a cell is NULL
    pub fn is_null(&self, column: usize) -> Result<bool> {
        Ok(self.field(column)?.is_none())
    }

    /// Cell as `i32`, or `default` when NULL or empty
    pub fn int(&self, column: usize, default: i32) -> Result<i32> {
        Ok(non_empty(self.field(column)?).map_or(default, |c| parse_int64(c) as i32))
    }

    /// Cell as `i64`, or `default` when NULL or empty
    pub fn int64(&self, column: usize, default: i64) -> Result<i64> {
        Ok(non_empty(self.field(column)?).map_or(default, |c| parse_int64(c)))
    }

    /// Cell as `f64`, or `default` when NULL or empty
    pub fn double(&self, column: usize, default: f64) -> Result<f64> {
        Ok(non_empty(self.field(column)?).map_or(default, |c| parse_double(c)))
    }

    /// Cell as text; `None` when NULL
    pub fn text(&self, column: usize) -> Result<Option<String>> {
        Ok(self
            .field(column)?
            .map(|c| String::from_utf8_lossy(c).into_owned()))
    }

    /// Cell bytes; `None` when NULL
    pub fn buffer(&self, column: usize) -> Result<Option<Bytes>> {
        Ok(self.field(column)?.cloned())
    }

    /// Row id, or `default` when the cursor has no rowid column
    pub fn row_id(&self, default: i64) -> i64 {
        non_empty(self.set.rowid_cell(self.index)).map_or(default, |c| parse_int64(c))
    }
}
