//! Cursors over query results
//!
//! A cursor produced by [`Session::select`](crate::Session::select) holds the
//! whole result in memory. One produced by
//! [`Session::select_server_side`](crate::Session::select_server_side)
//! holds only the current row and fetches the next one from the server on
//! every forward step.
//!
//! Rows are numbered from 1. Position 0 is before the first row and
//! `num_rows + 1` is after the last; the cursor is at EOF on either.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example(session: &cubesql::Session) -> cubesql::Result<()> {
//! use cubesql::SeekMode;
//!
//! let mut cursor = session.select("SELECT id, name FROM people;").await?;
//! let mut more = cursor.seek(SeekMode::First).await?;
//! while more {
//!     let id = cursor.int64(1, 0)?;
//!     let name = cursor.text(2)?.unwrap_or_default();
//!     println!("{} {}", id, name);
//!     more = cursor.seek(SeekMode::Next).await?;
//! }
//! cursor.free().await?;
//! # Ok(())
//! # }
//! ```

mod result_set;
mod row;

pub use result_set::Column;
pub use row::CursorRow;

pub(crate) use result_set::ResultSet;

use std::sync::Arc;

use bytes::Bytes;

use crate::constants::{cursor_code, BindType, ColumnType};
use crate::error::{Error, Result};
use crate::session::SessionShared;

/// Where [`Cursor::seek`] moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// First row
    First,
    /// Last row
    Last,
    /// One row forward
    Next,
    /// One row back
    Previous,
    /// Absolute 1-based row
    Row(usize),
}

impl TryFrom<i32> for SeekMode {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            cursor_code::SEEK_NEXT => Ok(SeekMode::Next),
            cursor_code::SEEK_FIRST => Ok(SeekMode::First),
            cursor_code::SEEK_LAST => Ok(SeekMode::Last),
            cursor_code::SEEK_PREV => Ok(SeekMode::Previous),
            n if n >= 0 => Ok(SeekMode::Row(n as usize)),
            n => Err(Error::OutOfRange(format!("unknown seek code {}", n))),
        }
    }
}

/// A result set with a row pointer
pub struct Cursor {
    set: ResultSet,
    /// 1-based row number; 0 is before the first row
    position: usize,
    server_side: bool,
    /// Row of the current server batch the cursor rests on
    batch_index: usize,
    server_eof: bool,
    freed: bool,
    link: Option<Arc<SessionShared>>,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("columns", &self.set.num_columns())
            .field("rows", &self.num_rows())
            .field("position", &self.position)
            .field("server_side", &self.server_side)
            .field("freed", &self.freed)
            .finish()
    }
}

impl Cursor {
    pub(crate) fn new(set: ResultSet, server_side: bool, link: Option<Arc<SessionShared>>) -> Self {
        Self {
            set,
            position: 1,
            server_side,
            batch_index: 0,
            server_eof: false,
            freed: false,
            link,
        }
    }

    // =========================================================================
    // Pure queries
    // =========================================================================

    /// Number of rows; `None` for server-side cursors
    pub fn num_rows(&self) -> Option<usize> {
        if self.server_side {
            None
        } else {
            Some(self.set.num_rows())
        }
    }

    /// Number of columns, excluding the hidden rowid column
    pub fn num_columns(&self) -> usize {
        self.set.num_columns()
    }

    /// Column metadata
    pub fn columns(&self) -> &[Column] {
        self.set.columns()
    }

    /// Declared type of a 1-based column
    pub fn column_type(&self, column: usize) -> Option<ColumnType> {
        self.set.column(column).map(|c| c.column_type)
    }

    /// Bind type matching a 1-based column's declared type
    pub fn column_bind_type(&self, column: usize) -> Option<BindType> {
        self.column_type(column).map(ColumnType::bind_type)
    }

    /// Name of a 1-based column
    pub fn column_name(&self, column: usize) -> Option<&str> {
        self.set.column(column).map(|c| c.name.as_str())
    }

    /// Source table of a 1-based column, when the server reported it
    pub fn column_table(&self, column: usize) -> Option<&str> {
        self.set.column(column).and_then(|c| c.table.as_deref())
    }

    /// Whether the server sent a rowid column
    pub fn has_rowid(&self) -> bool {
        self.set.has_rowid()
    }

    /// Current 1-based row number; 0 before the first row
    pub fn current_row(&self) -> usize {
        self.position
    }

    /// Whether the cursor rests outside the rows
    pub fn is_eof(&self) -> bool {
        if self.server_side {
            self.server_eof || self.batch_index >= self.set.num_rows()
        } else {
            self.position == 0 || self.position > self.set.num_rows()
        }
    }

    /// Whether rows are fetched from the server one step at a time
    pub fn is_server_side(&self) -> bool {
        self.server_side
    }

    /// Whether [`free`](Self::free) has been called
    pub fn is_freed(&self) -> bool {
        self.freed
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    fn fail(&self, error: Error) -> Error {
        if let Some(link) = &self.link {
            link.record_error(&error);
        }
        error
    }

    fn check_usable(&self) -> Result<()> {
        if self.freed {
            return Err(self.fail(Error::UseAfterClose("cursor")));
        }
        if self.link.as_ref().is_some_and(|l| l.is_closed()) {
            return Err(self.fail(Error::StaleHandle("cursor")));
        }
        Ok(())
    }

    /// Move the row pointer; returns whether it now rests on a row
    ///
    /// Moving past either end parks the cursor at EOF on that side, so
    /// `Previous` from after the last row lands on the last row again.
    /// Server-side cursors only move forward.
    pub async fn seek(&mut self, mode: SeekMode) -> Result<bool> {
        self.check_usable()?;
        if self.server_side {
            return self.step_server(mode).await;
        }

        let nrows = self.set.num_rows();
        let target = match mode {
            SeekMode::First => 1,
            SeekMode::Last => nrows,
            SeekMode::Next => self.position.saturating_add(1),
            SeekMode::Previous => self.position.saturating_sub(1),
            SeekMode::Row(n) => n,
        };

        if target == 0 {
            self.position = 0;
            return Ok(false);
        }
        if target > nrows {
            self.position = nrows + 1;
            return Ok(false);
        }
        self.position = target;
        Ok(true)
    }

    async fn step_server(&mut self, mode: SeekMode) -> Result<bool> {
        if mode != SeekMode::Next {
            return Err(self.fail(Error::OutOfRange(format!(
                "server-side cursors only move forward, got {:?}",
                mode
            ))));
        }
        if self.is_eof() {
            return Ok(false);
        }

        if self.batch_index + 1 < self.set.num_rows() {
            self.batch_index += 1;
            self.position += 1;
            return Ok(true);
        }

        let link = match &self.link {
            Some(link) => Arc::clone(link),
            None => return Err(Error::StaleHandle("cursor")),
        };
        let more = link.step_cursor(&mut self.set).await?;
        self.batch_index = 0;
        if more && self.set.num_rows() > 0 {
            self.position += 1;
            Ok(true)
        } else {
            self.server_eof = true;
            self.set.clear_rows();
            Ok(false)
        }
    }

    // =========================================================================
    // Field access
    // =========================================================================

    /// A row by 1-based number
    pub fn row(&self, number: usize) -> Result<CursorRow<'_>> {
        self.check_usable()?;
        let limit = self.set.num_rows();
        if self.server_side {
            return Err(self.fail(Error::OutOfRange(
                "server-side cursors only expose the current row".to_string(),
            )));
        }
        if number == 0 || number > limit {
            return Err(self.fail(Error::OutOfRange(format!(
                "row {} out of range (1..={})",
                number, limit
            ))));
        }
        Ok(CursorRow::new(&self.set, number - 1))
    }

    /// The row the cursor rests on
    pub fn current(&self) -> Result<CursorRow<'_>> {
        self.check_usable()?;
        if self.is_eof() {
            return Err(self.fail(Error::OutOfRange("cursor is at EOF".to_string())));
        }
        let index = if self.server_side {
            self.batch_index
        } else {
            self.position - 1
        };
        Ok(CursorRow::new(&self.set, index))
    }

    fn with_current<T>(&self, read: impl FnOnce(CursorRow<'_>) -> Result<T>) -> Result<T> {
        let row = self.current()?;
        read(row).map_err(|e| self.fail(e))
    }

    /// Current row's cell; `None` is NULL
    pub fn field(&self, column: usize) -> Result<Option<Bytes>> {
        self.with_current(|row| row.buffer(column))
    }

    /// Current row's cell as `i32`, or `default` when NULL or empty
    pub fn int(&self, column: usize, default: i32) -> Result<i32> {
        self.with_current(|row| row.int(column, default))
    }

    /// Current row's cell as `i64`, or `default` when NULL or empty
    pub fn int64(&self, column: usize, default: i64) -> Result<i64> {
        self.with_current(|row| row.int64(column, default))
    }

    /// Current row's cell as `f64`, or `default` when NULL or empty
    pub fn double(&self, column: usize, default: f64) -> Result<f64> {
        self.with_current(|row| row.double(column, default))
    }

    /// Current row's cell as text; `None` when NULL
    pub fn text(&self, column: usize) -> Result<Option<String>> {
        self.with_current(|row| row.text(column))
    }

    /// Current row's cell bytes; `None` when NULL
    pub fn buffer(&self, column: usize) -> Result<Option<Bytes>> {
        self.with_current(|row| row.buffer(column))
    }

    /// Current row's id, or `default` when the cursor has no rowid column
    pub fn row_id(&self, default: i64) -> Result<i64> {
        self.with_current(|row| Ok(row.row_id(default)))
    }

    /// Iterate over every row of a materialized cursor
    pub fn rows(&self) -> Result<impl Iterator<Item = CursorRow<'_>>> {
        self.check_usable()?;
        if self.server_side {
            return Err(self.fail(Error::OutOfRange(
                "server-side cursors only expose the current row".to_string(),
            )));
        }
        Ok((0..self.set.num_rows()).map(move |i| CursorRow::new(&self.set, i)))
    }

    /// Release the cursor
    ///
    /// Server-side cursors are closed on the server. Calling `free` twice is
    /// a no-op.
    pub async fn free(&mut self) -> Result<()> {
        if self.freed {
            return Ok(());
        }
        self.freed = true;
        self.set.clear_rows();
        if !self.server_side || self.server_eof {
            return Ok(());
        }
        match &self.link {
            Some(link) if !link.is_closed() => link.close_cursor().await,
            _ => Ok(()),
        }
    }
}

/// Builds a client-side cursor from literal rows
///
/// # Example
///
/// ```rust
/// use cubesql::{ColumnType, CursorBuilder};
///
/// let cursor = CursorBuilder::new()
///     .column("id", ColumnType::Integer)
///     .column("name", ColumnType::Text)
///     .row([Some("1"), Some("alice")])
///     .unwrap()
///     .row([Some("2"), None])
///     .unwrap()
///     .build();
/// assert_eq!(cursor.num_rows(), Some(2));
/// ```
#[derive(Debug, Default)]
pub struct CursorBuilder {
    columns: Vec<Column>,
    rows: Vec<Vec<Option<Bytes>>>,
}

impl CursorBuilder {
    /// Start an empty cursor
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(Column {
            name: name.into(),
            table: None,
            column_type,
        });
        self
    }

    /// Add a row; `None` cells are NULL
    ///
    /// Fails when the row width differs from the column count.
    pub fn row<I, V>(mut self, cells: I) -> Result<Self>
    where
        I: IntoIterator<Item = Option<V>>,
        V: AsRef<[u8]>,
    {
        let row: Vec<Option<Bytes>> = cells
            .into_iter()
            .map(|c| c.map(|v| Bytes::copy_from_slice(v.as_ref())))
            .collect();
        if row.len() != self.columns.len() {
            return Err(Error::OutOfRange(format!(
                "row has {} cells, cursor has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(self)
    }

    /// Finish the cursor, positioned on the first row
    pub fn build(self) -> Cursor {
        let mut set = ResultSet::with_columns(self.columns);
        for row in self.rows {
            set.push_row(row);
        }
        Cursor::new(set, false, None)
    }
}
