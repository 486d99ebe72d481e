//! Cursor reply decoding
//!
//! The first cursor frame is laid out as
//!
//! ```text
//! types[cols] u32 | sizes[rows * cols] i32 | names (cols C strings) | [tables (cols C strings)] | data
//! ```
//!
//! and every following chunk carries only `sizes | data`. A size of `-1`
//! marks a NULL cell, which has no bytes in the data area. When the reply
//! flags a rowid column, it is the first server column and is hidden from
//! the user-visible column numbering.

use bytes::Bytes;

use crate::buffer::ReadBuffer;
use crate::constants::ColumnType;
use crate::error::{Error, Result};
use crate::packet::ReplyHeader;

/// A cursor column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Source table, when the server reports table names
    pub table: Option<String>,
    /// Declared column type
    pub column_type: ColumnType,
}

/// One row of cells; `None` is a NULL cell
pub(crate) type RowCells = Vec<Option<Bytes>>;

/// Column metadata plus row storage
#[derive(Debug, Clone, Default)]
pub(crate) struct ResultSet {
    columns: Vec<Column>,
    has_rowid: bool,
    rows: Vec<RowCells>,
}

impl ResultSet {
    /// Result set with the given columns and no rows
    pub(crate) fn with_columns(columns: Vec<Column>) -> Self {
        Self {
            columns,
            has_rowid: false,
            rows: Vec::new(),
        }
    }

    /// Decode the first frame of a cursor reply
    pub(crate) fn decode(header: &ReplyHeader, payload: Bytes) -> Result<Self> {
        let server_cols = header.cols as usize;
        let nrows = header.rows as usize;
        let has_rowid = header.has_rowid();

        if server_cols == 0 {
            if nrows != 0 {
                return Err(Error::MalformedFrame(format!(
                    "cursor reply has {} rows but no columns",
                    nrows
                )));
            }
            return Ok(Self::default());
        }
        if has_rowid && server_cols < 2 {
            return Err(Error::MalformedFrame(
                "rowid flag set on a cursor without data columns".to_string(),
            ));
        }

        let mut buf = ReadBuffer::new(payload);

        let mut types = Vec::with_capacity(server_cols);
        for _ in 0..server_cols {
            types.push(ColumnType::from(buf.read_u32_be()?));
        }
        let sizes = read_sizes(&mut buf, nrows * server_cols)?;

        let mut names = Vec::with_capacity(server_cols);
        for _ in 0..server_cols {
            names.push(buf.read_cstring()?);
        }
        let mut tables = None;
        if header.has_table_names() {
            let mut list = Vec::with_capacity(server_cols);
            for _ in 0..server_cols {
                list.push(buf.read_cstring()?);
            }
            tables = Some(list);
        }

        let skip = usize::from(has_rowid);
        let columns = (skip..server_cols)
            .map(|i| Column {
                name: names[i].clone(),
                table: tables.as_ref().map(|t| t[i].clone()),
                column_type: types[i],
            })
            .collect();

        let rows = read_rows(&mut buf, &sizes, server_cols)?;
        tracing::trace!(
            rows = rows.len(),
            columns = server_cols - skip,
            rowid = has_rowid,
            "decoded cursor header"
        );

        Ok(Self {
            columns,
            has_rowid,
            rows,
        })
    }

    /// Decode a continuation frame: sizes and data only
    fn decode_rows(&self, header: &ReplyHeader, payload: Bytes) -> Result<Vec<RowCells>> {
        let server_cols = self.server_columns();
        if header.cols as usize != server_cols {
            return Err(Error::MalformedFrame(format!(
                "cursor chunk has {} columns, expected {}",
                header.cols, server_cols
            )));
        }
        let mut buf = ReadBuffer::new(payload);
        let sizes = read_sizes(&mut buf, header.rows as usize * server_cols)?;
        read_rows(&mut buf, &sizes, server_cols)
    }

    /// Append the rows of a continuation chunk
    pub(crate) fn append(&mut self, header: &ReplyHeader, payload: Bytes) -> Result<()> {
        let rows = self.decode_rows(header, payload)?;
        self.rows.extend(rows);
        Ok(())
    }

    /// Replace the stored rows with those of a continuation chunk
    pub(crate) fn replace_rows(&mut self, header: &ReplyHeader, payload: Bytes) -> Result<()> {
        self.rows = self.decode_rows(header, payload)?;
        Ok(())
    }

    /// Drop every stored row
    pub(crate) fn clear_rows(&mut self) {
        self.rows.clear();
    }

    /// Append a client-built row
    pub(crate) fn push_row(&mut self, row: RowCells) {
        self.rows.push(row);
    }

    fn server_columns(&self) -> usize {
        self.columns.len() + usize::from(self.has_rowid)
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub(crate) fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column by 1-based index
    pub(crate) fn column(&self, index: usize) -> Option<&Column> {
        index.checked_sub(1).and_then(|i| self.columns.get(i))
    }

    pub(crate) fn has_rowid(&self) -> bool {
        self.has_rowid
    }

    /// Cell by 0-based row and 1-based column; `Some(None)` is a NULL cell
    pub(crate) fn cell(&self, row: usize, column: usize) -> Option<Option<&Bytes>> {
        if column == 0 || column > self.columns.len() {
            return None;
        }
        let index = column - 1 + usize::from(self.has_rowid);
        self.rows.get(row).map(|cells| cells[index].as_ref())
    }

    /// Rowid cell of a 0-based row
    pub(crate) fn rowid_cell(&self, row: usize) -> Option<&Bytes> {
        if !self.has_rowid {
            return None;
        }
        self.rows.get(row).and_then(|cells| cells[0].as_ref())
    }
}

fn read_sizes(buf: &mut ReadBuffer, count: usize) -> Result<Vec<i32>> {
    if !buf.has_remaining(count.saturating_mul(4)) {
        return Err(Error::MalformedFrame(format!(
            "cursor reply announces {} cells but carries {} bytes",
            count,
            buf.remaining()
        )));
    }
    let mut sizes = Vec::with_capacity(count);
    for _ in 0..count {
        let size = buf.read_i32_be()?;
        if size < -1 {
            return Err(Error::MalformedFrame(format!("invalid cell size {}", size)));
        }
        sizes.push(size);
    }
    Ok(sizes)
}

fn read_rows(buf: &mut ReadBuffer, sizes: &[i32], server_cols: usize) -> Result<Vec<RowCells>> {
    if server_cols == 0 {
        return Ok(Vec::new());
    }
    let mut rows = Vec::with_capacity(sizes.len() / server_cols);
    for row_sizes in sizes.chunks(server_cols) {
        let mut cells = Vec::with_capacity(server_cols);
        for &size in row_sizes {
            if size == -1 {
                cells.push(None);
            } else {
                cells.push(Some(buf.read_bytes(size as usize)?));
            }
        }
        rows.push(cells);
    }
    Ok(rows)
}
