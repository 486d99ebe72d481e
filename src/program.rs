//! Prepared programs
//!
//! A program is a statement compiled once on the server and run any number
//! of times with fresh parameter values. Parameters are addressed by 1-based
//! ordinal and checked against the marker count of the statement before any
//! request is sent.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example(session: &cubesql::Session) -> cubesql::Result<()> {
//! let mut program = session.prepare("INSERT INTO parts (id, name) VALUES (?1, ?2);").await?;
//! for (id, name) in [(1, "bolt"), (2, "nut")] {
//!     program.bind_int(1, id).await?;
//!     program.bind_text(2, name).await?;
//!     program.execute().await?;
//! }
//! program.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bytes::Bytes;

use crate::constants::{selector, Command};
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::session::SessionShared;
use crate::statement::{BindValue, Statement};

/// Largest ordinal the 16-bit header field can carry
const MAX_BIND_ORDINAL: usize = u16::MAX as usize;

/// A server-compiled statement
pub struct Program {
    link: Arc<SessionShared>,
    statement: Statement,
    bindings: Vec<Option<BindValue>>,
    closed: bool,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("sql", &self.statement.sql())
            .field("param_count", &self.statement.param_count())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Program {
    /// Compile `sql` on the server
    ///
    /// A statement the server rejects fails with [`Error::Compile`].
    pub(crate) async fn prepare(link: Arc<SessionShared>, sql: &str) -> Result<Self> {
        let statement = Statement::new(sql);
        link.trace(sql);

        let mut inner = link.acquire().await?;
        let guard = link.guard();
        let result = async {
            inner.send_statement(Command::VmPrepare, sql, 0, &guard).await?;
            inner.read_frame(&guard).await.map(|_| ())
        }
        .await
        .map_err(|e| match e {
            Error::Server { code, message } => Error::Compile { code, message },
            other => other,
        });
        link.settle(&mut inner, result)?;
        drop(inner);

        tracing::debug!(params = statement.param_count(), "program prepared");
        let bindings = vec![None; statement.param_count()];
        Ok(Self {
            link,
            statement,
            bindings,
            closed: false,
        })
    }

    /// The statement text
    pub fn sql(&self) -> &str {
        self.statement.sql()
    }

    /// Number of parameters the statement expects
    pub fn param_count(&self) -> usize {
        self.statement.param_count()
    }

    /// Value last bound to a 1-based ordinal
    pub fn bound(&self, index: usize) -> Option<&BindValue> {
        index
            .checked_sub(1)
            .and_then(|i| self.bindings.get(i))
            .and_then(Option::as_ref)
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn fail(&self, error: Error) -> Error {
        self.link.record_error(&error);
        error
    }

    fn check_usable(&self) -> Result<()> {
        if self.closed {
            return Err(self.fail(Error::UseAfterClose("program")));
        }
        if self.link.is_closed() {
            return Err(self.fail(Error::StaleHandle("program")));
        }
        Ok(())
    }

    /// Bind a value to a 1-based parameter ordinal
    ///
    /// Rebinding an ordinal replaces its value. Ordinals above 65535 do not
    /// fit the header field and fail with [`Error::BindRange`].
    pub async fn bind(&mut self, index: usize, value: impl Into<BindValue>) -> Result<()> {
        self.check_usable()?;
        let count = self.statement.param_count().min(MAX_BIND_ORDINAL);
        if index == 0 || index > count {
            return Err(self.fail(Error::BindRange { index, count }));
        }
        let value = value.into();
        let expanded_size = match value {
            BindValue::ZeroBlob(len) => u32::try_from(len).map_err(|_| {
                self.fail(Error::OutOfRange(format!(
                    "zero-blob of {} bytes exceeds the {} byte limit",
                    len,
                    u32::MAX
                )))
            })?,
            _ => 0,
        };

        let link = &self.link;
        let mut inner = link.acquire().await?;
        let guard = link.guard();

        let mut frame = inner.codec.request(Command::VmBind, selector::NONE);
        frame.header.flag3 = value.bind_type() as u8;
        frame.header.reserved1 = index as u16;
        frame.header.expanded_size = expanded_size;
        if let Some(payload) = value.vm_payload() {
            frame = frame.with_fields(&[&payload]);
        }

        let result = inner.round_trip(frame, &guard).await.map(|_| ());
        link.settle(&mut inner, result)?;
        self.bindings[index - 1] = Some(value);
        Ok(())
    }

    /// Bind a 32-bit integer
    pub async fn bind_int(&mut self, index: usize, value: i32) -> Result<()> {
        self.bind(index, BindValue::Int32(value)).await
    }

    /// Bind a 64-bit integer
    pub async fn bind_int64(&mut self, index: usize, value: i64) -> Result<()> {
        self.bind(index, BindValue::Int64(value)).await
    }

    /// Bind a double
    pub async fn bind_double(&mut self, index: usize, value: f64) -> Result<()> {
        self.bind(index, BindValue::Double(value)).await
    }

    /// Bind text
    pub async fn bind_text(&mut self, index: usize, value: &str) -> Result<()> {
        self.bind(index, BindValue::Text(value.to_string())).await
    }

    /// Bind raw bytes
    pub async fn bind_blob(&mut self, index: usize, value: impl Into<Bytes>) -> Result<()> {
        self.bind(index, BindValue::Blob(value.into())).await
    }

    /// Bind NULL
    pub async fn bind_null(&mut self, index: usize) -> Result<()> {
        self.bind(index, BindValue::Null).await
    }

    /// Bind a zero-filled blob of `len` bytes
    pub async fn bind_zeroblob(&mut self, index: usize, len: usize) -> Result<()> {
        self.bind(index, BindValue::ZeroBlob(len)).await
    }

    /// Run the program; returns the affected-row count
    pub async fn execute(&mut self) -> Result<i64> {
        self.check_usable()?;
        let link = &self.link;
        let mut inner = link.acquire().await?;
        let guard = link.guard();
        let result = async {
            inner.command(Command::VmExecute, selector::NONE, &guard).await?;
            link.fetch_changes(&mut inner, &guard).await
        }
        .await;
        link.settle(&mut inner, result)
    }

    /// Run the program and return its rows
    pub async fn select(&mut self) -> Result<Cursor> {
        self.check_usable()?;
        let link = &self.link;
        let mut inner = link.acquire().await?;
        let guard = link.guard();
        let result = async {
            let frame = inner.codec.request(Command::VmSelect, selector::NONE);
            inner.send(frame, &guard).await?;
            inner.read_cursor(&guard).await
        }
        .await;
        let (set, server_side) = link.settle(&mut inner, result)?;
        link.reset_affected();
        Ok(Cursor::new(set, server_side, Some(Arc::clone(link))))
    }

    /// Release the program on the server
    ///
    /// Calling `close` twice is a no-op. On a disconnected session the
    /// program is only marked closed.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.link.is_closed() {
            return Ok(());
        }
        let link = &self.link;
        let mut inner = link.acquire().await?;
        let guard = link.guard();
        let result = inner
            .command(Command::VmClose, selector::NONE, &guard)
            .await
            .map(|_| ());
        link.settle(&mut inner, result)
    }
}
