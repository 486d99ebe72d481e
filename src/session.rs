//! CubeSQL session
//!
//! This module provides the main `Session` type: one authenticated
//! connection to a CubeSQL server plus the statement executor and the binary
//! data channel that run over it.
//!
//! # Example
//!
//! ```rust,no_run
//! use cubesql::{Config, Encryption, Session};
//!
//! # async fn example() -> cubesql::Result<()> {
//! let config = Config::new("localhost", 4430, "admin", "admin")
//!     .encryption(Encryption::Aes256)
//!     .database("inventory");
//! let session = Session::connect(config).await?;
//!
//! session.execute("CREATE TABLE parts (id INTEGER PRIMARY KEY, name TEXT);").await?;
//! let inserted = session.execute("INSERT INTO parts (name) VALUES ('bolt');").await?;
//! assert_eq!(inserted, 1);
//!
//! let cursor = session.select("SELECT id, name FROM parts;").await?;
//! println!("{} rows", cursor.num_rows().unwrap_or(0));
//!
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, RwLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::auth;
use crate::config::Config;
use crate::constants::{client_flags, protocol_version, selector, BindType, Command};
use crate::cursor::{Cursor, CursorRow, ResultSet};
use crate::error::{Error, Result};
use crate::packet::{compress, split_chunks, Chunk, ChunkAssembler, Frame, FrameCodec, ReplyHeader, RequestFrame};
use crate::program::Program;
use crate::statement::BindValue;
use crate::trace::TraceSink;
use crate::transport::{connect_tls, dial, StreamTransport, Transport};

/// Grace period for the reply to a disconnect request
const CLOSE_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

// Session ID counter
static SESSION_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport; the session cannot be used
    Disconnected,
    /// Transport established, login in progress
    Connecting,
    /// Login accepted, session setup in progress
    Authenticated,
    /// Ready for the next request
    Idle,
    /// A request is in flight
    Busy,
}

/// The error code and message of the last operation
///
/// A code of 0 with an empty message means the last operation succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorState {
    /// Server or client error code, see [`Error::code`]
    pub code: i32,
    /// Human readable message
    pub message: String,
}

impl ErrorState {
    /// Check if the state records a failure
    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Cancellation and Deadlines
// =============================================================================

struct CancelState {
    requested: AtomicBool,
    notify: Notify,
}

/// Bounds every blocking read or write by the session timeout and by cancel
pub(crate) struct IoGuard<'a> {
    cancel: &'a CancelState,
    timeout: Duration,
}

impl IoGuard<'_> {
    pub(crate) async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let notified = self.cancel.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.cancel.requested.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            _ = &mut notified => Err(Error::Cancelled),
            result = tokio::time::timeout(self.timeout, op) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(self.timeout)),
            },
        }
    }
}

/// Interrupts a session's in-flight operation from another task
///
/// Obtained from [`Session::cancel_handle`]. Holding a handle does not keep
/// the session alive.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Weak<SessionShared>,
}

impl CancelHandle {
    /// Cancel the session; a no-op once the session is gone
    pub fn cancel(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.cancel();
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("live", &(self.shared.strong_count() > 0))
            .finish()
    }
}

// =============================================================================
// Wire State
// =============================================================================

/// State touched by request/response cycles; guarded by the session mutex
pub(crate) struct SessionInner {
    transport: Option<Box<dyn Transport>>,
    pub(crate) codec: FrameCodec,
}

impl SessionInner {
    fn new(transport: Box<dyn Transport>, codec: FrameCodec) -> Self {
        Self {
            transport: Some(transport),
            codec,
        }
    }

    /// Encode and write one request
    pub(crate) async fn send(&mut self, frame: RequestFrame, guard: &IoGuard<'_>) -> Result<()> {
        let bytes = self.codec.encode(&frame)?;
        tracing::trace!(
            command = ?frame.header.command,
            selector = frame.header.selector,
            size = bytes.len(),
            "send request"
        );
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        guard.run(transport.send(&bytes)).await
    }

    /// Read one reply without opening its payload
    ///
    /// A reply carrying a server error code fails with [`Error::Server`].
    pub(crate) async fn read_raw(&mut self, guard: &IoGuard<'_>) -> Result<(ReplyHeader, Bytes)> {
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        let (header, raw) = guard.run(transport.receive_frame(&self.codec)).await?;
        tracing::trace!(
            code = header.error_code,
            flags = header.flag1,
            size = header.packet_size,
            "read reply"
        );

        if let Some(code) = header.error() {
            let text = match self.codec.open_payload(&header, raw.clone()) {
                Ok(opened) => opened,
                Err(_) => raw,
            };
            let message = String::from_utf8_lossy(&text)
                .trim_end_matches('\0')
                .to_string();
            return Err(Error::server(code, message));
        }
        Ok((header, raw))
    }

    /// Read one reply and open its payload
    pub(crate) async fn read_frame(&mut self, guard: &IoGuard<'_>) -> Result<Frame> {
        let (header, raw) = self.read_raw(guard).await?;
        let payload = self.codec.open_payload(&header, raw)?;
        Ok(Frame::new(header, payload))
    }

    /// Send a request and read its reply
    pub(crate) async fn round_trip(&mut self, frame: RequestFrame, guard: &IoGuard<'_>) -> Result<Frame> {
        self.send(frame, guard).await?;
        self.read_frame(guard).await
    }

    /// Send a header-only request and read its reply
    pub(crate) async fn command(
        &mut self,
        command: Command,
        selector: u8,
        guard: &IoGuard<'_>,
    ) -> Result<Frame> {
        let frame = self.codec.request(command, selector);
        self.round_trip(frame, guard).await
    }

    /// Send a NUL-terminated statement in a single-field frame
    pub(crate) async fn send_statement(
        &mut self,
        command: Command,
        sql: &str,
        flags: u8,
        guard: &IoGuard<'_>,
    ) -> Result<()> {
        let mut frame = self.codec.request(command, selector::NONE).with_statement(sql);
        frame.header.flag1 |= flags;
        self.send(frame, guard).await
    }

    /// Send one data chunk, compressed when that makes it smaller
    async fn send_chunk(
        &mut self,
        command: Command,
        selector: u8,
        bind_type: Option<BindType>,
        data: Bytes,
        try_compress: bool,
        guard: &IoGuard<'_>,
    ) -> Result<()> {
        let mut frame = self.codec.request(command, selector);
        frame.header.flag1 |= client_flags::PARTIAL_PACKET;
        if let Some(bind_type) = bind_type {
            frame.header.flag3 = bind_type as u8;
        }

        let mut body = data;
        if try_compress {
            if let Some(packed) = compress(&body)? {
                frame.header.flag1 |= client_flags::COMPRESSED_PACKET;
                frame.header.expanded_size = body.len() as u32;
                body = Bytes::from(packed);
            }
        }
        let mut frame = frame.with_chunk(body);
        if frame.body.as_ref().is_some_and(|b| b.is_empty()) {
            frame.body = None;
        }
        self.send(frame, guard).await
    }

    /// Read a cursor reply, acknowledging every partial chunk
    ///
    /// Returns the rows and whether the server keeps the cursor open for
    /// stepping.
    pub(crate) async fn read_cursor(&mut self, guard: &IoGuard<'_>) -> Result<(ResultSet, bool)> {
        let mut set: Option<ResultSet> = None;
        let mut server_side = false;
        let mut chunked = false;

        loop {
            let frame = self.read_frame(guard).await?;
            if frame.header.is_end_chunk() {
                break;
            }
            server_side |= frame.header.is_server_side();
            chunked |= frame.header.is_partial() && !server_side;

            match set.as_mut() {
                None => set = Some(ResultSet::decode(&frame.header, frame.payload)?),
                Some(set) => set.append(&frame.header, frame.payload)?,
            }

            if !chunked {
                break;
            }
            let ack = self.codec.request(Command::Chunk, selector::CHUNK_OK);
            self.send(ack, guard).await?;
        }

        let set = set.unwrap_or_default();
        tracing::debug!(
            rows = set.num_rows(),
            columns = set.num_columns(),
            server_side,
            chunked,
            "cursor received"
        );
        Ok((set, server_side))
    }

    /// Fetch the next row of a server-side cursor; false at the end
    async fn step_cursor(&mut self, set: &mut ResultSet, guard: &IoGuard<'_>) -> Result<bool> {
        let frame = self.command(Command::CursorStep, selector::NONE, guard).await?;
        if frame.header.is_end_chunk() {
            return Ok(false);
        }
        set.replace_rows(&frame.header, frame.payload)?;
        Ok(true)
    }

    /// Run a query and read the first column of its first row
    pub(crate) async fn query_int64(&mut self, sql: &str, guard: &IoGuard<'_>) -> Result<i64> {
        self.send_statement(Command::Select, sql, 0, guard).await?;
        let (set, _) = self.read_cursor(guard).await?;
        if set.num_rows() == 0 || set.num_columns() == 0 {
            return Ok(0);
        }
        CursorRow::new(&set, 0).int64(1, 0)
    }
}

// =============================================================================
// Shared Session State
// =============================================================================

/// Session state shared with cursors, programs and cancel handles
pub(crate) struct SessionShared {
    id: u32,
    config: Config,
    inner: Mutex<SessionInner>,
    closed: AtomicBool,
    in_transaction: AtomicBool,
    last_affected: AtomicI64,
    state: StdMutex<SessionState>,
    errors: StdMutex<ErrorState>,
    trace: RwLock<Option<Arc<dyn TraceSink>>>,
    cancel: CancelState,
}

impl SessionShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    fn set_state(&self, state: SessionState) {
        *lock_unpoisoned(&self.state) = state;
    }

    fn state(&self) -> SessionState {
        *lock_unpoisoned(&self.state)
    }

    /// Overwrite the error state with `error`
    pub(crate) fn record_error(&self, error: &Error) {
        let mut errors = lock_unpoisoned(&self.errors);
        errors.code = error.code();
        errors.message = error.to_string();
    }

    fn fail(&self, error: Error) -> Error {
        self.record_error(&error);
        error
    }

    fn clear_errors(&self) {
        *lock_unpoisoned(&self.errors) = ErrorState::default();
    }

    pub(crate) fn trace(&self, sql: &str) {
        let sink = self
            .trace
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(sink) = sink {
            sink.on_trace_line(sql);
        }
    }

    fn cancel(&self) {
        self.cancel.requested.store(true, Ordering::Release);
        self.closed.store(true, Ordering::Release);
        self.set_state(SessionState::Disconnected);
        self.cancel.notify.notify_waiters();
        tracing::debug!(session = self.id, "cancel requested");
    }

    pub(crate) fn guard(&self) -> IoGuard<'_> {
        IoGuard {
            cancel: &self.cancel,
            timeout: self.config.timeout,
        }
    }

    /// Take the session mutex for one operation
    pub(crate) async fn acquire(&self) -> Result<MutexGuard<'_, SessionInner>> {
        let mut inner = self.inner.lock().await;
        if self.is_closed() || inner.transport.is_none() {
            self.teardown(&mut inner);
            return Err(self.fail(Error::ConnectionClosed));
        }
        self.set_state(SessionState::Busy);
        Ok(inner)
    }

    /// Record the outcome of an operation and release the session
    ///
    /// Cancellation and a closed peer tear the transport down; every other
    /// failure leaves the session usable.
    pub(crate) fn settle<T>(&self, inner: &mut SessionInner, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                self.clear_errors();
                self.set_state(SessionState::Idle);
            }
            Err(e) => {
                self.record_error(e);
                if matches!(e, Error::Cancelled | Error::ConnectionClosed) {
                    self.teardown(inner);
                } else {
                    self.set_state(SessionState::Idle);
                }
            }
        }
        result
    }

    fn teardown(&self, inner: &mut SessionInner) {
        if inner.transport.take().is_some() {
            tracing::debug!(session = self.id, "transport released");
        }
        self.closed.store(true, Ordering::Release);
        self.set_state(SessionState::Disconnected);
    }

    pub(crate) async fn step_cursor(&self, set: &mut ResultSet) -> Result<bool> {
        let mut inner = self.acquire().await?;
        let guard = self.guard();
        let result = inner.step_cursor(set, &guard).await;
        self.settle(&mut inner, result)
    }

    pub(crate) async fn close_cursor(&self) -> Result<()> {
        let mut inner = self.acquire().await?;
        let guard = self.guard();
        let result = inner
            .command(Command::CursorClose, selector::NONE, &guard)
            .await
            .map(|_| ());
        self.settle(&mut inner, result)
    }

    /// Affected rows after a statement, per `Config::fetch_changes`
    pub(crate) async fn fetch_changes(&self, inner: &mut SessionInner, guard: &IoGuard<'_>) -> Result<i64> {
        let changes = if self.config.fetch_changes {
            inner.query_int64("SHOW CHANGES;", guard).await?
        } else {
            0
        };
        self.last_affected.store(changes, Ordering::Release);
        Ok(changes)
    }

    pub(crate) fn reset_affected(&self) {
        self.last_affected.store(0, Ordering::Release);
    }
}

// =============================================================================
// Session
// =============================================================================

/// An authenticated connection to a CubeSQL server
///
/// `Session` is `Send` and `Sync`. Operations are serialized internally, so
/// a session can be shared between tasks, but requests never overlap on the
/// wire. [`cancel`](Self::cancel) is the one call that does not wait for the
/// in-flight operation.
pub struct Session {
    shared: Arc<SessionShared>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("config", &self.shared.config)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl Session {
    /// Connect and log in
    ///
    /// Dials the server, wraps the stream in TLS when the encryption mode
    /// asks for it, performs the login and selects `Config::database` when
    /// set.
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let tcp = dial(&config.host, config.port, config.timeout).await?;

        let transport: Box<dyn Transport> = match config.effective_tls_config() {
            Some(tls) => {
                let stream = tokio::time::timeout(config.timeout, connect_tls(tcp, &config.host, &tls))
                    .await
                    .map_err(|_| Error::Timeout(config.timeout))??;
                Box::new(StreamTransport::new(stream))
            }
            None => Box::new(StreamTransport::new(tcp)),
        };

        Self::connect_with_transport(config, transport).await
    }

    /// Log in over an already established transport
    ///
    /// The encryption mode's TLS half is assumed to be handled by the
    /// transport; only payload encryption is negotiated here.
    pub async fn connect_with_transport(config: Config, transport: Box<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let id = SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let version = if config.legacy_protocol {
            protocol_version::V2007
        } else {
            protocol_version::V2011
        };
        let codec = FrameCodec::new(config.max_frame_size)
            .with_timeout_secs(config.timeout_secs())
            .with_protocol_version(version);

        tracing::debug!(
            session = id,
            host = %config.host,
            port = config.port,
            encryption = %config.encryption,
            "connecting"
        );

        let shared = Arc::new(SessionShared {
            id,
            inner: Mutex::new(SessionInner::new(transport, codec)),
            closed: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
            last_affected: AtomicI64::new(0),
            state: StdMutex::new(SessionState::Connecting),
            errors: StdMutex::new(ErrorState::default()),
            trace: RwLock::new(None),
            cancel: CancelState {
                requested: AtomicBool::new(false),
                notify: Notify::new(),
            },
            config,
        });

        {
            let mut inner = shared.inner.lock().await;
            let guard = shared.guard();
            if let Err(e) = auth::login(&mut inner, &guard, &shared.config).await {
                tracing::debug!(session = id, error = %e, "login failed");
                if let Some(mut transport) = inner.transport.take() {
                    let _ = transport.close().await;
                }
                shared.closed.store(true, Ordering::Release);
                shared.set_state(SessionState::Disconnected);
                return Err(e);
            }
        }
        shared.set_state(SessionState::Authenticated);
        tracing::debug!(session = id, "authenticated");

        let session = Session { shared };
        if let Some(database) = session.shared.config.database.clone() {
            if let Err(e) = session.set_database(Some(&database)).await {
                let _ = session.disconnect().await;
                return Err(e);
            }
        }
        session.shared.set_state(SessionState::Idle);
        Ok(session)
    }

    /// Get the session ID
    pub fn id(&self) -> u32 {
        self.shared.id
    }

    /// The configuration the session was opened with
    pub fn config(&self) -> &Config {
        self.shared.config()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Check if the session has lost or released its transport
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Whether a transaction opened by [`begin_transaction`](Self::begin_transaction) is active
    pub fn in_transaction(&self) -> bool {
        self.shared.in_transaction.load(Ordering::Acquire)
    }

    /// Error code and message of the last operation
    pub fn last_error(&self) -> ErrorState {
        lock_unpoisoned(&self.shared.errors).clone()
    }

    /// Reset the error state to `(0, "")`
    pub fn clear_errors(&self) {
        self.shared.clear_errors();
    }

    /// Affected-row count recorded by the last `execute` or `select`
    ///
    /// This is the cached value; [`affected_rows`](Self::affected_rows)
    /// asks the server.
    pub fn last_affected_rows(&self) -> i64 {
        self.shared.last_affected.load(Ordering::Acquire)
    }

    /// Install a sink that sees every SQL string before it is sent
    pub fn set_trace_sink(&self, sink: impl TraceSink + 'static) {
        *self
            .shared
            .trace
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(sink));
    }

    /// Remove the trace sink
    pub fn clear_trace_sink(&self) {
        *self
            .shared
            .trace
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// Interrupt the in-flight operation and disconnect
    ///
    /// The interrupted operation fails with [`Error::Cancelled`]. The
    /// session is unusable afterwards.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// A handle that can cancel this session from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    // =========================================================================
    // Statement Execution
    // =========================================================================

    async fn run_execute(&self, sql: &str, fetch_changes: bool) -> Result<i64> {
        let shared = &self.shared;
        shared.trace(sql);
        let mut inner = shared.acquire().await?;
        let guard = shared.guard();
        let result = async {
            inner.send_statement(Command::Execute, sql, 0, &guard).await?;
            inner.read_frame(&guard).await?;
            if fetch_changes {
                shared.fetch_changes(&mut inner, &guard).await
            } else {
                shared.reset_affected();
                Ok(0)
            }
        }
        .await;
        shared.settle(&mut inner, result)
    }

    /// Execute a statement that returns no rows
    ///
    /// Returns the affected-row count, read with `SHOW CHANGES;` when
    /// `Config::fetch_changes` is set and 0 otherwise.
    pub async fn execute(&self, sql: &str) -> Result<i64> {
        self.run_execute(sql, true).await
    }

    async fn run_select(&self, sql: &str, server_side: bool) -> Result<Cursor> {
        let shared = &self.shared;
        shared.trace(sql);
        let mut inner = shared.acquire().await?;
        let guard = shared.guard();
        let flags = if server_side {
            client_flags::REQUEST_SERVER_SIDE
        } else {
            0
        };
        let result = async {
            inner.send_statement(Command::Select, sql, flags, &guard).await?;
            inner.read_cursor(&guard).await
        }
        .await;
        let (set, server_side) = shared.settle(&mut inner, result)?;
        shared.reset_affected();
        Ok(Cursor::new(set, server_side, Some(Arc::clone(shared))))
    }

    /// Run a query and receive the whole result
    ///
    /// A query matching nothing yields an empty cursor at EOF.
    pub async fn select(&self, sql: &str) -> Result<Cursor> {
        self.run_select(sql, false).await
    }

    /// Run a query whose rows stay on the server until stepped
    ///
    /// Servers that do not support server-side cursors answer with a regular
    /// materialized result.
    pub async fn select_server_side(&self, sql: &str) -> Result<Cursor> {
        self.run_select(sql, true).await
    }

    /// Execute a statement with values bound through the chunk protocol
    ///
    /// Each value travels in its own chunk, so large blobs are not limited
    /// by the statement size.
    pub async fn bind_execute(&self, sql: &str, values: &[BindValue]) -> Result<i64> {
        let shared = &self.shared;
        shared.trace(sql);
        let mut inner = shared.acquire().await?;
        let guard = shared.guard();
        let compress = shared.config.compress_chunks;
        let result = async {
            inner.send_statement(Command::ChunkBind, sql, 0, &guard).await?;
            inner.read_frame(&guard).await?;
            for value in values {
                let (bind_type, data) = value.chunk_payload();
                inner
                    .send_chunk(
                        Command::ChunkBind,
                        selector::BIND_STEP,
                        Some(bind_type),
                        data,
                        compress,
                        &guard,
                    )
                    .await?;
                inner.read_frame(&guard).await?;
            }
            inner
                .command(Command::ChunkBind, selector::BIND_FINALIZE, &guard)
                .await?;
            shared.fetch_changes(&mut inner, &guard).await
        }
        .await;
        shared.settle(&mut inner, result)
    }

    /// Compile a statement into a program on the server
    pub async fn prepare(&self, sql: &str) -> Result<Program> {
        Program::prepare(Arc::clone(&self.shared), sql).await
    }

    // =========================================================================
    // Binary Data Channel
    // =========================================================================

    /// Send one chunk of binary data and wait for the server's ack
    pub async fn send_data(&self, data: impl Into<Bytes>) -> Result<()> {
        let shared = &self.shared;
        let data = data.into();
        let mut inner = shared.acquire().await?;
        let guard = shared.guard();
        let result = async {
            inner
                .send_chunk(
                    Command::Chunk,
                    selector::NONE,
                    None,
                    data,
                    shared.config.compress_chunks,
                    &guard,
                )
                .await?;
            inner.read_frame(&guard).await.map(|_| ())
        }
        .await;
        shared.settle(&mut inner, result)
    }

    /// Close a binary transfer
    pub async fn send_end_data(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.acquire().await?;
        let guard = shared.guard();
        let result = inner
            .command(Command::EndChunk, selector::NONE, &guard)
            .await
            .map(|_| ());
        shared.settle(&mut inner, result)
    }

    /// Send `data` split per `Config::chunk_size`, then the end marker
    pub async fn send_blob(&self, data: impl Into<Bytes>) -> Result<()> {
        let shared = &self.shared;
        let data = data.into();
        let chunks = split_chunks(&data, shared.config.chunk_size);
        tracing::debug!(size = data.len(), chunks = chunks.len(), "sending blob");

        let mut inner = shared.acquire().await?;
        let guard = shared.guard();
        let result = async {
            for chunk in chunks {
                inner
                    .send_chunk(
                        Command::Chunk,
                        selector::NONE,
                        None,
                        chunk.data,
                        shared.config.compress_chunks,
                        &guard,
                    )
                    .await?;
                inner.read_frame(&guard).await?;
            }
            inner
                .command(Command::EndChunk, selector::NONE, &guard)
                .await
                .map(|_| ())
        }
        .await;
        shared.settle(&mut inner, result)
    }

    /// Receive one chunk of binary data and acknowledge it
    ///
    /// Returns the chunk and whether it closes the transfer.
    pub async fn receive_data(&self) -> Result<(Bytes, bool)> {
        let shared = &self.shared;
        let mut inner = shared.acquire().await?;
        let guard = shared.guard();
        let result = receive_chunk(&mut inner, &guard).await;
        shared.settle(&mut inner, result)
    }

    /// Receive chunks until the end marker and return them joined
    pub async fn receive_blob(&self) -> Result<Bytes> {
        let shared = &self.shared;
        let mut inner = shared.acquire().await?;
        let guard = shared.guard();
        let result = receive_all(&mut inner, &guard).await;
        shared.settle(&mut inner, result)
    }

    // =========================================================================
    // Session Commands
    // =========================================================================

    /// Select the current database; `None` unsets it
    ///
    /// A database the server refuses fails with [`Error::NotFound`].
    pub async fn set_database(&self, name: Option<&str>) -> Result<()> {
        let sql = match name {
            Some(name) => format!("USE DATABASE '{}';", name.replace('\'', "''")),
            None => "UNSET CURRENT DATABASE;".to_string(),
        };
        self.run_execute(&sql, false)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                Error::Server { code, message } => {
                    let e = Error::NotFound { code, message };
                    self.shared.record_error(&e);
                    e
                }
                other => other,
            })
    }

    /// Check the server is responsive
    ///
    /// A failed ping is recorded in the error state; the session stays open
    /// unless the transport itself is gone.
    pub async fn ping(&self) -> Result<()> {
        self.run_execute("PING;", false).await.map(|_| ())
    }

    /// Open a transaction
    pub async fn begin_transaction(&self) -> Result<()> {
        self.run_execute("BEGIN TRANSACTION;", false).await?;
        self.shared.in_transaction.store(true, Ordering::Release);
        Ok(())
    }

    /// Commit the open transaction
    pub async fn commit_transaction(&self) -> Result<()> {
        self.run_execute("COMMIT;", false).await?;
        self.shared.in_transaction.store(false, Ordering::Release);
        Ok(())
    }

    /// Roll back the open transaction
    pub async fn rollback_transaction(&self) -> Result<()> {
        self.run_execute("ROLLBACK;", false).await?;
        self.shared.in_transaction.store(false, Ordering::Release);
        Ok(())
    }

    async fn query_scalar(&self, sql: &str, traced: bool) -> Result<i64> {
        let shared = &self.shared;
        if traced {
            shared.trace(sql);
        }
        let mut inner = shared.acquire().await?;
        let guard = shared.guard();
        let result = inner.query_int64(sql, &guard).await;
        shared.settle(&mut inner, result)
    }

    /// Rows changed by the most recent statement (`SELECT changes();`)
    pub async fn changes(&self) -> Result<i64> {
        self.query_scalar("SELECT changes();", false).await
    }

    /// Rows affected by the most recent statement (`SHOW CHANGES;`)
    pub async fn affected_rows(&self) -> Result<i64> {
        self.query_scalar("SHOW CHANGES;", true).await
    }

    /// Row id of the most recent insert (`SHOW LASTROWID;`)
    pub async fn last_inserted_rowid(&self) -> Result<i64> {
        self.query_scalar("SHOW LASTROWID;", true).await
    }

    /// Close the session
    ///
    /// Sends `CLOSE` best-effort, then always releases the transport.
    /// Cursors and programs of this session become stale. Calling it again
    /// is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.transport.is_none() {
            shared.closed.store(true, Ordering::Release);
            shared.set_state(SessionState::Disconnected);
            return Ok(());
        }

        if !shared.cancel.requested.load(Ordering::Acquire) {
            let guard = IoGuard {
                cancel: &shared.cancel,
                timeout: CLOSE_REPLY_TIMEOUT.min(shared.config.timeout),
            };
            let frame = inner.codec.request(Command::Close, selector::NONE);
            if let Err(e) = inner.round_trip(frame, &guard).await {
                tracing::warn!(session = shared.id, error = %e, "close request failed");
            }
        }

        if let Some(mut transport) = inner.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::warn!(session = shared.id, error = %e, "transport shutdown failed");
            }
        }
        shared.closed.store(true, Ordering::Release);
        shared.in_transaction.store(false, Ordering::Release);
        shared.set_state(SessionState::Disconnected);
        shared.clear_errors();
        tracing::debug!(session = shared.id, "disconnected");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Ok(mut inner) = self.shared.inner.try_lock() {
            inner.transport = None;
        }
    }
}

async fn receive_chunk(inner: &mut SessionInner, guard: &IoGuard<'_>) -> Result<(Bytes, bool)> {
    match inner.read_frame(guard).await {
        Ok(frame) => {
            let is_end = frame.header.is_end_chunk();
            let ack = inner.codec.request(Command::Chunk, selector::NONE);
            inner.send(ack, guard).await?;
            Ok((frame.payload, is_end))
        }
        Err(e) => {
            if !matches!(e, Error::Cancelled | Error::ConnectionClosed) {
                let abort = inner.codec.request(Command::Chunk, selector::CHUNK_ABORT);
                if let Err(ack_error) = inner.send(abort, guard).await {
                    tracing::warn!(error = %ack_error, "chunk abort failed");
                }
            }
            Err(e)
        }
    }
}

async fn receive_all(inner: &mut SessionInner, guard: &IoGuard<'_>) -> Result<Bytes> {
    let mut assembler = ChunkAssembler::new();
    loop {
        let (data, is_end) = receive_chunk(inner, guard).await?;
        let chunk = Chunk {
            data,
            is_final: is_end,
        };
        if let Some(blob) = assembler.push(chunk)? {
            return Ok(blob);
        }
    }
}
