#![warn(missing_docs)]

//! # cubesql
//!
//! An async client for the CubeSQL database server, written in pure Rust.
//!
//! This crate implements the CubeSQL wire protocol: the 32-byte framed
//! request/reply exchange, the clear and AES-encrypted login handshakes,
//! TLS transport, chunked data transfer, server-compiled programs and
//! cursors over query results.
//!
//! ## Features
//!
//! - **Async/await** - Built on Tokio
//! - **Encryption** - AES-128/192/256 payload encryption or TLS via rustls
//! - **Prepared programs** - Compile once, bind and run many times
//! - **Cursors** - Materialized or server-side, with row seeking
//! - **Chunked transfer** - Large blobs split and reassembled transparently
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cubesql::{Config, SeekMode, Session};
//!
//! #[tokio::main]
//! async fn main() -> cubesql::Result<()> {
//!     let config = Config::new("localhost", 4430, "admin", "admin").database("sales");
//!     let session = Session::connect(config).await?;
//!
//!     session.execute("CREATE TABLE parts (id INTEGER PRIMARY KEY, name TEXT);").await?;
//!     let inserted = session.execute("INSERT INTO parts (name) VALUES ('bolt');").await?;
//!     println!("inserted {} row(s)", inserted);
//!
//!     let mut cursor = session.select("SELECT id, name FROM parts;").await?;
//!     while !cursor.is_eof() {
//!         println!("{} {}", cursor.int64(1, 0)?, cursor.text(2)?.unwrap_or_default());
//!         cursor.seek(SeekMode::Next).await?;
//!     }
//!     cursor.free().await?;
//!
//!     session.disconnect().await
//! }
//! ```
//!
//! ## Encrypted Sessions
//!
//! ```rust,no_run
//! use cubesql::{Config, Encryption, Session, TlsConfig};
//!
//! # async fn example() -> cubesql::Result<()> {
//! // Payload encryption negotiated during login
//! let aes = Config::new("db.example.com", 4430, "admin", "secret")
//!     .encryption(Encryption::Aes256);
//! let session = Session::connect(aes).await?;
//!
//! // TLS transport
//! let tls = Config::new("db.example.com", 4430, "admin", "secret")
//!     .encryption(Encryption::Ssl)
//!     .tls_config(TlsConfig::new().with_ca_cert("/etc/cubesql/ca.pem"));
//! let session = Session::connect(tls).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Prepared Programs
//!
//! ```rust,no_run
//! # async fn example(session: &cubesql::Session) -> cubesql::Result<()> {
//! let mut program = session.prepare("INSERT INTO parts (name) VALUES (?1);").await?;
//! program.bind_text(1, "washer").await?;
//! program.execute().await?;
//! program.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cancellation
//!
//! [`Session::cancel_handle`] returns a handle that may be moved to another
//! task. Cancelling aborts the operation in flight with
//! [`Error::Cancelled`] and closes the session.

mod auth;
pub mod buffer;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod cursor;
pub mod error;
pub mod packet;
pub mod program;
pub mod session;
pub mod statement;
pub mod trace;
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use constants::{BindType, ColumnType, Encryption};
pub use cursor::{Column, Cursor, CursorBuilder, CursorRow, SeekMode};
pub use error::{Error, Result};
pub use packet::{Frame, FrameCodec, ReplyHeader, RequestFrame, RequestHeader};
pub use program::Program;
pub use session::{CancelHandle, ErrorState, Session, SessionState};
pub use statement::{BindValue, Statement};
pub use trace::{TraceSink, TracingSink};
pub use transport::{StreamTransport, TlsConfig, Transport};
