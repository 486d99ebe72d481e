//! Transport layer for CubeSQL connections
//!
//! Handles the byte stream underneath the frame codec: plain TCP or TLS over
//! TCP. Anything that is `AsyncRead + AsyncWrite` can carry a session, which
//! is how the tests drive the client over in-memory pipes.

mod tcp;
pub mod tls;

pub use tcp::dial;
pub use tls::{connect_tls, TlsConfig};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::HEADER_SIZE;
use crate::error::{Error, Result};
use crate::packet::{FrameCodec, ReplyHeader};

/// Trait for transport implementations
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Send raw bytes to the server
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `n` bytes
    async fn read_exact(&mut self, n: usize) -> Result<Bytes>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;

    /// Receive one reply: header plus raw (still sealed) payload
    async fn receive_frame(&mut self, codec: &FrameCodec) -> Result<(ReplyHeader, Bytes)> {
        let header_bytes = self.read_exact(HEADER_SIZE).await?;
        let header = ReplyHeader::parse(&header_bytes)?;
        let size = codec.check_reply(&header)?;
        let payload = if size > 0 {
            self.read_exact(size).await?
        } else {
            Bytes::new()
        };
        Ok((header, payload))
    }
}

/// Transport over any async byte stream
pub struct StreamTransport<S> {
    stream: Option<S>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a connected stream
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut S> {
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }
}

impl<S> std::fmt::Debug for StreamTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("connected", &self.stream.is_some())
            .finish()
    }
}

#[async_trait::async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(data).await.map_err(map_io)?;
        stream.flush().await.map_err(map_io)?;
        Ok(())
    }

    async fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        let stream = self.stream_mut()?;
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).await.map_err(map_io)?;
        Ok(Bytes::from(buf))
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.map_err(map_io)?;
        }
        Ok(())
    }
}

fn map_io(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
        _ => Error::Io(e),
    }
}
