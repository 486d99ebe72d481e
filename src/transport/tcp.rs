//! TCP connection setup

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Resolve `host` and connect to the first address that accepts
///
/// Resolution and connection share the same deadline.
pub async fn dial(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    let deadline = tokio::time::Instant::now() + connect_timeout;

    let addrs: Vec<SocketAddr> = timeout(connect_timeout, lookup_host((host, port)))
        .await
        .map_err(|_| Error::Timeout(connect_timeout))?
        .map_err(|e| Error::Resolution {
            host: host.to_string(),
            message: e.to_string(),
        })?
        .collect();

    if addrs.is_empty() {
        return Err(Error::Resolution {
            host: host.to_string(),
            message: "no addresses found".to_string(),
        });
    }

    let mut last_error = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match timeout(remaining, TcpStream::connect(addr)).await {
            Err(_) => return Err(Error::Timeout(connect_timeout)),
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).map_err(Error::Io)?;
                tracing::debug!(%addr, "tcp connected");
                return Ok(stream);
            }
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "tcp connect failed");
                last_error = Some(match e.kind() {
                    std::io::ErrorKind::ConnectionRefused => Error::Refused {
                        address: addr.to_string(),
                    },
                    _ => Error::Io(e),
                });
            }
        }
    }

    Err(last_error.unwrap_or(Error::ConnectionClosed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = dial("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(Error::Refused { .. })));
    }

    #[tokio::test]
    async fn test_dial_unresolvable() {
        let result = dial("no-such-host.invalid", 4430, Duration::from_secs(5)).await;
        assert!(matches!(
            result,
            Err(Error::Resolution { .. }) | Err(Error::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = dial("127.0.0.1", port, Duration::from_secs(2)).await.unwrap();
        assert!(stream.nodelay().unwrap());
    }
}
