//! Plaintext/TLS listeners and connections.
//!
//! The transport yields full-duplex, ordered, reliable byte streams,
//! optionally wrapped in TLS. Both sides are unified behind a boxed
//! [`AsyncRead`] + [`AsyncWrite`] object so the protocol engines can split
//! them into independent reader and writer halves regardless of whether
//! TLS is in play.

use crate::core::error::{CacheError, CacheResult};
use crate::net::locator::ServerAddress;
use rustls_pki_types::ServerName;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Deadline for the TLS handshake on both sides.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Object-safe alias for a duplex byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A connected, possibly TLS-wrapped stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Accepting side of the transport.
pub struct Listener {
    tcp: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl Listener {
    /// Bind the listener, wrapping accepted connections in TLS when a
    /// server config is supplied.
    pub async fn bind<A: tokio::net::ToSocketAddrs>(
        bind_addr: A,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) -> CacheResult<Self> {
        let tcp = TcpListener::bind(bind_addr).await?;
        Ok(Self {
            tcp,
            tls: tls.map(TlsAcceptor::from),
        })
    }

    /// The actual bound address (relevant when binding port 0).
    pub fn local_addr(&self) -> CacheResult<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    /// Accept one connection and finish the TLS handshake when enabled.
    pub async fn accept(&self) -> CacheResult<(BoxedStream, SocketAddr)> {
        let (stream, peer) = self.tcp.accept().await?;
        stream.set_nodelay(true)?;

        let stream: BoxedStream = match &self.tls {
            None => Box::new(stream),
            Some(acceptor) => {
                let tls_stream = timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream))
                    .await
                    .map_err(|_| CacheError::Timeout(TLS_HANDSHAKE_TIMEOUT))?
                    .map_err(|e| CacheError::Tls(format!("handshake with {peer} failed: {e}")))?;
                Box::new(tls_stream)
            }
        };
        Ok((stream, peer))
    }
}

/// Dial a resolved server address.
///
/// A TLS client config must be supplied exactly when the address says the
/// endpoint speaks TLS.
pub async fn connect(
    addr: &ServerAddress,
    tls: Option<Arc<rustls::ClientConfig>>,
    connect_timeout: Duration,
) -> CacheResult<BoxedStream> {
    if addr.ssl && tls.is_none() {
        return Err(CacheError::Configuration(format!(
            "{} requires TLS but no client TLS config was built",
            addr.dial_addr()
        )));
    }

    let stream = timeout(connect_timeout, TcpStream::connect(addr.dial_addr()))
        .await
        .map_err(|_| CacheError::Timeout(connect_timeout))??;
    stream.set_nodelay(true)?;

    let (true, Some(config)) = (addr.ssl, tls) else {
        return Ok(Box::new(stream));
    };
    let server_name = ServerName::try_from(addr.server_name.clone())
        .map_err(|e| CacheError::Configuration(format!("invalid SNI name: {e}")))?;
    let connector = TlsConnector::from(config);
    let tls_stream = timeout(TLS_HANDSHAKE_TIMEOUT, connector.connect(server_name, stream))
        .await
        .map_err(|_| CacheError::Timeout(TLS_HANDSHAKE_TIMEOUT))?
        .map_err(|e| CacheError::Tls(format!("handshake with {} failed: {e}", addr.dial_addr())))?;
    Ok(Box::new(tls_stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::{read_frame, write_frame};

    fn plain_addr(port: u16) -> ServerAddress {
        ServerAddress {
            host: "127.0.0.1".to_string(),
            port,
            ssl: false,
            server_name: "localhost".to_string(),
        }
    }

    #[tokio::test]
    async fn test_plaintext_accept_and_connect() {
        let listener = Listener::bind("127.0.0.1:0", None).await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (mut stream, _peer) = listener.accept().await.expect("accept");
            let frame = read_frame(&mut stream, 1024).await.unwrap().unwrap();
            write_frame(&mut stream, &frame).await.unwrap();
        });

        let mut stream = connect(&plain_addr(port), None, Duration::from_secs(5))
            .await
            .expect("connect");
        write_frame(&mut stream, b"ping").await.unwrap();
        let echo = read_frame(&mut stream, 1024).await.unwrap().unwrap();
        assert_eq!(&echo[..], b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_ssl_address_requires_tls_config() {
        let addr = ServerAddress {
            ssl: true,
            ..plain_addr(1)
        };
        let err = connect(&addr, None, Duration::from_secs(1))
            .await
            .err()
            .expect("must fail");
        assert!(matches!(err, CacheError::Configuration(_)));
    }
}
