//! Mesh TLS dialing for the outbound HTTP client.
//!
//! `MeshDialer` is the capability the mesh hands us: given a logical
//! address it returns an already authenticated TLS stream. `MeshConnector`
//! adapts it to the connector shape hyper's pooled client expects.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::Uri;
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte stream produced by the mesh.
pub trait MeshStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Whether ALPN settled on HTTP/2 for this stream.
    fn negotiated_h2(&self) -> bool {
        false
    }
}

pub type BoxedMeshStream = Box<dyn MeshStream>;

impl MeshStream for tokio::io::DuplexStream {}

impl MeshStream for tokio_rustls::client::TlsStream<tokio::net::TcpStream> {
    fn negotiated_h2(&self) -> bool {
        self.get_ref().1.alpn_protocol() == Some(&b"h2"[..])
    }
}

/// Dial a mutually authenticated TLS connection to a mesh address.
///
/// `address` is `host:port` where host is `<service>.<mesh-domain>`.
pub trait MeshDialer: Send + Sync {
    fn dial_tls(&self, network: &str, address: &str) -> BoxFuture<'static, io::Result<BoxedMeshStream>>;
}

/// Connector for `hyper_util`'s pooled client that routes every dial
/// through the mesh.
#[derive(Clone)]
pub struct MeshConnector {
    dialer: Arc<dyn MeshDialer>,
    handshake_timeout: Duration,
}

impl MeshConnector {
    pub fn new(dialer: Arc<dyn MeshDialer>, handshake_timeout: Duration) -> Self {
        Self {
            dialer,
            handshake_timeout,
        }
    }
}

impl std::fmt::Debug for MeshConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshConnector")
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

impl tower::Service<Uri> for MeshConnector {
    type Response = MeshIo;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<MeshIo, io::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let dialer = Arc::clone(&self.dialer);
        let timeout = self.handshake_timeout;

        Box::pin(async move {
            let address = dial_address(&dst)?;
            tracing::debug!(address = %address, "Dialing upstream through mesh");

            let stream = tokio::time::timeout(timeout, dialer.dial_tls("tcp", &address))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("TLS handshake with {address} timed out after {timeout:?}"),
                    )
                })??;

            Ok(MeshIo::new(stream))
        })
    }
}

fn dial_address(dst: &Uri) -> io::Result<String> {
    let host = dst.host().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("destination `{dst}` has no host"))
    })?;
    let port = dst.port_u16().unwrap_or(match dst.scheme_str() {
        Some("http") => 80,
        _ => 443,
    });
    Ok(format!("{host}:{port}"))
}

/// A mesh stream wrapped for hyper's I/O traits.
pub struct MeshIo {
    inner: TokioIo<BoxedMeshStream>,
    h2: bool,
}

impl MeshIo {
    pub fn new(stream: BoxedMeshStream) -> Self {
        let h2 = stream.negotiated_h2();
        Self {
            inner: TokioIo::new(stream),
            h2,
        }
    }
}

impl Connection for MeshIo {
    fn connected(&self) -> Connected {
        let connected = Connected::new();
        if self.h2 {
            connected.negotiated_h2()
        } else {
            connected
        }
    }
}

impl hyper::rt::Read for MeshIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        hyper::rt::Read::poll_read(Pin::new(&mut self.inner), cx, buf)
    }
}

impl hyper::rt::Write for MeshIo {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        hyper::rt::Write::poll_write(Pin::new(&mut self.inner), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_flush(Pin::new(&mut self.inner), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_shutdown(Pin::new(&mut self.inner), cx)
    }

    fn is_write_vectored(&self) -> bool {
        hyper::rt::Write::is_write_vectored(&self.inner)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        hyper::rt::Write::poll_write_vectored(Pin::new(&mut self.inner), cx, bufs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tower::Service;

    #[derive(Default)]
    struct RecordingDialer {
        addresses: Mutex<Vec<(String, String)>>,
    }

    impl MeshDialer for RecordingDialer {
        fn dial_tls(&self, network: &str, address: &str) -> BoxFuture<'static, io::Result<BoxedMeshStream>> {
            self.addresses
                .lock()
                .unwrap()
                .push((network.to_string(), address.to_string()));
            Box::pin(async {
                let (client, _server) = tokio::io::duplex(64);
                Ok(Box::new(client) as BoxedMeshStream)
            })
        }
    }

    struct HangingDialer;

    impl MeshDialer for HangingDialer {
        fn dial_tls(&self, _: &str, _: &str) -> BoxFuture<'static, io::Result<BoxedMeshStream>> {
            Box::pin(futures_util::future::pending())
        }
    }

    #[test]
    fn https_destinations_default_to_443() {
        let uri: Uri = "https://api.service.consul/v1".parse().unwrap();
        assert_eq!(dial_address(&uri).unwrap(), "api.service.consul:443");

        let uri: Uri = "https://api.service.consul:9443/".parse().unwrap();
        assert_eq!(dial_address(&uri).unwrap(), "api.service.consul:9443");
    }

    #[tokio::test]
    async fn connector_dials_through_the_mesh() {
        let dialer = Arc::new(RecordingDialer::default());
        let mut connector = MeshConnector::new(dialer.clone(), Duration::from_secs(1));

        let io = connector
            .call("https://web.service.consul/".parse().unwrap())
            .await
            .unwrap();
        assert!(!io.connected().is_negotiated_h2());

        let addresses = dialer.addresses.lock().unwrap();
        assert_eq!(
            addresses.as_slice(),
            &[("tcp".to_string(), "web.service.consul:443".to_string())]
        );
    }

    #[tokio::test]
    async fn connector_bounds_the_handshake() {
        let mut connector = MeshConnector::new(Arc::new(HangingDialer), Duration::from_millis(50));
        let err = connector
            .call("https://web.service.consul/".parse().unwrap())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
