use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::{ClientTlsStream, TlsEngine};
use crate::connection::WebSocketConnection;
use crate::endpoint::{Endpoint, RawEndpoint};
use crate::error::Error;
use crate::info::{ConnectionInfo, TlsConnectionInfo};

/// The plaintext side of a [`TlsConnection`].
///
/// Only created by wrapping a [`RawEndpoint`] in a [`TlsConnection`]; the
/// raw endpoint is owned by the TLS stream underneath.
pub struct DecryptedEndpoint {
    stream: ClientTlsStream<RawEndpoint>,
    info: ConnectionInfo,
    idle_timeout: Option<Duration>,
    connection: Option<WebSocketConnection>,
}

impl fmt::Debug for DecryptedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedEndpoint")
            .field("info", &self.info)
            .field("handshake_complete", &self.stream.is_handshake_complete())
            .field("connection", &self.connection.as_ref().map(|c| c.id()))
            .finish()
    }
}

impl DecryptedEndpoint {
    /// TLS information, available once the handshake has completed.
    pub fn tls_info(&self) -> Option<&TlsConnectionInfo> {
        self.stream.tls_info()
    }

    /// Drive the TLS handshake to completion.
    ///
    /// Otherwise the handshake completes on the first read or write.
    pub async fn finish_handshake(&mut self) -> io::Result<()> {
        self.stream.finish_handshake().await
    }
}

impl Endpoint for DecryptedEndpoint {
    fn info(&self) -> ConnectionInfo {
        self.info
    }

    fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    fn set_idle_timeout(&mut self, timeout: Option<Duration>) {
        self.idle_timeout = timeout;
        if let Some(raw) = self.stream.get_mut() {
            raw.set_idle_timeout(timeout);
        }
    }

    fn connection(&self) -> Option<&WebSocketConnection> {
        self.connection.as_ref()
    }

    fn set_connection(&mut self, connection: WebSocketConnection) -> Result<(), Error> {
        if self.connection.is_some() {
            return Err(Error::AlreadyBound);
        }
        self.connection = Some(connection);
        Ok(())
    }

    fn is_secure(&self) -> bool {
        true
    }
}

impl AsyncRead for DecryptedEndpoint {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for DecryptedEndpoint {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// The encrypted transport of a `wss` connection.
///
/// Owns the raw endpoint (through the TLS stream) and the decrypted endpoint
/// the [`WebSocketConnection`] runs over.
#[derive(Debug)]
pub struct TlsConnection {
    decrypted: DecryptedEndpoint,
    peer: SocketAddr,
}

impl TlsConnection {
    /// Wrap `endpoint` with `engine`.
    ///
    /// The decrypted endpoint starts without a connection; attach one with
    /// [`Endpoint::set_connection`] once it has been built.
    pub fn new(endpoint: RawEndpoint, engine: TlsEngine) -> Self {
        let info = endpoint.info();
        let idle_timeout = endpoint.idle_timeout();
        let peer = engine.peer();

        Self {
            decrypted: DecryptedEndpoint {
                stream: ClientTlsStream::new(endpoint, engine),
                info,
                idle_timeout,
                connection: None,
            },
            peer,
        }
    }

    /// The peer the TLS engine was built for.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The plaintext endpoint.
    pub fn decrypted_endpoint(&self) -> &DecryptedEndpoint {
        &self.decrypted
    }

    /// The plaintext endpoint.
    pub fn decrypted_endpoint_mut(&mut self) -> &mut DecryptedEndpoint {
        &mut self.decrypted
    }

    /// Run the attached connection over the decrypted endpoint.
    pub async fn serve(self) -> Result<(), Error> {
        let connection = self
            .decrypted
            .connection()
            .cloned()
            .ok_or(Error::Closed)?;
        connection.serve(self.decrypted).await
    }
}

#[cfg(all(test, feature = "tls-ring"))]
mod tests {
    use rustls::pki_types::ServerName;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    use super::*;
    use crate::endpoint::tests::{socket_pair, KEY};
    use crate::rt::Scheduler;
    use crate::tls::TlsConfiguration;

    #[tokio::test]
    async fn failed_handshake_stays_failed() {
        let (client, mut server) = socket_pair().await;
        let endpoint =
            RawEndpoint::new(client, KEY, Scheduler::try_current().unwrap(), None).unwrap();
        let engine = TlsConfiguration::from(crate::fixtures::tls_client_config()).new_engine(
            ServerName::try_from("localhost").unwrap(),
            endpoint.peer_addr().unwrap(),
        );
        let mut tunnel = TlsConnection::new(endpoint, engine);

        let reply = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n")
                .await
                .unwrap();
            server
        });

        let decrypted = tunnel.decrypted_endpoint_mut();
        assert!(decrypted.finish_handshake().await.is_err());
        let _server = reply.await.unwrap();

        assert!(decrypted.finish_handshake().await.is_err());

        let mut buf = [0u8; 16];
        assert!(decrypted.read(&mut buf).await.is_err());
        assert!(decrypted.write(b"hello").await.is_err());
        assert!(decrypted.tls_info().is_none());
    }
}
