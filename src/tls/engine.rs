use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio_rustls::TlsConnector;

/// A client-side TLS engine for a single connection attempt.
///
/// Built from a rustls [`ClientConfig`], so it only ever speaks the client
/// side of the handshake. The engine is keyed by the peer address seen on
/// the connected socket; the certificate is checked against the server name.
pub struct TlsEngine {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    peer: SocketAddr,
    buffer_limit: Option<usize>,
}

impl fmt::Debug for TlsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsEngine")
            .field("server_name", &self.server_name)
            .field("peer", &self.peer)
            .field("buffer_limit", &self.buffer_limit)
            .finish()
    }
}

impl TlsEngine {
    pub(super) fn new(
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
        peer: SocketAddr,
    ) -> Self {
        Self {
            connector: TlsConnector::from(config),
            server_name,
            peer,
            buffer_limit: None,
        }
    }

    /// Cap the bytes rustls buffers for this connection.
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = Some(limit);
        self
    }

    /// The peer this engine was built for.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The name the server certificate must be valid for.
    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    /// Begin a client handshake over `stream`.
    ///
    /// The returned future makes no progress until polled.
    pub(super) fn connect<IO>(self, stream: IO) -> tokio_rustls::Connect<IO>
    where
        IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let limit = self.buffer_limit;
        self.connector
            .connect_with(self.server_name, stream, |conn| {
                if let Some(limit) = limit {
                    conn.set_buffer_limit(Some(limit));
                }
            })
    }
}
