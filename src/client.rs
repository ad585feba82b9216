//! A WebSocket client built on [`ClientBootstrap`].
//!
//! The client resolves and connects the TCP socket for each request, hands it
//! to the bootstrapper and serves the result on the factory's executor. It is
//! also the [`ConnectionListener`] for everything it opens, so it can report
//! which connections are live.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use http::Uri;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tracing::Instrument as _;

use crate::bootstrap::{ClientBootstrap, ConnectionListener};
use crate::connection::WebSocketConnection;
use crate::endpoint::SelectionKey;
use crate::error::Error;
use crate::factory::ClientFactory;
use crate::frame::FrameSink;
use crate::request::{ConnectFuture, ConnectRequest};
use crate::tls::TlsConfiguration;

#[derive(Debug, Default)]
struct Selector {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, WebSocketConnection>>,
}

impl Selector {
    fn next_key(&self) -> SelectionKey {
        SelectionKey {
            selector: 0,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl ConnectionListener for Selector {
    fn connection_opened(&self, connection: &WebSocketConnection) {
        self.open.lock().insert(connection.id(), connection.clone());
    }

    fn connection_closed(&self, connection: &WebSocketConnection) {
        self.open.lock().remove(&connection.id());
    }
}

/// WebSocket client.
///
/// Cheap to clone; clones share the factory, the bootstrapper and the set of
/// open connections.
#[derive(Clone)]
pub struct WebSocketClient {
    factory: Arc<ClientFactory>,
    bootstrap: Arc<ClientBootstrap>,
    selector: Arc<Selector>,
}

impl fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("factory", &self.factory)
            .field("open", &self.open_connections())
            .finish()
    }
}

impl WebSocketClient {
    /// Create a client using the resources of `factory`.
    pub fn new(factory: ClientFactory) -> Self {
        let bootstrap = ClientBootstrap::from_factory(&factory);
        Self {
            factory: Arc::new(factory),
            bootstrap: Arc::new(bootstrap),
            selector: Arc::default(),
        }
    }

    /// Set the TLS configuration, enabling `wss` connections.
    pub fn with_tls(self, tls: TlsConfiguration) -> Self {
        self.bootstrap.set_tls_configuration(tls);
        self
    }

    /// Replace the TLS configuration.
    ///
    /// Affects connections bootstrapped after this call.
    pub fn set_tls_configuration(&self, tls: impl Into<Option<TlsConfiguration>>) {
        self.bootstrap.set_tls_configuration(tls);
    }

    /// The resources shared by this client's connections.
    pub fn factory(&self) -> &Arc<ClientFactory> {
        &self.factory
    }

    /// Number of connections currently open.
    pub fn open_connections(&self) -> usize {
        self.selector.open.lock().len()
    }

    /// Open a connection to `uri`, delivering incoming frames to `sink`.
    ///
    /// Fails immediately if the URI is not a `ws` or `wss` URI with a host.
    /// Everything else is reported through the returned future.
    pub fn connect(&self, sink: Arc<dyn FrameSink>, uri: Uri) -> Result<ConnectFuture, Error> {
        let (request, future) = ConnectRequest::new(uri, sink, self.factory.clone())?;

        let span = tracing::debug_span!("connect", request = request.id(), uri = %request.uri());
        let task = connect(self.bootstrap.clone(), self.selector.clone(), request);
        self.bootstrap.execute(task.instrument(span));

        Ok(future)
    }
}

async fn connect(
    bootstrap: Arc<ClientBootstrap>,
    selector: Arc<Selector>,
    request: Arc<ConnectRequest>,
) {
    let channel = match open_channel(&bootstrap, &request).await {
        Ok(channel) => channel,
        Err(error) => {
            tracing::debug!(%error, "connect failed");
            request.failed(error);
            return;
        }
    };

    let endpoint = match bootstrap.new_endpoint(channel, selector.next_key()) {
        Ok(endpoint) => endpoint,
        Err(error) => {
            request.failed(error);
            return;
        }
    };

    // On error the request is already failed; dropping the endpoint closes the socket.
    let Ok(connection) = bootstrap.new_connection(endpoint, &request, &*selector) else {
        return;
    };

    let websocket = connection.websocket().cloned();
    if let Err(error) = connection.serve().await {
        tracing::warn!(%error, "connection finished with error");
    }
    if let Some(websocket) = websocket {
        selector.connection_closed(&websocket);
    }
}

async fn open_channel(
    bootstrap: &ClientBootstrap,
    request: &ConnectRequest,
) -> Result<TcpStream, Error> {
    let addr = (request.host(), request.port());
    tracing::trace!(host = addr.0, port = addr.1, "connecting");

    let stream = match bootstrap.policy().connect_timeout() {
        Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectTimeout)?,
        None => TcpStream::connect(addr).await,
    }
    .map_err(|error| Error::Io(Arc::new(error)))?;

    stream.set_nodelay(true)?;
    Ok(stream)
}
