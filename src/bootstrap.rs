//! Bootstrapping a WebSocket connection on a freshly connected socket.
//!
//! The driving loop hands each connected socket to [`ClientBootstrap::new_endpoint`]
//! and the resulting endpoint, with its [`ConnectRequest`], to
//! [`ClientBootstrap::new_connection`]. The scheme of the request decides the
//! shape of what comes back:
//!
//! - `ws://`: the [`WebSocketConnection`] itself, attached to the raw endpoint.
//! - `wss://`: a [`TlsConnection`] wrapping the raw endpoint, whose decrypted
//!   endpoint carries the [`WebSocketConnection`].
//!
//! Any failure fails the request with the same error that is returned, and
//! the caller is expected to drop the socket.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::buffer::BufferPool;
use crate::connection::WebSocketConnection;
use crate::endpoint::{Endpoint, RawEndpoint, SelectionKey};
use crate::error::Error;
use crate::factory::ClientFactory;
use crate::policy::WebSocketPolicy;
use crate::request::{ConnectRequest, Scheme};
use crate::rt::{Executor, Scheduler};
use crate::tls::{TlsConfiguration, TlsConnection, TlsEngine};

/// Lifecycle hooks of the driving loop.
pub trait ConnectionListener: Send + Sync {
    /// A connection was built and is about to be handed to the driving loop.
    ///
    /// Called exactly once per successful bootstrap, with the frame sink
    /// already bound.
    fn connection_opened(&self, connection: &WebSocketConnection);

    /// A connection finished serving.
    fn connection_closed(&self, connection: &WebSocketConnection) {
        let _ = connection;
    }
}

/// The transport object the driving loop runs for one connection.
#[derive(Debug)]
pub enum ClientConnection {
    /// A `ws://` connection: the protocol connection itself, over the raw
    /// endpoint it is attached to.
    WebSocket {
        /// The protocol connection.
        connection: WebSocketConnection,
        /// The raw endpoint carrying `connection`.
        endpoint: RawEndpoint,
    },

    /// A `wss://` connection: the encrypted transport, whose decrypted
    /// endpoint carries the protocol connection.
    Tls(TlsConnection),
}

impl ClientConnection {
    /// The protocol connection, however it is transported.
    pub fn websocket(&self) -> Option<&WebSocketConnection> {
        match self {
            ClientConnection::WebSocket { connection, .. } => Some(connection),
            ClientConnection::Tls(tls) => tls.decrypted_endpoint().connection(),
        }
    }

    /// Whether this connection runs over TLS.
    pub fn is_secure(&self) -> bool {
        matches!(self, ClientConnection::Tls(_))
    }

    /// Run the connection until it closes.
    pub async fn serve(self) -> Result<(), Error> {
        match self {
            ClientConnection::WebSocket {
                connection,
                endpoint,
            } => connection.serve(endpoint).await,
            ClientConnection::Tls(tls) => tls.serve().await,
        }
    }
}

/// Builds endpoints and connections for connected client sockets.
///
/// Holds its own executor, scheduler, policy and buffers for the transport
/// layer (endpoints and TLS tunnels). Protocol connections take theirs from
/// the factory of each request, so one bootstrapper can serve requests from
/// many differently configured clients.
pub struct ClientBootstrap {
    executor: Executor,
    scheduler: Scheduler,
    policy: WebSocketPolicy,
    buffers: BufferPool,
    tls: RwLock<Option<TlsConfiguration>>,
}

impl fmt::Debug for ClientBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBootstrap")
            .field("policy", &self.policy)
            .field("buffers", &self.buffers)
            .field("tls", &self.tls.read().is_some())
            .finish()
    }
}

impl ClientBootstrap {
    /// Create a bootstrapper without TLS configuration.
    pub fn new(
        executor: Executor,
        scheduler: Scheduler,
        policy: WebSocketPolicy,
        buffers: BufferPool,
    ) -> Self {
        Self {
            executor,
            scheduler,
            policy,
            buffers,
            tls: RwLock::new(None),
        }
    }

    /// Create a bootstrapper sharing the resources of `factory`.
    pub fn from_factory(factory: &ClientFactory) -> Self {
        Self::new(
            factory.executor().clone(),
            factory.scheduler().clone(),
            factory.policy().clone(),
            *factory.buffers(),
        )
    }

    /// Set the TLS configuration used for `wss` connections.
    ///
    /// Attempts bootstrapped before this is set fail with
    /// [`Error::SecureTransportUnavailable`].
    pub fn set_tls_configuration(&self, tls: impl Into<Option<TlsConfiguration>>) {
        *self.tls.write() = tls.into();
    }

    /// The TLS configuration, if set.
    pub fn tls_configuration(&self) -> Option<TlsConfiguration> {
        self.tls.read().clone()
    }

    /// Transport policy.
    pub fn policy(&self) -> &WebSocketPolicy {
        &self.policy
    }

    /// Run a task on the bootstrapper's executor.
    pub fn execute<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.executor.execute(task)
    }

    /// Wrap a connected socket in a raw endpoint.
    ///
    /// The idle timeout comes from the bootstrapper's policy.
    pub fn new_endpoint(
        &self,
        channel: TcpStream,
        key: SelectionKey,
    ) -> Result<RawEndpoint, Error> {
        tracing::debug!(%key, "new endpoint");
        let endpoint = RawEndpoint::new(
            channel,
            key,
            self.scheduler.clone(),
            self.policy.idle_timeout(),
        )?;
        Ok(endpoint)
    }

    /// Build the transport object for `request` on `endpoint`.
    ///
    /// On success `listener` has been told about the new protocol connection.
    /// On failure the request has been failed with the returned error.
    ///
    /// A request can only be bootstrapped once; later calls return
    /// [`Error::AlreadyBootstrapped`] and leave the request untouched.
    pub fn new_connection(
        &self,
        endpoint: RawEndpoint,
        request: &Arc<ConnectRequest>,
        listener: &dyn ConnectionListener,
    ) -> Result<ClientConnection, Error> {
        let span =
            tracing::debug_span!("bootstrap", request = request.id(), uri = %request.uri());
        let _enter = span.enter();

        if !request.claim() {
            tracing::warn!("connect request bootstrapped twice");
            return Err(Error::AlreadyBootstrapped);
        }

        match self.dispatch(endpoint, request, listener) {
            Ok(connection) => Ok(connection),
            Err(error) => {
                tracing::debug!(%error, "bootstrap failed");
                request.failed(error.clone());
                Err(error)
            }
        }
    }

    fn dispatch(
        &self,
        mut endpoint: RawEndpoint,
        request: &Arc<ConnectRequest>,
        listener: &dyn ConnectionListener,
    ) -> Result<ClientConnection, Error> {
        match request.scheme() {
            Scheme::Secure => {
                let Some(tls) = self.tls_configuration() else {
                    return Err(Error::SecureTransportUnavailable);
                };

                let engine = self.new_tls_engine(&tls, &endpoint, request)?;
                let mut tunnel = TlsConnection::new(endpoint, engine);

                let connection =
                    self.new_websocket_connection(tunnel.decrypted_endpoint(), request);
                tunnel
                    .decrypted_endpoint_mut()
                    .set_connection(connection.clone())?;

                tracing::debug!(
                    connection = connection.id(),
                    peer = %tunnel.peer(),
                    "secure connection opened"
                );
                listener.connection_opened(&connection);
                Ok(ClientConnection::Tls(tunnel))
            }
            Scheme::Plain => {
                let connection = self.new_websocket_connection(&endpoint, request);
                endpoint.set_connection(connection.clone())?;

                tracing::debug!(connection = connection.id(), "connection opened");
                listener.connection_opened(&connection);
                Ok(ClientConnection::WebSocket {
                    connection,
                    endpoint,
                })
            }
        }
    }

    /// Build a client TLS engine for the peer `endpoint` is connected to.
    ///
    /// The peer address is read from the socket, not from the request URI.
    /// The server certificate is verified against the request's host.
    pub fn new_tls_engine(
        &self,
        tls: &TlsConfiguration,
        endpoint: &RawEndpoint,
        request: &ConnectRequest,
    ) -> Result<TlsEngine, Error> {
        let peer = endpoint.peer_addr()?;
        let server_name = ServerName::try_from(request.host())
            .map_err(|_| Error::InvalidUri(format!("invalid server name {}", request.host())))?
            .to_owned();

        tracing::trace!(%peer, server_name = request.host(), "new tls engine");
        Ok(tls
            .new_engine(server_name, peer)
            .with_buffer_limit(self.buffers.buffer_limit()))
    }

    /// Build the protocol connection for `request` over `endpoint`.
    ///
    /// Uses the request's factory, not the bootstrapper's resources. The
    /// request's frame sink is bound before this returns.
    pub fn new_websocket_connection<E: Endpoint + ?Sized>(
        &self,
        endpoint: &E,
        request: &Arc<ConnectRequest>,
    ) -> WebSocketConnection {
        WebSocketConnection::new(endpoint, request.clone())
    }
}
