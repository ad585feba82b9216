//! The protocol-level WebSocket connection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use http::Uri;
use tokio::sync::mpsc;
use tracing::Instrument as _;

use crate::buffer::BufferPool;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::frame::{Frame, Parser};
use crate::info::ConnectionInfo;
use crate::policy::WebSocketPolicy;
use crate::request::ConnectRequest;
use crate::rt::{Executor, Scheduler};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

struct Inner {
    id: u64,
    info: ConnectionInfo,
    secure: bool,
    request: Arc<ConnectRequest>,
    parser: Parser,
    policy: WebSocketPolicy,
    buffers: BufferPool,
    executor: Executor,
    scheduler: Scheduler,
}

/// A WebSocket connection for one connect request.
///
/// Built against an endpoint, with the request's frame sink bound from the
/// start. The handle is cheap to clone; all clones refer to the same
/// connection.
#[derive(Clone)]
pub struct WebSocketConnection {
    inner: Arc<Inner>,
}

impl fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("id", &self.inner.id)
            .field("uri", self.inner.request.uri())
            .field("info", &self.inner.info)
            .field("secure", &self.inner.secure)
            .finish()
    }
}

impl WebSocketConnection {
    /// Build a connection for `request` over `endpoint`.
    ///
    /// Everything but the endpoint comes from the request's own factory. The
    /// request's frame sink is bound before this returns. The connection is
    /// not attached to the endpoint; that is the caller's next step.
    pub fn new<E: Endpoint + ?Sized>(endpoint: &E, request: Arc<ConnectRequest>) -> Self {
        let factory = request.factory().clone();
        let parser = Parser::bind(
            request.sink().clone(),
            factory.policy().clone(),
            factory.executor(),
        );

        let inner = Inner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            info: endpoint.info(),
            secure: endpoint.is_secure(),
            request,
            parser,
            policy: factory.policy().clone(),
            buffers: *factory.buffers(),
            executor: factory.executor().clone(),
            scheduler: factory.scheduler().clone(),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Process-unique id of this connection.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Addresses of the socket this connection runs over.
    pub fn info(&self) -> ConnectionInfo {
        self.inner.info
    }

    /// Whether this connection runs over a TLS tunnel.
    pub fn is_secure(&self) -> bool {
        self.inner.secure
    }

    /// The request this connection was built for.
    pub fn request(&self) -> &Arc<ConnectRequest> {
        &self.inner.request
    }

    /// The parser, which feeds the bound frame sink.
    pub fn parser(&self) -> &Parser {
        &self.inner.parser
    }

    /// Connection policy.
    pub fn policy(&self) -> &WebSocketPolicy {
        &self.inner.policy
    }

    /// Idle timeout applied to the endpoint while serving.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.inner.policy.idle_timeout()
    }

    /// Buffer sizing.
    pub fn buffers(&self) -> &BufferPool {
        &self.inner.buffers
    }

    /// Executor running this connection's frame dispatch.
    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    /// Timer source for this connection.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Run the connection over `endpoint` until it closes.
    ///
    /// Performs the opening handshake, completes the connect request, then
    /// feeds incoming frames to the parser and writes frames sent through the
    /// [`Session`]. The outcome is also reported to the frame sink.
    pub async fn serve<E: Endpoint>(&self, mut endpoint: E) -> Result<(), Error> {
        let span =
            tracing::debug_span!("websocket", id = self.id(), uri = %self.inner.request.uri());
        endpoint.set_idle_timeout(self.idle_timeout());

        let result = self.run(endpoint).instrument(span).await;
        if let Err(error) = &result {
            self.inner.request.failed(error.clone());
            if !matches!(error, Error::Closed) {
                self.inner.parser.incoming_error(error.clone());
            }
        }
        result
    }

    async fn run<E: Endpoint>(&self, endpoint: E) -> Result<(), Error> {
        let request = &self.inner.request;
        let config = self.inner.policy.websocket_config(&self.inner.buffers);

        let (stream, response) = tokio_tungstenite::client_async_with_config(
            request.uri().clone(),
            endpoint,
            Some(config),
        )
        .await
        .map_err(Error::handshake)?;
        tracing::debug!(status = %response.status(), "websocket handshake finished");

        let (outgoing, mut queued) = mpsc::unbounded_channel();
        let session = Session {
            id: self.id(),
            uri: request.uri().clone(),
            info: self.info(),
            outgoing,
        };
        if !request.succeeded(session) {
            tracing::debug!("connect request already completed, closing");
            return Ok(());
        }

        let (mut writer, mut reader) = stream.split();
        let mut sending = true;
        loop {
            tokio::select! {
                incoming = reader.next() => match incoming {
                    Some(Ok(frame)) => {
                        tracing::trace!(len = frame.len(), "incoming frame");
                        self.inner.parser.incoming_frame(frame)?;
                    }
                    Some(Err(error)) => return Err(Error::protocol(error)),
                    None => {
                        tracing::debug!("connection closed by peer");
                        return Ok(());
                    }
                },
                frame = queued.recv(), if sending => match frame {
                    Some(frame) => writer.send(frame).await.map_err(Error::protocol)?,
                    None => sending = false,
                },
            }
        }
    }
}

/// Handle for sending on an established connection.
///
/// Handed to whoever awaits the [`ConnectFuture`](crate::ConnectFuture).
/// Incoming frames go to the frame sink, not here.
#[derive(Debug, Clone)]
pub struct Session {
    id: u64,
    uri: Uri,
    info: ConnectionInfo,
    outgoing: mpsc::UnboundedSender<Frame>,
}

impl Session {
    /// Id of the connection behind this session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The URI this session connected to.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Addresses of the underlying socket.
    pub fn info(&self) -> ConnectionInfo {
        self.info
    }

    /// Queue a frame for sending.
    pub fn send(&self, frame: Frame) -> Result<(), Error> {
        self.outgoing.send(frame).map_err(|_| Error::Closed)
    }

    /// Start the closing handshake.
    pub fn close(&self) -> Result<(), Error> {
        self.send(Frame::Close(None))
    }

    /// Whether the connection is still accepting frames.
    pub fn is_open(&self) -> bool {
        !self.outgoing.is_closed()
    }
}
