//! Pending connect requests and the future which observes their outcome.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Uri;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::connection::Session;
use crate::error::Error;
use crate::factory::ClientFactory;
use crate::frame::FrameSink;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// WebSocket URI scheme.
///
/// The set is closed: adding a scheme means adding a full transport path to
/// the bootstrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// `ws://`
    Plain,

    /// `wss://`, over TLS.
    Secure,
}

impl Scheme {
    /// Port used when the URI names none.
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Plain => 80,
            Scheme::Secure => 443,
        }
    }

    /// The canonical scheme string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Plain => "ws",
            Scheme::Secure => "wss",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ws") {
            Ok(Scheme::Plain)
        } else if s.eq_ignore_ascii_case("wss") {
            Ok(Scheme::Secure)
        } else {
            Err(Error::UnsupportedScheme(s.to_owned()))
        }
    }
}

/// Where a connect request stands.
#[derive(Debug, Clone)]
pub enum ConnectState {
    /// Not completed yet.
    Pending,

    /// The connection was established.
    Succeeded,

    /// The attempt failed with this error.
    Failed(Error),
}

impl ConnectState {
    /// True unless still pending.
    pub fn is_complete(&self) -> bool {
        !matches!(self, ConnectState::Pending)
    }
}

#[derive(Debug)]
struct Completion {
    state: ConnectState,
    notify: Option<oneshot::Sender<Result<Session, Error>>>,
}

/// One in-flight client connection attempt.
///
/// Carries the target URI, the frame sink for the connection and the
/// factory whose resources the connection will use. Completes exactly once,
/// either with a [`Session`] or with an error, releasing its
/// [`ConnectFuture`].
pub struct ConnectRequest {
    id: u64,
    uri: Uri,
    scheme: Scheme,
    sink: Arc<dyn FrameSink>,
    factory: Arc<ClientFactory>,
    claimed: AtomicBool,
    completion: Mutex<Completion>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectRequest {
    /// Create a request for `uri`, whose frames will go to `sink`.
    ///
    /// The URI must use the `ws` or `wss` scheme (in any case) and name a
    /// host.
    pub fn new(
        uri: Uri,
        sink: Arc<dyn FrameSink>,
        factory: Arc<ClientFactory>,
    ) -> Result<(Arc<Self>, ConnectFuture), Error> {
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| Error::UnsupportedScheme(String::new()))?
            .parse::<Scheme>()?;

        if uri.host().map_or(true, str::is_empty) {
            return Err(Error::InvalidUri(format!("{uri} has no host")));
        }

        let (tx, rx) = oneshot::channel();
        let request = Arc::new(Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            uri,
            scheme,
            sink,
            factory,
            claimed: AtomicBool::new(false),
            completion: Mutex::new(Completion {
                state: ConnectState::Pending,
                notify: Some(tx),
            }),
        });

        Ok((request, ConnectFuture { rx }))
    }

    /// Process-unique id of this request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Target URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Scheme of the target URI.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host to connect to, without IPv6 brackets.
    pub fn host(&self) -> &str {
        self.uri
            .host()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
    }

    /// Port to connect to.
    pub fn port(&self) -> u16 {
        self.uri
            .port_u16()
            .unwrap_or_else(|| self.scheme.default_port())
    }

    /// The sink receiving this connection's frames.
    pub fn sink(&self) -> &Arc<dyn FrameSink> {
        &self.sink
    }

    /// The factory whose resources this connection uses.
    pub fn factory(&self) -> &Arc<ClientFactory> {
        &self.factory
    }

    /// Current state.
    pub fn state(&self) -> ConnectState {
        self.completion.lock().state.clone()
    }

    /// Complete the request with an established session.
    ///
    /// Returns false if the request had already completed.
    pub fn succeeded(&self, session: Session) -> bool {
        self.complete(Ok(session))
    }

    /// Fail the request.
    ///
    /// Returns false if the request had already completed.
    pub fn failed(&self, error: Error) -> bool {
        self.complete(Err(error))
    }

    /// Mark the request as handed to a bootstrapper. Only the first call
    /// returns true.
    pub(crate) fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    fn complete(&self, outcome: Result<Session, Error>) -> bool {
        let mut completion = self.completion.lock();
        if completion.state.is_complete() {
            tracing::trace!(request = self.id, "connect request already completed");
            return false;
        }

        completion.state = match &outcome {
            Ok(_) => ConnectState::Succeeded,
            Err(error) => ConnectState::Failed(error.clone()),
        };
        tracing::trace!(request = self.id, state = ?completion.state, "connect request completed");

        if let Some(notify) = completion.notify.take() {
            // The receiver may have been dropped; the state still records the outcome.
            let _ = notify.send(outcome);
        }
        true
    }
}

/// Resolves when a [`ConnectRequest`] completes.
#[derive(Debug)]
pub struct ConnectFuture {
    rx: oneshot::Receiver<Result<Session, Error>>,
}

impl Future for ConnectFuture {
    type Output = Result<Session, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}
