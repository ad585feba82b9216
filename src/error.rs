//! Error type shared by the bootstrapper, its connections and the client.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Client error type.
///
/// Errors are cheap to clone: the same value is recorded on the
/// [`ConnectRequest`](crate::ConnectRequest) and returned to whoever drives
/// the socket.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// A `wss` connection was requested but no TLS configuration is set.
    #[error("cannot establish secure transport: no TLS configuration")]
    SecureTransportUnavailable,

    /// The URI scheme is neither `ws` nor `wss`.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The URI can't be used to open a connection (missing host, ...).
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    /// Error occured with the underlying socket.
    #[error("io: {0}")]
    Io(#[source] Arc<io::Error>),

    /// TLS failed, either in configuration or during the handshake.
    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),

    /// The opening handshake was rejected or failed.
    #[error("handshake: {0}")]
    Handshake(#[source] Arc<tungstenite::Error>),

    /// Error occured in the WebSocket protocol after the handshake.
    #[error("protocol: {0}")]
    Protocol(#[source] Arc<tungstenite::Error>),

    /// No bytes moved within the idle timeout.
    #[error("idle timeout")]
    IdleTimeout,

    /// The TCP connection was not established within the connect timeout.
    #[error("connect timeout")]
    ConnectTimeout,

    /// An incoming message exceeds the policy limit for its type.
    #[error("message too large: {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Size of the offending message.
        size: usize,
        /// Limit configured in the policy.
        limit: usize,
    },

    /// The endpoint already has a connection attached.
    #[error("endpoint already bound to a connection")]
    AlreadyBound,

    /// The connect request was already handed to a bootstrapper.
    #[error("connect request already bootstrapped")]
    AlreadyBootstrapped,

    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// The connect request was dropped before it completed.
    #[error("connect request abandoned")]
    Abandoned,

    /// No tokio runtime was available to build the client resources.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl Error {
    /// True for configuration errors, which retrying can't fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::SecureTransportUnavailable
                | Error::UnsupportedScheme(_)
                | Error::InvalidUri(_)
                | Error::Tls(_)
        )
    }

    pub(crate) fn handshake(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::Io(error) => Error::from(error),
            error => Error::Handshake(Arc::new(error)),
        }
    }

    pub(crate) fn protocol(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::Io(error) => Error::from(error),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Error::Closed
            }
            error => Error::Protocol(Arc::new(error)),
        }
    }
}

/// Carried inside the `io::Error` an endpoint returns when its idle timer fires.
#[derive(Debug)]
pub(crate) struct IdleExpired;

impl fmt::Display for IdleExpired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("idle timeout expired")
    }
}

impl std::error::Error for IdleExpired {}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        if error
            .get_ref()
            .is_some_and(|inner| inner.is::<IdleExpired>())
        {
            Error::IdleTimeout
        } else if let Some(tls) = error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        {
            Error::Tls(tls.clone())
        } else {
            Error::Io(Arc::new(error))
        }
    }
}
