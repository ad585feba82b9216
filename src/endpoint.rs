//! Transport endpoints: the read/write surface of one socket.
//!
//! An endpoint is either a [`RawEndpoint`], wrapping the connected TCP socket,
//! or a [`DecryptedEndpoint`](crate::tls::DecryptedEndpoint), the plaintext
//! side of a TLS tunnel that owns the raw endpoint. Both carry the single
//! [`WebSocketConnection`] attached to them.

use std::fmt;
use std::future::Future as _;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{Instant, Sleep};

use crate::connection::WebSocketConnection;
use crate::error::{Error, IdleExpired};
use crate::info::ConnectionInfo;
use crate::rt::Scheduler;

/// The read/write surface a [`WebSocketConnection`] runs over.
pub trait Endpoint: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug + 'static {
    /// Addresses of the underlying socket.
    fn info(&self) -> ConnectionInfo;

    /// Current idle timeout.
    fn idle_timeout(&self) -> Option<Duration>;

    /// Replace the idle timeout. The timer restarts from now.
    fn set_idle_timeout(&mut self, timeout: Option<Duration>);

    /// The connection attached to this endpoint, if any.
    fn connection(&self) -> Option<&WebSocketConnection>;

    /// Attach the connection which will read from and write to this endpoint.
    ///
    /// An endpoint carries exactly one connection for its lifetime; a second
    /// call fails with [`Error::AlreadyBound`].
    fn set_connection(&mut self, connection: WebSocketConnection) -> Result<(), Error>;

    /// Whether bytes on this endpoint are decrypted TLS traffic.
    fn is_secure(&self) -> bool {
        false
    }
}

/// Bookkeeping the driving loop keeps for each registered socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectionKey {
    /// Index of the selector managing the socket.
    pub selector: usize,

    /// Registration id within that selector.
    pub id: u64,
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.selector, self.id)
    }
}

struct IdleTimer {
    timeout: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl IdleTimer {
    fn new(scheduler: &Scheduler, timeout: Duration) -> Self {
        Self {
            timeout,
            sleep: Box::pin(scheduler.sleep(timeout)),
        }
    }

    fn touch(&mut self) {
        let deadline = Instant::now() + self.timeout;
        self.sleep.as_mut().reset(deadline);
    }

    fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.sleep.as_mut().poll(cx)
    }
}

/// Endpoint backed directly by a connected TCP socket.
///
/// Reads and writes which stay pending for longer than the idle timeout
/// fail with [`io::ErrorKind::TimedOut`].
pub struct RawEndpoint {
    stream: TcpStream,
    info: ConnectionInfo,
    key: SelectionKey,
    scheduler: Scheduler,
    idle: Option<IdleTimer>,
    connection: Option<WebSocketConnection>,
}

impl fmt::Debug for RawEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawEndpoint")
            .field("info", &self.info)
            .field("key", &self.key)
            .field("idle_timeout", &self.idle_timeout())
            .field("connection", &self.connection.as_ref().map(|c| c.id()))
            .finish()
    }
}

impl RawEndpoint {
    /// Wrap a connected socket.
    pub fn new(
        stream: TcpStream,
        key: SelectionKey,
        scheduler: Scheduler,
        idle_timeout: Option<Duration>,
    ) -> io::Result<Self> {
        let info = ConnectionInfo::new(stream.local_addr()?, stream.peer_addr()?);
        let idle = idle_timeout.map(|timeout| IdleTimer::new(&scheduler, timeout));

        Ok(Self {
            stream,
            info,
            key,
            scheduler,
            idle,
            connection: None,
        })
    }

    /// The remote address, read from the live socket.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Selection bookkeeping for this socket.
    pub fn key(&self) -> SelectionKey {
        self.key
    }

    /// The underlying socket.
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    fn touch(&mut self) {
        if let Some(idle) = self.idle.as_mut() {
            idle.touch();
        }
    }

    fn poll_idle<T>(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<T>> {
        let expired = self
            .idle
            .as_mut()
            .is_some_and(|idle| idle.poll_expired(cx).is_ready());

        if expired {
            tracing::debug!(key = %self.key, "idle timeout expired");
            Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, IdleExpired)))
        } else {
            Poll::Pending
        }
    }

    fn progress<T>(
        &mut self,
        cx: &mut Context<'_>,
        poll: Poll<io::Result<T>>,
    ) -> Poll<io::Result<T>> {
        match poll {
            Poll::Ready(result) => {
                self.touch();
                Poll::Ready(result)
            }
            Poll::Pending => self.poll_idle(cx),
        }
    }
}

impl Endpoint for RawEndpoint {
    fn info(&self) -> ConnectionInfo {
        self.info
    }

    fn idle_timeout(&self) -> Option<Duration> {
        self.idle.as_ref().map(|idle| idle.timeout)
    }

    fn set_idle_timeout(&mut self, timeout: Option<Duration>) {
        self.idle = timeout.map(|timeout| IdleTimer::new(&self.scheduler, timeout));
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
}

impl AsyncRead for RawEndpoint {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.stream).poll_read(cx, buf);
        this.progress(cx, poll)
    }
}

impl AsyncWrite for RawEndpoint {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.stream).poll_write(cx, buf);
        this.progress(cx, poll)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.stream).poll_flush(cx);
        this.progress(cx, poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
