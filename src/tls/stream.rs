//! Client-side TLS stream which completes its handshake lazily and records
//! information about the connection once the handshake is done.

use core::task::{ready, Context, Poll};
use std::{fmt, io};
use std::{future::Future, pin::Pin};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::TlsEngine;
use crate::info::TlsConnectionInfo;

enum State<IO> {
    Handshake(tokio_rustls::Connect<IO>),
    Streaming(tokio_rustls::client::TlsStream<IO>),
    Failed,
}

impl<IO> fmt::Debug for State<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Handshake(_) => f.write_str("State::Handshake"),
            State::Streaming(_) => write!(f, "State::Streaming"),
            State::Failed => f.write_str("State::Failed"),
        }
    }
}

/// A TLS stream, generic over the underlying IO.
///
/// This stream implements a delayed handshake, where the handshake won't be
/// completed until the first read/write request to the underlying stream.
#[derive(Debug)]
pub struct ClientTlsStream<IO> {
    state: State<IO>,
    tls: Option<TlsConnectionInfo>,
}

impl<IO> ClientTlsStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `stream` with `engine`. No I/O happens here.
    pub fn new(stream: IO, engine: TlsEngine) -> Self {
        Self {
            state: State::Handshake(engine.connect(stream)),
            tls: None,
        }
    }

    /// TLS information, available once the handshake has completed.
    pub fn tls_info(&self) -> Option<&TlsConnectionInfo> {
        self.tls.as_ref()
    }

    /// Whether the handshake has completed.
    pub fn is_handshake_complete(&self) -> bool {
        matches!(self.state, State::Streaming(_))
    }

    /// The wrapped stream, unless a failed handshake dropped it.
    pub fn get_ref(&self) -> Option<&IO> {
        match &self.state {
            State::Handshake(connect) => connect.get_ref(),
            State::Streaming(stream) => Some(stream.get_ref().0),
            State::Failed => None,
        }
    }

    /// The wrapped stream, unless a failed handshake dropped it.
    pub fn get_mut(&mut self) -> Option<&mut IO> {
        match &mut self.state {
            State::Handshake(connect) => connect.get_mut(),
            State::Streaming(stream) => Some(stream.get_mut().0),
            State::Failed => None,
        }
    }

    /// Finish the TLS handshake.
    pub async fn finish_handshake(&mut self) -> io::Result<()> {
        futures_util::future::poll_fn(|cx| self.handshake(cx, |_, _| Poll::Ready(Ok(())))).await
    }

    fn handshake<F, R>(&mut self, cx: &mut Context, action: F) -> Poll<io::Result<R>>
    where
        F: FnOnce(&mut tokio_rustls::client::TlsStream<IO>, &mut Context) -> Poll<io::Result<R>>,
    {
        match self.state {
            State::Handshake(ref mut connect) => match ready!(Pin::new(connect).poll(cx)) {
                Ok(mut stream) => {
                    let (_, client_info) = stream.get_ref();
                    let info = TlsConnectionInfo::client(client_info);
                    tracing::debug!(
                        version = ?info.protocol_version,
                        alpn = ?info.alpn,
                        "tls handshake finished"
                    );
                    self.tls = Some(info);

                    let result = action(&mut stream, cx);
                    self.state = State::Streaming(stream);
                    result
                }
                Err(err) => {
                    tracing::debug!(error = %err, "tls handshake failed");
                    self.state = State::Failed;
                    Poll::Ready(Err(err))
                }
            },
            State::Streaming(ref mut stream) => action(stream, cx),
            State::Failed => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "tls handshake failed",
            ))),
        }
    }
}

impl<IO> AsyncRead for ClientTlsStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf,
    ) -> Poll<io::Result<()>> {
        let pin = self.get_mut();
        pin.handshake(cx, |stream, cx| Pin::new(stream).poll_read(cx, buf))
    }
}

impl<IO> AsyncWrite for ClientTlsStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let pin = self.get_mut();
        pin.handshake(cx, |stream, cx| Pin::new(stream).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        let pin = self.get_mut();
        pin.handshake(cx, |stream, cx| Pin::new(stream).poll_flush(cx))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), io::Error>> {
        match self.get_mut().state {
            State::Handshake(_) | State::Failed => Poll::Ready(Ok(())),
            State::Streaming(ref mut stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
