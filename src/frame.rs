//! Incoming frames and the sink that receives them.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Error;
use crate::policy::WebSocketPolicy;
use crate::rt::Executor;

/// A decoded WebSocket message.
pub type Frame = tokio_tungstenite::tungstenite::Message;

/// Receives every decoded incoming frame for one connection.
///
/// Callbacks run on the connection's executor, one at a time and in the order
/// frames arrived, never on the task driving the socket.
pub trait FrameSink: Send + Sync + 'static {
    /// A frame arrived from the peer.
    fn incoming_frame(&self, frame: Frame);

    /// The connection failed. No frames follow.
    fn incoming_error(&self, error: &Error) {
        let _ = error;
    }
}

impl<F> FrameSink for F
where
    F: Fn(Frame) + Send + Sync + 'static,
{
    fn incoming_frame(&self, frame: Frame) {
        (self)(frame)
    }
}

enum Event {
    Frame(Frame),
    Error(Error),
}

/// Binds a connection to its frame sink.
///
/// The sink is fixed when the parser is created; frames handed to the parser
/// are checked against the policy and queued to a dispatch task on the
/// executor.
pub struct Parser {
    sink: Arc<dyn FrameSink>,
    policy: WebSocketPolicy,
    queue: mpsc::UnboundedSender<Event>,
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("policy", &self.policy)
            .field("closed", &self.queue.is_closed())
            .finish()
    }
}

impl Parser {
    /// Bind `sink` as the receiver of every frame this parser sees.
    pub(crate) fn bind(
        sink: Arc<dyn FrameSink>,
        policy: WebSocketPolicy,
        executor: &Executor,
    ) -> Self {
        let (queue, mut events) = mpsc::unbounded_channel();

        let handler = sink.clone();
        executor.execute(async move {
            while let Some(event) = events.recv().await {
                match event {
                    Event::Frame(frame) => handler.incoming_frame(frame),
                    Event::Error(error) => handler.incoming_error(&error),
                }
            }
            tracing::trace!("frame dispatch finished");
        });

        Self {
            sink,
            policy,
            queue,
        }
    }

    /// The sink receiving this parser's frames.
    pub fn incoming_frames(&self) -> &Arc<dyn FrameSink> {
        &self.sink
    }

    /// Hand a decoded frame to the sink.
    ///
    /// Frames larger than the policy allows are rejected and not delivered.
    pub fn incoming_frame(&self, frame: Frame) -> Result<(), Error> {
        self.policy.check_frame(&frame)?;
        self.queue
            .send(Event::Frame(frame))
            .map_err(|_| Error::Closed)
    }

    pub(crate) fn incoming_error(&self, error: Error) {
        if self.queue.send(Event::Error(error)).is_err() {
            tracing::warn!("frame sink gone, dropping connection error");
        }
    }
}
