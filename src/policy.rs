//! Connection policy: timeouts and message size limits.

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::buffer::BufferPool;
use crate::error::Error;
use crate::frame::Frame;

/// Limits and timeouts applied to every connection built from a
/// [`ClientFactory`](crate::ClientFactory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketPolicy {
    idle_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    max_text_message_size: usize,
    max_binary_message_size: usize,
    max_frame_size: usize,
}

impl Default for WebSocketPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(300)),
            connect_timeout: Some(Duration::from_secs(30)),
            max_text_message_size: 64 * 1024,
            max_binary_message_size: 64 * 1024,
            max_frame_size: 16 << 20,
        }
    }
}

impl WebSocketPolicy {
    /// Create the default client policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Close connections which see no traffic for this long. `None` disables
    /// the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.idle_timeout = timeout.into().filter(|timeout| !timeout.is_zero());
        self
    }

    /// Give up on TCP connects which take longer than this.
    pub fn with_connect_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.connect_timeout = timeout.into().filter(|timeout| !timeout.is_zero());
        self
    }

    /// Largest text message accepted from the peer, in bytes.
    pub fn with_max_text_message_size(mut self, size: usize) -> Self {
        self.max_text_message_size = size;
        self
    }

    /// Largest binary message accepted from the peer, in bytes.
    pub fn with_max_binary_message_size(mut self, size: usize) -> Self {
        self.max_binary_message_size = size;
        self
    }

    /// Largest single frame accepted from the peer, in bytes.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Idle timeout, if any.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Connect timeout, if any.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Text message limit.
    pub fn max_text_message_size(&self) -> usize {
        self.max_text_message_size
    }

    /// Binary message limit.
    pub fn max_binary_message_size(&self) -> usize {
        self.max_binary_message_size
    }

    /// Frame size limit.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Check an incoming frame against the size limit for its type.
    pub fn check_frame(&self, frame: &Frame) -> Result<(), Error> {
        let (size, limit) = match frame {
            Frame::Text(text) => (text.len(), self.max_text_message_size),
            Frame::Binary(data) => (data.len(), self.max_binary_message_size),
            _ => return Ok(()),
        };

        if size > limit {
            return Err(Error::MessageTooLarge { size, limit });
        }
        Ok(())
    }

    /// Codec configuration for a connection governed by this policy.
    ///
    /// The codec only knows a single message limit, so it is given the larger
    /// of the two; [`check_frame`](Self::check_frame) enforces the per-type
    /// limit afterwards.
    pub(crate) fn websocket_config(&self, buffers: &BufferPool) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        let max_message_size = self.max_text_message_size.max(self.max_binary_message_size);
        config.max_message_size = Some(max_message_size);
        config.max_frame_size = Some(self.max_frame_size);
        config.write_buffer_size = buffers.buffer_size();
        config.max_write_buffer_size = buffers.buffer_limit().max(buffers.buffer_size() + 1);
        config
    }
}
