//! Buffer sizing shared between connections.
//!
//! The codec and the TLS engine own their buffers; this pool decides how
//! large they grow.

/// Buffer sizes handed to the codec and TLS engine of each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPool {
    buffer_size: usize,
    buffer_limit: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            buffer_size: 4 * 1024,
            buffer_limit: 64 * 1024,
        }
    }
}

impl BufferPool {
    /// Create a pool with the given buffer size and limit on buffered bytes.
    ///
    /// The limit is raised to the buffer size if it is smaller.
    pub fn new(buffer_size: usize, buffer_limit: usize) -> Self {
        Self {
            buffer_size,
            buffer_limit: buffer_limit.max(buffer_size),
        }
    }

    /// Size at which writes are flushed to the socket.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Most bytes a single connection may hold in buffers.
    pub fn buffer_limit(&self) -> usize {
        self.buffer_limit
    }
}
