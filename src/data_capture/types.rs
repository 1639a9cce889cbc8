use std::io;

/// Why a bounded read stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// The input looked complete (end of a line or of an HTTP message).
    Complete,
    /// The byte budget was used up.
    LimitReached,
    /// The peer closed its side.
    Eof,
    /// No further data arrived before the deadline.
    TimedOut,
    /// The socket failed; the peer most likely reset the connection.
    Failed(io::ErrorKind),
    /// The process is shutting down.
    Cancelled,
}

/// Bytes received from a client and the reason reading stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPayload {
    pub data: Vec<u8>,
    pub end: ReadEnd,
}

impl CapturedPayload {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the client is still there to receive a reply.
    pub fn can_reply(&self) -> bool {
        !matches!(self.end, ReadEnd::Failed(_) | ReadEnd::Cancelled)
    }
}

/// Limits applied to every read from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLimits {
    pub max_bytes: usize,
    pub timeout: std::time::Duration,
}
