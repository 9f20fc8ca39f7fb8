//! The transport abstraction and the shared inbound queue.
//!
//! Protocol logic runs on the single tick thread and never blocks; the
//! transport is the only source of concurrency and communicates exclusively
//! by depositing fully-formed frames into the thread-safe [`Inbox`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::network::messages::Message;
use crate::TidelinkError;

/// How a frame should be delivered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// At-least-once, ordered delivery.
    Reliable,
    /// Best-effort, unordered delivery.
    Unreliable,
}

/// Why the transport is being closed, for diagnostics and the remote end.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly local shutdown.
    Shutdown,
    /// The peer violated the wire protocol.
    ProtocolViolation,
    /// A deadline expired without the awaited reply.
    Timeout,
    /// The user cancelled an in-flight connection attempt.
    Cancelled,
}

/// A non-blocking, connection-oriented transport.
///
/// Implementations deliver complete inbound frames through the [`Inbox`]
/// handed out at construction; no shared mutable protocol state crosses the
/// thread boundary except through that queue.
pub trait Transport {
    /// Opens (or reopens) the underlying connection.
    fn open(&mut self) -> Result<(), TidelinkError>;

    /// Sends one encoded frame. Must not block.
    fn send(&mut self, frame: &[u8], mode: DeliveryMode) -> Result<(), TidelinkError>;

    /// Closes the connection. Idempotent.
    fn close(&mut self, reason: CloseReason);

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;

    /// Gives the transport a chance to move received data into its inbox.
    /// Called once per tick; the default is a no-op for transports that run
    /// their own receive thread.
    fn poll_receive(&mut self) {}

    /// Encodes and sends a typed message. Provided for convenience.
    fn send_message(&mut self, message: &Message, mode: DeliveryMode) -> Result<(), TidelinkError> {
        let frame = message.encode()?;
        self.send(&frame, mode)
    }
}

/// Thread-safe queue of inbound frames.
///
/// The transport's receive side pushes complete frames; the tick thread
/// drains them strictly in arrival order. This is the only structure shared
/// between threads, and cloning an `Inbox` yields another handle onto the
/// same queue.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl Inbox {
    /// Creates an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposits one complete frame. Callable from any thread.
    pub fn push(&self, frame: Vec<u8>) {
        self.queue.lock().push_back(frame);
    }

    /// Removes and returns all queued frames in arrival order.
    #[must_use]
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.queue.lock().drain(..).collect()
    }

    /// Number of frames currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the inbox is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
