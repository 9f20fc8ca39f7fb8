//! Configuration and construction of a [`ClientSession`].

use web_time::Duration;

use crate::correction::DEFAULT_CORRECTION_DELAY;
use crate::network::transport::{Inbox, Transport};
use crate::reconnect::{
    DEFAULT_HANDSHAKE_DEADLINE, DEFAULT_PASSWORD_CHECK_DELAY, DEFAULT_QUEUE_POLL_INTERVAL,
};
use crate::round::{DEFAULT_FINALIZE_DEADLINE, DEFAULT_FINALIZE_REREQUEST_INTERVAL};
use crate::sessions::client_session::ClientSession;

/// Default byte budget for one packed outgoing chat message.
pub const DEFAULT_CHAT_PACKET_BUDGET: usize = 512;
/// Default interval between outbound keep-alive pings.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(2);
/// Default cap on the session event queue; beyond it the oldest events are
/// dropped.
pub const DEFAULT_EVENT_QUEUE_LIMIT: usize = 100;

/// Tuning parameters for a session.
///
/// The timing constants default to the reference policy; they are exposed
/// as configuration rather than hard-coded because they are tuned values,
/// not derived ones.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Interval between finalize re-requests while waiting.
    pub finalize_rerequest_interval: Duration,
    /// Absolute deadline for the finalize wait.
    pub finalize_deadline: Duration,
    /// How long a local prediction wins before the authoritative echo is
    /// forced through.
    pub correction_delay: Duration,
    /// Wall-clock deadline for the connection handshake.
    pub handshake_deadline: Duration,
    /// Delay before the first password-challenge check.
    pub password_check_delay: Duration,
    /// Interval between join-queue reattempts while the server is full.
    pub queue_poll_interval: Duration,
    /// Byte budget for one packed outgoing chat message.
    pub chat_packet_budget: usize,
    /// Interval between outbound keep-alive pings.
    pub keep_alive_interval: Duration,
    /// Cap on queued session events; the oldest are dropped beyond it.
    pub event_queue_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            finalize_rerequest_interval: DEFAULT_FINALIZE_REREQUEST_INTERVAL,
            finalize_deadline: DEFAULT_FINALIZE_DEADLINE,
            correction_delay: DEFAULT_CORRECTION_DELAY,
            handshake_deadline: DEFAULT_HANDSHAKE_DEADLINE,
            password_check_delay: DEFAULT_PASSWORD_CHECK_DELAY,
            queue_poll_interval: DEFAULT_QUEUE_POLL_INTERVAL,
            chat_packet_budget: DEFAULT_CHAT_PACKET_BUDGET,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
        }
    }
}

/// Builds a [`ClientSession`] with custom tuning.
///
/// ```
/// use tidelink::{SessionBuilder, UdpTransport};
/// use web_time::Duration;
///
/// let transport = UdpTransport::new("127.0.0.1:27015".parse().unwrap());
/// let inbox = transport.inbox();
/// let session = SessionBuilder::new()
///     .with_finalize_deadline(Duration::from_secs(45))
///     .with_chat_packet_budget(256)
///     .start(transport, inbox);
/// ```
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the finalize re-request interval.
    pub fn with_finalize_rerequest_interval(mut self, interval: Duration) -> Self {
        self.config.finalize_rerequest_interval = interval;
        self
    }

    /// Sets the absolute finalize deadline.
    pub fn with_finalize_deadline(mut self, deadline: Duration) -> Self {
        self.config.finalize_deadline = deadline;
        self
    }

    /// Sets the delayed-correction window.
    pub fn with_correction_delay(mut self, delay: Duration) -> Self {
        self.config.correction_delay = delay;
        self
    }

    /// Sets the connection handshake deadline.
    pub fn with_handshake_deadline(mut self, deadline: Duration) -> Self {
        self.config.handshake_deadline = deadline;
        self
    }

    /// Sets the delay before the first password-challenge check.
    pub fn with_password_check_delay(mut self, delay: Duration) -> Self {
        self.config.password_check_delay = delay;
        self
    }

    /// Sets the join-queue reattempt interval.
    pub fn with_queue_poll_interval(mut self, interval: Duration) -> Self {
        self.config.queue_poll_interval = interval;
        self
    }

    /// Sets the byte budget for one packed outgoing chat message.
    pub fn with_chat_packet_budget(mut self, budget: usize) -> Self {
        self.config.chat_packet_budget = budget;
        self
    }

    /// Sets the keep-alive ping interval.
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    /// Sets the cap on queued session events.
    pub fn with_event_queue_limit(mut self, limit: usize) -> Self {
        self.config.event_queue_limit = limit;
        self
    }

    /// Consumes the builder and assembles a session over the given
    /// transport. The inbox must be the same one the transport deposits
    /// inbound frames into.
    pub fn start<T: Transport>(self, transport: T, inbox: Inbox) -> ClientSession<T> {
        ClientSession::new(self.config, transport, inbox)
    }
}
