//! Connect attempt lifecycle: handshake deadline, password retries and the
//! queue-wait loop.
//!
//! The supervisor is a cooperative state machine advanced once per tick via
//! [`poll`]; "waiting" for a network reply is expressed as repeated
//! non-blocking checks across ticks. Cancellation is a state observed at
//! the next transition, never an unwound stack: once cancelled, no timers
//! or queued work stay active.
//!
//! [`poll`]: ReconnectionSupervisor::poll

use std::collections::VecDeque;

use tracing::{debug, info, warn};
use web_time::{Duration, Instant};

use crate::events::SessionEvent;
use crate::network::messages::{DisconnectReason, Message, PasswordChallenge, PasswordResponse};
use crate::TidelinkError;

/// Default wall-clock deadline for the initial handshake.
pub const DEFAULT_HANDSHAKE_DEADLINE: Duration = Duration::from_secs(20);
/// Default delay before the first password-challenge check.
pub const DEFAULT_PASSWORD_CHECK_DELAY: Duration = Duration::from_millis(200);
/// Default interval between join-queue reattempts.
pub const DEFAULT_QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Where the current connection attempt is in its lifecycle.
///
/// ```text
/// Idle --begin_connect--> Connecting
///     Connecting --password challenge--> PasswordRequired
///     PasswordRequired --supply_password--> Connecting
///     Connecting --approval--> Approved
///     Connecting --deadline exceeded--> TimedOut
///     Connecting --server full--> QueueWaiting --poll interval--> Connecting
///     any non-terminal --cancel--> Cancelled
/// ```
///
/// `Approved` hands control to the normal per-tick message pump; `TimedOut`
/// and `Cancelled` close the attempt without auto-retry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConnectState {
    /// No attempt in progress.
    Idle,
    /// Waiting for approval, a challenge or a rejection.
    Connecting,
    /// The server demanded a password; forward progress is suspended until
    /// a credential is supplied or the attempt is cancelled.
    PasswordRequired,
    /// The server approved the connection.
    Approved,
    /// The server is full; reattempting on a fixed interval.
    QueueWaiting,
    /// The user cancelled the attempt.
    Cancelled,
    /// The handshake deadline passed without approval.
    TimedOut,
}

impl std::fmt::Display for ConnectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectState::Idle => "idle",
            ConnectState::Connecting => "connecting",
            ConnectState::PasswordRequired => "password required",
            ConnectState::Approved => "approved",
            ConnectState::QueueWaiting => "waiting in queue",
            ConnectState::Cancelled => "cancelled",
            ConnectState::TimedOut => "timed out",
        };
        write!(f, "{name}")
    }
}

/// How a server-initiated disconnect should be handled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReconnectDisposition {
    /// Server full: enter the queue-wait loop.
    QueueWait,
    /// Desync-class reason: tear the local round down and reconnect
    /// preserving the session identity.
    RejoinPreservingSession,
    /// Transient reason: a plain reconnect attempt is worthwhile.
    Reconnect,
    /// Terminal: do not reconnect.
    Terminal,
}

impl ReconnectDisposition {
    /// Classifies a disconnect reason.
    #[must_use]
    pub const fn classify(reason: DisconnectReason) -> Self {
        if reason.is_desync() {
            ReconnectDisposition::RejoinPreservingSession
        } else if matches!(reason, DisconnectReason::ServerFull) {
            ReconnectDisposition::QueueWait
        } else if reason.is_reconnect_eligible() {
            ReconnectDisposition::Reconnect
        } else {
            ReconnectDisposition::Terminal
        }
    }
}

/// What the session should do after a supervisor poll.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SupervisorDirective {
    /// The handshake deadline passed: close the transport and surface the
    /// failure. No auto-retry.
    CloseTimedOut,
    /// The queue-poll interval elapsed: reopen the transport and begin a
    /// fresh attempt.
    RetryConnect,
}

/// Drives connect/timeout/password-retry/queue-wait behavior.
///
/// Transient per-attempt state (deadline, retry counter, last challenge)
/// lives only for the duration of one attempt; the server-assigned session
/// identity survives across desync reconnects.
#[derive(Debug)]
pub struct ReconnectionSupervisor {
    state: ConnectState,
    handshake_deadline: Duration,
    password_check_delay: Duration,
    queue_poll_interval: Duration,
    deadline: Option<Instant>,
    first_challenge_check: Option<Instant>,
    next_queue_poll: Option<Instant>,
    held_challenge: Option<PasswordChallenge>,
    last_retry_count: Option<u32>,
    attempt: u32,
    session_id: Option<u64>,
}

impl ReconnectionSupervisor {
    /// Creates an idle supervisor with the given timing policy.
    #[must_use]
    pub fn new(
        handshake_deadline: Duration,
        password_check_delay: Duration,
        queue_poll_interval: Duration,
    ) -> Self {
        Self {
            state: ConnectState::Idle,
            handshake_deadline,
            password_check_delay,
            queue_poll_interval,
            deadline: None,
            first_challenge_check: None,
            next_queue_poll: None,
            held_challenge: None,
            last_retry_count: None,
            attempt: 0,
            session_id: None,
        }
    }

    /// Current attempt state.
    #[must_use]
    pub fn state(&self) -> ConnectState {
        self.state
    }

    /// Server-assigned session identity, once approved. Preserved across
    /// desync reconnects.
    #[must_use]
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// 1-based counter of connection attempts since construction.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Begins a connection attempt: arms the handshake deadline and the
    /// first-challenge check. Reattempts emit [`SessionEvent::Reconnecting`].
    pub fn begin_connect(&mut self, now: Instant, events: &mut VecDeque<SessionEvent>) {
        self.attempt += 1;
        self.state = ConnectState::Connecting;
        self.deadline = Some(now + self.handshake_deadline);
        self.first_challenge_check = Some(now + self.password_check_delay);
        self.next_queue_poll = None;
        self.held_challenge = None;
        self.last_retry_count = None;
        if self.attempt > 1 {
            info!("reconnect attempt {}", self.attempt);
            events.push_back(SessionEvent::Reconnecting {
                attempt: self.attempt,
            });
        }
    }

    /// Handles a password challenge.
    ///
    /// Challenges arriving before the first-challenge check time are held
    /// and surfaced by the next [`poll`] past that time. A repeated
    /// challenge with a higher retry counter invalidates any prompt already
    /// shown by re-emitting [`SessionEvent::PasswordRequired`].
    ///
    /// [`poll`]: ReconnectionSupervisor::poll
    pub fn on_password_challenge(
        &mut self,
        challenge: PasswordChallenge,
        now: Instant,
        events: &mut VecDeque<SessionEvent>,
    ) {
        if !matches!(
            self.state,
            ConnectState::Connecting | ConnectState::PasswordRequired
        ) {
            debug!("ignoring password challenge in state {}", self.state);
            return;
        }
        if let Some(check) = self.first_challenge_check {
            if now < check {
                self.held_challenge = Some(challenge);
                return;
            }
        }
        self.process_challenge(challenge, events);
    }

    fn process_challenge(
        &mut self,
        challenge: PasswordChallenge,
        events: &mut VecDeque<SessionEvent>,
    ) {
        match self.last_retry_count {
            Some(last) if challenge.retry_count <= last => {
                debug!(
                    "ignoring stale password challenge (retry {} <= {})",
                    challenge.retry_count, last
                );
                return;
            }
            _ => {}
        }
        self.last_retry_count = Some(challenge.retry_count);
        self.state = ConnectState::PasswordRequired;
        // Suspend the handshake deadline while the user types.
        self.deadline = None;
        events.push_back(SessionEvent::PasswordRequired {
            retry_count: challenge.retry_count,
        });
    }

    /// Supplies the credential digest for the outstanding challenge.
    ///
    /// Returns the response message to send and re-enters `Connecting` with
    /// a fresh handshake deadline. Fails if no challenge is outstanding.
    pub fn supply_password(
        &mut self,
        digest: Vec<u8>,
        now: Instant,
    ) -> Result<Message, TidelinkError> {
        if self.state != ConnectState::PasswordRequired {
            return Err(TidelinkError::InvalidRequest {
                info: format!("no outstanding password challenge (state: {})", self.state),
            });
        }
        let retry_count = self.last_retry_count.unwrap_or(0);
        self.state = ConnectState::Connecting;
        self.deadline = Some(now + self.handshake_deadline);
        Ok(Message::PasswordResponse(PasswordResponse {
            retry_count,
            response: digest,
        }))
    }

    /// Handles connection approval: records the session identity and hands
    /// control to the normal message pump.
    pub fn on_approved(&mut self, session_id: u64, events: &mut VecDeque<SessionEvent>) {
        if matches!(self.state, ConnectState::Cancelled | ConnectState::TimedOut) {
            debug!("ignoring approval in state {}", self.state);
            return;
        }
        if let Some(existing) = self.session_id {
            if existing != session_id {
                debug!("session identity changed: {existing} -> {session_id}");
            }
        }
        self.state = ConnectState::Approved;
        self.session_id = Some(session_id);
        self.clear_timers();
        events.push_back(SessionEvent::Connected { session_id });
    }

    /// Classifies a server-initiated disconnect and adjusts state.
    ///
    /// A full server enters the queue-wait loop; a terminal reason surfaces
    /// a failure and returns to idle. Desync-class and transient reasons
    /// return to idle with the session identity preserved so the caller can
    /// begin a fresh attempt.
    pub fn on_disconnect(
        &mut self,
        reason: DisconnectReason,
        now: Instant,
        events: &mut VecDeque<SessionEvent>,
    ) -> ReconnectDisposition {
        let disposition = ReconnectDisposition::classify(reason);
        match disposition {
            ReconnectDisposition::QueueWait => {
                info!("server full; entering queue wait");
                self.state = ConnectState::QueueWaiting;
                self.deadline = None;
                self.first_challenge_check = None;
                self.next_queue_poll = Some(now + self.queue_poll_interval);
                events.push_back(SessionEvent::QueueWaiting { position: None });
            }
            ReconnectDisposition::RejoinPreservingSession | ReconnectDisposition::Reconnect => {
                warn!("disconnected ({reason}); eligible for reconnect");
                self.state = ConnectState::Idle;
                self.clear_timers();
            }
            ReconnectDisposition::Terminal => {
                warn!("disconnected ({reason}); not reconnecting");
                self.state = ConnectState::Idle;
                self.session_id = None;
                self.clear_timers();
                events.push_back(SessionEvent::ConnectionFailed {
                    context: reason.to_string(),
                });
            }
        }
        disposition
    }

    /// Handles a join-queue position report.
    pub fn on_queue_status(&mut self, position: u16, events: &mut VecDeque<SessionEvent>) {
        if self.state != ConnectState::QueueWaiting {
            debug!("ignoring queue status in state {}", self.state);
            return;
        }
        events.push_back(SessionEvent::QueueWaiting {
            position: Some(position),
        });
    }

    /// Cancels the current attempt. No side effects beyond abandoning the
    /// pending timers; the caller closes the transport.
    pub fn cancel(&mut self) {
        if matches!(self.state, ConnectState::Idle | ConnectState::Approved) {
            return;
        }
        info!("connection attempt cancelled");
        self.state = ConnectState::Cancelled;
        self.clear_timers();
    }

    /// Advances the attempt's timers.
    ///
    /// Reaching the handshake deadline without approval transitions to
    /// `TimedOut` exactly at the deadline, surfaces a failure and directs
    /// the caller to close the transport. In queue wait, the fixed poll
    /// interval directs the caller to reattempt.
    #[must_use]
    pub fn poll(
        &mut self,
        now: Instant,
        events: &mut VecDeque<SessionEvent>,
    ) -> Option<SupervisorDirective> {
        // Surface a challenge that was held for the first-check delay.
        if matches!(self.state, ConnectState::Connecting) {
            if let Some(check) = self.first_challenge_check {
                if now >= check {
                    if let Some(challenge) = self.held_challenge.take() {
                        self.process_challenge(challenge, events);
                    }
                }
            }
        }

        match self.state {
            ConnectState::Connecting => {
                let deadline = self.deadline?;
                if now >= deadline {
                    warn!("handshake deadline exceeded");
                    self.state = ConnectState::TimedOut;
                    self.clear_timers();
                    events.push_back(SessionEvent::ConnectionFailed {
                        context: "connection attempt timed out".to_owned(),
                    });
                    return Some(SupervisorDirective::CloseTimedOut);
                }
                None
            }
            ConnectState::QueueWaiting => {
                let next = self.next_queue_poll?;
                if now >= next {
                    self.next_queue_poll = Some(now + self.queue_poll_interval);
                    return Some(SupervisorDirective::RetryConnect);
                }
                None
            }
            _ => None,
        }
    }

    fn clear_timers(&mut self) {
        self.deadline = None;
        self.first_challenge_check = None;
        self.next_queue_poll = None;
        self.held_challenge = None;
    }
}
