//! # Tidelink
//!
//! Tidelink is the client half of a real-time authoritative-server game
//! protocol. It keeps a player's local world consistent with a remote
//! simulation over an unreliable, variable-latency transport, tolerating
//! packet loss, reordering, temporary disconnection and partial
//! desynchronization without forcing a full state re-download.
//!
//! The crate is built around a handful of cooperating components, all driven
//! from a single simulation tick:
//!
//! - [`PacketDispatcher`] reads the one-byte message-kind tag off every
//!   inbound frame and routes it, deferring messages that arrive before the
//!   round has finished loading.
//! - [`RoundLifecycle`] tracks the round start/finalize/end state machine,
//!   independent from raw connectivity.
//! - [`EntityEventSequencer`] applies entity-targeted state updates exactly
//!   once and in causal order per channel.
//! - [`DelayedCorrectionBuffer`] lets locally-predicted state win for a short
//!   window before the server's authoritative echo is forced through.
//! - [`ReconnectionSupervisor`] owns connect/timeout/password-retry/queue-wait
//!   behavior.
//! - [`ChatMessageQueue`] and [`SessionRoster`] handle acked outbound text
//!   messages and the versioned participant list.
//!
//! [`ClientSession`] ties these together behind a single per-tick pump.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use chat::{ChatMessageQueue, ChatQueueEntry};
pub use correction::DelayedCorrectionBuffer;
pub use dispatcher::PacketDispatcher;
pub use entity_event::{
    DesyncReport, EntityApplyError, EntityEventSequencer, EntityRegistry, EventChannel,
    IngestSummary,
};
pub use error::TidelinkError;
pub use events::SessionEvent;
pub use network::messages::{
    ChatWireEntry, DisconnectReason, EntityEventRecord, FileKind, Message, MessageKind, ModeFlags,
    PasswordChallenge, PasswordResponse, RoundFinalize, RoundStart,
};
pub use network::transport::{CloseReason, DeliveryMode, Inbox, Transport};
pub use network::udp_transport::UdpTransport;
pub use reconnect::{
    ConnectState, ReconnectDisposition, ReconnectionSupervisor, SupervisorDirective,
};
pub use roster::{PermissionSet, RosterDiff, RosterEntry, SessionRoster, SnapshotOutcome};
pub use round::{
    BuiltRound, FileRequester, RoundBuildError, RoundBuilder, RoundLifecycle, RoundLifecycleState,
    RoundSettings,
};
pub use sessions::builder::{SessionBuilder, SessionConfig};
pub use sessions::client_session::ClientSession;
pub use sessions::event_drain::EventDrain;

pub mod chat;
pub mod correction;
pub mod dispatcher;
pub mod entity_event;
pub mod error;
pub mod events;
pub mod reconnect;
pub mod roster;
pub mod round;
/// Wire-level concerns: the message catalog, the binary codec and transports.
pub mod network {
    pub mod codec;
    pub mod messages;
    pub mod transport;
    pub mod udp_transport;
}
/// Session assembly: the builder, the per-tick session pump and event drain.
pub mod sessions {
    pub mod builder;
    pub mod client_session;
    pub mod event_drain;
}

// #############
// # CONSTANTS #
// #############

/// Half the 16-bit sequence id space.
///
/// Two sequence ids are ordered by modular subtraction; the ordering is only
/// meaningful while the ids compared are less than this far apart. Detecting
/// pathological gaps is the responsibility of the surrounding error channel,
/// not of the comparison itself.
pub const SEQUENCE_HALF_RANGE: u16 = 0x8000;

/// A wraparound-safe 16-bit monotonic identifier.
///
/// Sequence ids tag entity events, roster snapshots and chat acknowledgements
/// on the wire. They wrap at 65536, so they are compared by the sign of the
/// 16-bit difference rather than by magnitude: [`is_newer_than`] tolerates
/// wraparound as long as the gap between the compared values is less than
/// [`SEQUENCE_HALF_RANGE`].
///
/// # Examples
///
/// ```
/// use tidelink::SequenceId;
///
/// let a = SequenceId::new(5);
/// let b = SequenceId::new(3);
/// assert!(a.is_newer_than(b));
/// assert!(!b.is_newer_than(a));
///
/// // Wraparound: 2 is newer than 65534.
/// assert!(SequenceId::new(2).is_newer_than(SequenceId::new(65534)));
/// ```
///
/// [`is_newer_than`]: SequenceId::is_newer_than
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub struct SequenceId(u16);

impl SequenceId {
    /// The zero id. Useful as the "nothing acknowledged yet" reference.
    pub const ZERO: SequenceId = SequenceId(0);

    /// Creates a sequence id from a raw 16-bit value. All values are valid.
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        SequenceId(id)
    }

    /// Returns the underlying 16-bit value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns `true` if `self` is strictly newer than `reference` under
    /// modular comparison.
    ///
    /// Computes `delta = (self - reference) mod 65536` and returns
    /// `delta != 0 && delta < 32768`. Equal ids are never newer, so for any
    /// two distinct ids within half the id space of each other, exactly one
    /// of `a.is_newer_than(b)` / `b.is_newer_than(a)` holds.
    #[inline]
    #[must_use]
    pub const fn is_newer_than(self, reference: SequenceId) -> bool {
        let delta = self.0.wrapping_sub(reference.0);
        delta != 0 && delta < SEQUENCE_HALF_RANGE
    }

    /// Returns the next id in the sequence, wrapping at the end of the space.
    #[inline]
    #[must_use]
    pub const fn next(self) -> SequenceId {
        SequenceId(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SequenceId {
    #[inline]
    fn from(value: u16) -> Self {
        SequenceId(value)
    }
}

impl From<SequenceId> for u16 {
    #[inline]
    fn from(id: SequenceId) -> Self {
        id.0
    }
}

/// Identifies a synchronized entity on this client.
///
/// Entity ids are assigned by the server and resolved locally through the
/// [`EntityRegistry`]. An id with no local counterpart is not an error by
/// itself; the entity may already have been removed on this client.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct EntityId(u32);

impl EntityId {
    /// Creates an entity id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        EntityId(id)
    }

    /// Returns the underlying value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{}", self.0)
    }
}

impl From<u32> for EntityId {
    #[inline]
    fn from(value: u32) -> Self {
        EntityId(value)
    }
}

/// Identifies a remote participant in the session roster.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ParticipantId(u16);

impl ParticipantId {
    /// Creates a participant id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        ParticipantId(id)
    }

    /// Returns the underlying value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl From<u16> for ParticipantId {
    #[inline]
    fn from(value: u16) -> Self {
        ParticipantId(value)
    }
}
