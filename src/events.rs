//! Read-only notifications surfaced to the presentation layer.
//!
//! The session never blocks on UI input except through the password-prompt
//! suspension point; everything else flows one way through these events,
//! drained once per tick via [`ClientSession::events`].
//!
//! [`ClientSession::events`]: crate::ClientSession::events

use crate::entity_event::{DesyncReport, EventChannel};
use crate::network::messages::FileKind;
use crate::roster::PermissionSet;
use crate::round::RoundLifecycleState;
use crate::{ParticipantId, SequenceId};

/// Notifications produced by the session for the embedding game and its UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The round lifecycle state changed.
    RoundStateChanged {
        /// The new state.
        state: RoundLifecycleState,
    },
    /// The connection was approved by the server.
    Connected {
        /// Server-assigned session identity.
        session_id: u64,
    },
    /// A connection attempt failed permanently.
    ConnectionFailed {
        /// Human-readable failure description.
        context: String,
    },
    /// A reconnect attempt started. Transient; show a non-blocking
    /// "reconnecting" indicator, not a hard failure.
    Reconnecting {
        /// 1-based attempt counter for this disconnection.
        attempt: u32,
    },
    /// The server demands a password. A repeated event with a higher
    /// `retry_count` invalidates any prompt already shown.
    PasswordRequired {
        /// Server-driven failure counter.
        retry_count: u32,
    },
    /// The server is full; the supervisor is polling the join queue.
    QueueWaiting {
        /// Queue position, when the server has reported one.
        position: Option<u16>,
    },
    /// A roster snapshot was applied.
    RosterUpdated {
        /// Participants present in this snapshot but not the previous one.
        joined: Vec<ParticipantId>,
        /// Participants absent from this snapshot.
        left: Vec<ParticipantId>,
    },
    /// A participant's permissions changed between snapshots.
    PermissionsChanged {
        /// The affected participant.
        participant: ParticipantId,
        /// The new permission set.
        permissions: PermissionSet,
    },
    /// The server acknowledged outbound chat up to this sequence id.
    ChatAcknowledged {
        /// Newest acknowledged id.
        up_to: SequenceId,
    },
    /// A referenced asset is missing locally and has been requested from the
    /// file transfer subsystem.
    FileRequested {
        /// What kind of asset.
        kind: FileKind,
        /// Asset name.
        name: String,
        /// Expected content hash.
        hash: String,
    },
    /// A gap was observed in an entity event channel. The stream stays
    /// usable; this is diagnostic.
    SequenceGap {
        /// Which channel skipped ahead.
        channel: EventChannel,
        /// Number of gaps observed in the offending batch.
        count: usize,
    },
    /// The client's simulation diverged from the server's. The round has
    /// been torn down; the report carries the sequencer state dump.
    Desynchronized {
        /// Diagnostic report.
        report: Box<DesyncReport>,
    },
    /// The server ended the round while this client was still loading it.
    RoundInterrupted,
    /// An unrecoverable error. The connection has been closed; show a single
    /// human-readable message and return to a safe screen.
    FatalError {
        /// Human-readable description.
        message: String,
    },
}
