//! The wire message catalog.
//!
//! Every frame on the wire starts with a one-byte message-kind tag followed
//! by the bincode-encoded body for that kind. The tag set is densely packed;
//! an out-of-range tag is a fatal framing error, never silently skipped,
//! because parsing past a framing error risks permanent desync.

use serde::{Deserialize, Serialize};

use crate::network::codec;
use crate::roster::RosterEntry;
use crate::{EntityId, SequenceId, TidelinkError};

/// The one-byte message-kind tag at the start of every frame.
///
/// Sequence ids used for entity events, roster snapshots and chat
/// acknowledgement are fixed-width 16-bit integers at the same byte position
/// relative to their message kind each time (guaranteed by the fixed-int
/// codec and the field order of the body structs).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Connection keep-alive ping. No body.
    KeepAlive = 0,
    /// Server announces a new round.
    RoundStart = 1,
    /// Server finalizes a starting round.
    RoundFinalize = 2,
    /// Server ends the current round. No body.
    RoundEnd = 3,
    /// A batch of entity state events (ordinary channel).
    EntityEvents = 4,
    /// A batch of entity position updates (lower-frequency physics channel).
    EntityPositions = 5,
    /// Server acknowledges chat messages up to a sequence id.
    ChatAck = 6,
    /// Versioned replacement snapshot of the participant roster.
    RosterSnapshot = 7,
    /// Client-to-server packed chat entries.
    Chat = 8,
    /// Server demands a password before approving the connection.
    PasswordChallenge = 9,
    /// Client-to-server password response.
    PasswordResponse = 10,
    /// Server approves the connection; normal message pumping may begin.
    ConnectApproved = 11,
    /// Server closes the session with a reason code.
    Disconnect = 12,
    /// Client-to-server request to retransmit the finalize message. No body.
    FinalizeRequest = 13,
    /// Server reports the client's position in the join queue.
    QueueStatus = 14,
}

impl MessageKind {
    /// Resolves a raw tag byte. Returns `None` for out-of-range tags; the
    /// caller treats that as a fatal framing error.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<MessageKind> {
        Some(match tag {
            0 => MessageKind::KeepAlive,
            1 => MessageKind::RoundStart,
            2 => MessageKind::RoundFinalize,
            3 => MessageKind::RoundEnd,
            4 => MessageKind::EntityEvents,
            5 => MessageKind::EntityPositions,
            6 => MessageKind::ChatAck,
            7 => MessageKind::RosterSnapshot,
            8 => MessageKind::Chat,
            9 => MessageKind::PasswordChallenge,
            10 => MessageKind::PasswordResponse,
            11 => MessageKind::ConnectApproved,
            12 => MessageKind::Disconnect,
            13 => MessageKind::FinalizeRequest,
            14 => MessageKind::QueueStatus,
            _ => return None,
        })
    }

    /// The raw tag byte for this kind.
    #[inline]
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

/// Assorted boolean round options carried by [`RoundStart`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModeFlags {
    /// Whether dead players respawn during the round.
    pub respawn_enabled: bool,
    /// Whether players may join while the round is in progress.
    pub mid_round_join: bool,
    /// Whether server-side cheats are enabled.
    pub cheats_enabled: bool,
}

/// Body of a round-start message.
///
/// The trailing `inlined_finalize` field is the wire-level "finalize payload
/// is inlined in the same message" branch: when the server already knows the
/// client has all content locally, it skips the extra round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStart {
    /// Seed for the round's deterministic random state.
    pub random_seed: u32,
    /// Seed string for level generation.
    pub level_seed: String,
    /// Difficulty setting, 0.0 to 100.0.
    pub difficulty: f32,
    /// Assorted mode flags.
    pub mode: ModeFlags,
    /// Name of the submarine to spawn.
    pub submarine_name: String,
    /// Content hash of the submarine file, used for the missing-asset check.
    pub submarine_hash: String,
    /// Selected mission identifier, if any.
    pub mission_id: Option<String>,
    /// Campaign save identifier, if this round continues a campaign.
    pub campaign_save_id: Option<String>,
    /// Inlined finalize payload, present when the server skips the separate
    /// finalize round trip. Encoded as a trailing presence flag + payload.
    pub inlined_finalize: Option<RoundFinalize>,
}

/// Body of a round-finalize message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RoundFinalize {
    /// Content identifiers the client must preload before the round starts.
    pub preload_content: Vec<String>,
    /// Equality-check value for level generation. Must match the value the
    /// client computed independently while building the round; a mismatch is
    /// a fatal, non-recoverable protocol error for that round.
    pub level_equality: u32,
}

/// One entity-targeted state update.
///
/// Created by the dispatcher on receipt and consumed within the same tick;
/// records are never persisted. The payload stays opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEventRecord {
    /// Position of this event in its channel's sequence.
    pub seq: SequenceId,
    /// The entity this event targets.
    pub entity: EntityId,
    /// Opaque, game-defined event payload.
    pub payload: Vec<u8>,
}

/// One chat message as packed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatWireEntry {
    /// The sender-local sequence id assigned at submission time.
    pub seq: SequenceId,
    /// Message text.
    pub text: String,
}

/// Body of a password challenge.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PasswordChallenge {
    /// Monotonically increasing failure counter supplied by the server. A
    /// new value invalidates any password prompt already shown to the user.
    pub retry_count: u32,
    /// Server nonce to mix into the credential digest.
    pub nonce: u32,
}

/// Body of a password response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PasswordResponse {
    /// Echo of the challenge's retry counter.
    pub retry_count: u32,
    /// Credential digest bytes.
    pub response: Vec<u8>,
}

/// Kinds of referenced assets the client may need to request from the file
/// transfer subsystem. Only the request handshake lives in this crate; the
/// transfer mechanics do not.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// A submarine file.
    Submarine,
    /// A campaign save file.
    CampaignSave,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Submarine => write!(f, "submarine"),
            FileKind::CampaignSave => write!(f, "campaign save"),
        }
    }
}

/// Reason code attached to a server-initiated disconnect.
///
/// Classification drives the reconnection supervisor: a full server enters
/// the queue-wait loop, desync-class reasons force a round teardown plus a
/// reconnect preserving session identity, and the rest are terminal unless
/// flagged reconnect-eligible.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The server is shutting down. Terminal.
    ServerShutdown,
    /// The server has no free slots. Enter the queue-wait loop.
    ServerFull,
    /// This client is banned. Terminal.
    Banned,
    /// This client was kicked. Terminal.
    Kicked,
    /// The server detected excessive desynchronization.
    ExcessiveDesync,
    /// Client and server disagree about the session identity.
    SessionMismatch,
    /// The connection timed out. Reconnect-eligible.
    Timeout,
    /// Unspecified reason. Terminal.
    Unknown,
}

impl DisconnectReason {
    /// `true` for desync-class reasons: force a local round teardown and a
    /// reconnect attempt that preserves the session identity.
    #[must_use]
    pub const fn is_desync(self) -> bool {
        matches!(
            self,
            DisconnectReason::ExcessiveDesync | DisconnectReason::SessionMismatch
        )
    }

    /// `true` if a plain reconnect attempt is worthwhile.
    #[must_use]
    pub const fn is_reconnect_eligible(self) -> bool {
        matches!(self, DisconnectReason::Timeout) || self.is_desync()
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ServerShutdown => write!(f, "server shutting down"),
            DisconnectReason::ServerFull => write!(f, "server full"),
            DisconnectReason::Banned => write!(f, "banned"),
            DisconnectReason::Kicked => write!(f, "kicked"),
            DisconnectReason::ExcessiveDesync => write!(f, "excessive desync"),
            DisconnectReason::SessionMismatch => write!(f, "session mismatch"),
            DisconnectReason::Timeout => write!(f, "connection timed out"),
            DisconnectReason::Unknown => write!(f, "unknown reason"),
        }
    }
}

/// A decoded wire message: one typed variant per message kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Keep-alive ping.
    KeepAlive,
    /// Round start announcement.
    RoundStart(RoundStart),
    /// Round finalize payload.
    RoundFinalize(RoundFinalize),
    /// End of the current round.
    RoundEnd,
    /// Batch of ordinary entity events.
    EntityEvents(Vec<EntityEventRecord>),
    /// Batch of entity position updates.
    EntityPositions(Vec<EntityEventRecord>),
    /// Chat acknowledgement snapshot.
    ChatAck {
        /// Newest chat sequence id the server has seen.
        last_acked: SequenceId,
    },
    /// Roster replacement snapshot.
    RosterSnapshot {
        /// Snapshot version; stale snapshots are discarded whole.
        version: SequenceId,
        /// Complete participant list as of this version.
        entries: Vec<RosterEntry>,
    },
    /// Packed outbound chat entries.
    Chat(Vec<ChatWireEntry>),
    /// Password challenge from the server.
    PasswordChallenge(PasswordChallenge),
    /// Password response to the server.
    PasswordResponse(PasswordResponse),
    /// Connection approved.
    ConnectApproved {
        /// Server-assigned session identity, preserved across desync
        /// reconnects.
        session_id: u64,
    },
    /// Server-initiated disconnect.
    Disconnect {
        /// Why the server closed the session.
        reason: DisconnectReason,
    },
    /// Request to retransmit the finalize message.
    FinalizeRequest,
    /// Join-queue position report.
    QueueStatus {
        /// Zero-based position in the queue.
        position: u16,
    },
}

impl Message {
    /// The message kind of this variant.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Message::KeepAlive => MessageKind::KeepAlive,
            Message::RoundStart(_) => MessageKind::RoundStart,
            Message::RoundFinalize(_) => MessageKind::RoundFinalize,
            Message::RoundEnd => MessageKind::RoundEnd,
            Message::EntityEvents(_) => MessageKind::EntityEvents,
            Message::EntityPositions(_) => MessageKind::EntityPositions,
            Message::ChatAck { .. } => MessageKind::ChatAck,
            Message::RosterSnapshot { .. } => MessageKind::RosterSnapshot,
            Message::Chat(_) => MessageKind::Chat,
            Message::PasswordChallenge(_) => MessageKind::PasswordChallenge,
            Message::PasswordResponse(_) => MessageKind::PasswordResponse,
            Message::ConnectApproved { .. } => MessageKind::ConnectApproved,
            Message::Disconnect { .. } => MessageKind::Disconnect,
            Message::FinalizeRequest => MessageKind::FinalizeRequest,
            Message::QueueStatus { .. } => MessageKind::QueueStatus,
        }
    }

    /// Encodes this message into a wire frame: tag byte followed by the
    /// bincode body.
    pub fn encode(&self) -> Result<Vec<u8>, TidelinkError> {
        let mut frame = vec![self.kind().tag()];
        let body = match self {
            Message::KeepAlive | Message::RoundEnd | Message::FinalizeRequest => Ok(0),
            Message::RoundStart(start) => codec::encode_append(start, &mut frame),
            Message::RoundFinalize(finalize) => codec::encode_append(finalize, &mut frame),
            Message::EntityEvents(records) | Message::EntityPositions(records) => {
                codec::encode_append(records, &mut frame)
            }
            Message::ChatAck { last_acked } => codec::encode_append(last_acked, &mut frame),
            Message::RosterSnapshot { version, entries } => {
                codec::encode_append(&(version, entries), &mut frame)
            }
            Message::Chat(entries) => codec::encode_append(entries, &mut frame),
            Message::PasswordChallenge(challenge) => codec::encode_append(challenge, &mut frame),
            Message::PasswordResponse(response) => codec::encode_append(response, &mut frame),
            Message::ConnectApproved { session_id } => {
                codec::encode_append(session_id, &mut frame)
            }
            Message::Disconnect { reason } => codec::encode_append(reason, &mut frame),
            Message::QueueStatus { position } => codec::encode_append(position, &mut frame),
        };
        body.map_err(|e| TidelinkError::SerializationError {
            context: e.to_string(),
        })?;
        Ok(frame)
    }

    /// Decodes a wire frame.
    ///
    /// Fails with [`TidelinkError::ProtocolViolation`] on an empty frame, an
    /// unknown tag, a truncated body, or trailing bytes past the body. All
    /// of these are fatal for the connection.
    pub fn decode(raw: &[u8]) -> Result<Message, TidelinkError> {
        let (&tag, body) = raw
            .split_first()
            .ok_or_else(|| TidelinkError::ProtocolViolation {
                context: "empty frame".to_owned(),
            })?;
        let kind = MessageKind::from_tag(tag).ok_or_else(|| TidelinkError::ProtocolViolation {
            context: format!("unknown message-kind tag 0x{tag:02x}"),
        })?;

        let (message, consumed) = match kind {
            MessageKind::KeepAlive => (Message::KeepAlive, 0),
            MessageKind::RoundEnd => (Message::RoundEnd, 0),
            MessageKind::FinalizeRequest => (Message::FinalizeRequest, 0),
            MessageKind::RoundStart => {
                let (start, n) = Self::decode_body::<RoundStart>(kind, body)?;
                (Message::RoundStart(start), n)
            }
            MessageKind::RoundFinalize => {
                let (finalize, n) = Self::decode_body::<RoundFinalize>(kind, body)?;
                (Message::RoundFinalize(finalize), n)
            }
            MessageKind::EntityEvents => {
                let (records, n) = Self::decode_body::<Vec<EntityEventRecord>>(kind, body)?;
                (Message::EntityEvents(records), n)
            }
            MessageKind::EntityPositions => {
                let (records, n) = Self::decode_body::<Vec<EntityEventRecord>>(kind, body)?;
                (Message::EntityPositions(records), n)
            }
            MessageKind::ChatAck => {
                let (last_acked, n) = Self::decode_body::<SequenceId>(kind, body)?;
                (Message::ChatAck { last_acked }, n)
            }
            MessageKind::RosterSnapshot => {
                let ((version, entries), n) =
                    Self::decode_body::<(SequenceId, Vec<RosterEntry>)>(kind, body)?;
                (Message::RosterSnapshot { version, entries }, n)
            }
            MessageKind::Chat => {
                let (entries, n) = Self::decode_body::<Vec<ChatWireEntry>>(kind, body)?;
                (Message::Chat(entries), n)
            }
            MessageKind::PasswordChallenge => {
                let (challenge, n) = Self::decode_body::<PasswordChallenge>(kind, body)?;
                (Message::PasswordChallenge(challenge), n)
            }
            MessageKind::PasswordResponse => {
                let (response, n) = Self::decode_body::<PasswordResponse>(kind, body)?;
                (Message::PasswordResponse(response), n)
            }
            MessageKind::ConnectApproved => {
                let (session_id, n) = Self::decode_body::<u64>(kind, body)?;
                (Message::ConnectApproved { session_id }, n)
            }
            MessageKind::Disconnect => {
                let (reason, n) = Self::decode_body::<DisconnectReason>(kind, body)?;
                (Message::Disconnect { reason }, n)
            }
            MessageKind::QueueStatus => {
                let (position, n) = Self::decode_body::<u16>(kind, body)?;
                (Message::QueueStatus { position }, n)
            }
        };

        if consumed != body.len() {
            return Err(TidelinkError::ProtocolViolation {
                context: format!(
                    "{} bytes of trailing garbage after {:?} body",
                    body.len() - consumed,
                    kind
                ),
            });
        }
        Ok(message)
    }

    fn decode_body<T: serde::de::DeserializeOwned>(
        kind: MessageKind,
        body: &[u8],
    ) -> Result<(T, usize), TidelinkError> {
        codec::decode(body).map_err(|e| TidelinkError::ProtocolViolation {
            context: format!("malformed {kind:?} body: {e}"),
        })
    }
}
