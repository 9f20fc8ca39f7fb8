//! Ordered outbound queue of reliable-ish text messages.
//!
//! The transport gives no delivery guarantee, so chat entries are kept
//! queued and retransmitted until the server's periodic acknowledgement
//! snapshot passes their sequence id. Entries are packed into outgoing
//! packets oldest-first up to a byte budget; overflow carries to the next
//! tick. No entry is ever dropped for size reasons alone.

use std::collections::VecDeque;

use smallvec::SmallVec;
use tracing::trace;

use crate::network::messages::{ChatWireEntry, Message};
use crate::SequenceId;

// Fixed-int wire cost of one entry: 2-byte sequence id + 8-byte string
// length prefix.
const ENTRY_OVERHEAD: usize = 10;

/// One queued chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatQueueEntry {
    /// Locally assigned sequence id.
    pub seq: SequenceId,
    /// Message text.
    pub text: String,
}

/// Outbound-only ordered chat queue with ack-based pruning.
#[derive(Debug, Clone)]
pub struct ChatMessageQueue {
    next_seq: SequenceId,
    last_acked: Option<SequenceId>,
    entries: VecDeque<ChatQueueEntry>,
    packet_budget: usize,
}

impl ChatMessageQueue {
    /// Creates an empty queue. `packet_budget` bounds the body bytes packed
    /// into one outgoing packet.
    #[must_use]
    pub fn new(packet_budget: usize) -> Self {
        Self {
            next_seq: SequenceId::new(1),
            last_acked: None,
            entries: VecDeque::new(),
            packet_budget,
        }
    }

    /// Queues a message and returns the sequence id assigned to it.
    pub fn submit(&mut self, text: impl Into<String>) -> SequenceId {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.next();
        self.entries.push_back(ChatQueueEntry {
            seq,
            text: text.into(),
        });
        seq
    }

    /// Applies an acknowledgement snapshot: prunes every entry whose id is
    /// not newer than `acked`. Returns the number of entries pruned.
    ///
    /// Stale snapshots (an `acked` older than one already seen) still prune
    /// correctly because pruning is monotone in the modular ordering.
    pub fn acknowledge(&mut self, acked: SequenceId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.seq.is_newer_than(acked));
        let pruned = before - self.entries.len();
        if pruned > 0 {
            trace!("chat ack {} pruned {} entries", acked, pruned);
        }
        match self.last_acked {
            Some(last) if !acked.is_newer_than(last) => {}
            _ => self.last_acked = Some(acked),
        }
        pruned
    }

    /// Packs unacknowledged entries, oldest-first, into one outgoing chat
    /// message up to the byte budget. Returns `None` when the queue is
    /// empty. The entries stay queued until acknowledged; calling this every
    /// tick is what provides the retransmission.
    ///
    /// A single entry larger than the whole budget is still sent alone
    /// rather than dropped.
    #[must_use]
    pub fn pack(&self) -> Option<Message> {
        if self.entries.is_empty() {
            return None;
        }
        let mut packed: SmallVec<[ChatWireEntry; 4]> = SmallVec::new();
        let mut used = 0usize;
        for entry in &self.entries {
            let cost = ENTRY_OVERHEAD + entry.text.len();
            if !packed.is_empty() && used + cost > self.packet_budget {
                break;
            }
            used += cost;
            packed.push(ChatWireEntry {
                seq: entry.seq,
                text: entry.text.clone(),
            });
        }
        Some(Message::Chat(packed.into_vec()))
    }

    /// Newest id the server has acknowledged, if any snapshot arrived yet.
    #[must_use]
    pub fn last_acked(&self) -> Option<SequenceId> {
        self.last_acked
    }

    /// Number of unacknowledged entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unacknowledged entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ChatQueueEntry> {
        self.entries.iter()
    }
}
