//! Exactly-once, in-order application of entity-targeted state updates.
//!
//! The server tags every entity event with a wraparound [`SequenceId`]; the
//! sequencer tracks the newest applied id per channel and drops duplicates
//! and stale reorders without error. A missing target entity is not fatal
//! either (it may already have been removed on this client). What *is*
//! fatal for the round is an unexpected application failure: that indicates
//! a genuine simulation divergence between client and server, so the whole
//! batch is aborted and a structured [`DesyncReport`] is generated.

use tracing::{debug, trace, warn};

use crate::network::messages::EntityEventRecord;
use crate::{EntityId, SequenceId};

/// The two logical event channels, each with independent sequencing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventChannel {
    /// Ordinary entity state events.
    Event,
    /// Lower-frequency position updates for physically simulated bodies.
    Position,
}

impl EventChannel {
    const fn slot(self) -> usize {
        match self {
            EventChannel::Event => 0,
            EventChannel::Position => 1,
        }
    }
}

impl std::fmt::Display for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventChannel::Event => write!(f, "event"),
            EventChannel::Position => write!(f, "position"),
        }
    }
}

/// Outcome of applying one event to one entity, reported by the
/// [`EntityRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityApplyError {
    /// The target entity does not exist on this client. Contained: the
    /// event is dropped and the batch continues.
    MissingEntity,
    /// The payload could not be deserialized or applied. Aborts the batch
    /// with a desync report.
    Malformed {
        /// What went wrong.
        context: String,
    },
}

/// Resolves entity ids and applies opaque event payloads to local objects.
///
/// Implemented by the embedding game. Applying the same authoritative state
/// twice must be a no-op at the object level; the sequencer upholds the same
/// invariant at the stream level.
pub trait EntityRegistry {
    /// Applies an ordinary state event to the target entity.
    fn apply_event(&mut self, entity: EntityId, payload: &[u8]) -> Result<(), EntityApplyError>;

    /// Applies a position update to the target entity.
    fn apply_position(&mut self, entity: EntityId, payload: &[u8])
        -> Result<(), EntityApplyError>;

    /// Snapshot of every entity id currently tracked, for desync reports.
    fn tracked_entities(&self) -> Vec<EntityId>;
}

/// Counters describing what one batch did.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct IngestSummary {
    /// Events applied to a live entity.
    pub applied: usize,
    /// Duplicate or stale events dropped without error.
    pub discarded: usize,
    /// Events whose target entity no longer exists locally.
    pub missing: usize,
    /// Accepted events whose id skipped past `last_applied + 1`.
    pub gaps: usize,
}

/// Structured dump generated when event application fails unexpectedly.
///
/// This is the single most severe failure class in the protocol: it means
/// the client and server simulations have genuinely diverged, not that the
/// network hiccuped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesyncReport {
    /// The channel that was being ingested.
    pub channel: EventChannel,
    /// The entity whose event failed to apply.
    pub entity: EntityId,
    /// Newest id applied on the channel before the failure.
    pub last_applied: Option<SequenceId>,
    /// The id of the failing event.
    pub received: SequenceId,
    /// The registry's failure description.
    pub context: String,
    /// All entity ids tracked locally at the time of failure.
    pub tracked_entities: Vec<EntityId>,
}

impl std::fmt::Display for DesyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let expected = self
            .last_applied
            .map_or_else(|| "any".to_owned(), |id| id.next().to_string());
        write!(
            f,
            "failed to apply {} channel event {} to {} (expected id {}): {}; {} entities tracked",
            self.channel,
            self.received,
            self.entity,
            expected,
            self.context,
            self.tracked_entities.len()
        )
    }
}

/// Tracks the newest applied sequence id per channel and filters the event
/// stream accordingly.
#[derive(Debug, Clone, Default)]
pub struct EntityEventSequencer {
    last_applied: [Option<SequenceId>; 2],
}

impl EntityEventSequencer {
    /// Creates a sequencer with no events applied on either channel. The
    /// first event on each channel is always accepted, wherever the server
    /// starts its numbering.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest id applied on the given channel, if any.
    #[must_use]
    pub fn last_applied(&self, channel: EventChannel) -> Option<SequenceId> {
        self.last_applied[channel.slot()]
    }

    /// Forgets all per-channel state. Called between rounds.
    pub fn reset(&mut self) {
        self.last_applied = [None, None];
    }

    /// Applies a batch of records to local entities through the registry.
    ///
    /// Records are processed in batch order. Duplicates and stale reorders
    /// are dropped silently; a missing target entity is dropped with a debug
    /// log and the batch continues. An unexpected application failure aborts
    /// the rest of the batch and returns a [`DesyncReport`].
    pub fn ingest_batch(
        &mut self,
        channel: EventChannel,
        records: &[EntityEventRecord],
        registry: &mut dyn EntityRegistry,
    ) -> Result<IngestSummary, Box<DesyncReport>> {
        let slot = channel.slot();
        let mut summary = IngestSummary::default();

        for record in records {
            let last = self.last_applied[slot];
            let newer = last.is_none_or_newer(record.seq);
            if !newer {
                trace!(
                    "dropping stale/duplicate {} event {} for {}",
                    channel,
                    record.seq,
                    record.entity
                );
                summary.discarded += 1;
                continue;
            }
            if let Some(last) = last {
                if record.seq != last.next() {
                    warn!(
                        "{} channel skipped from {} to {}",
                        channel, last, record.seq
                    );
                    summary.gaps += 1;
                }
            }

            let applied = match channel {
                EventChannel::Event => registry.apply_event(record.entity, &record.payload),
                EventChannel::Position => registry.apply_position(record.entity, &record.payload),
            };
            match applied {
                Ok(()) => summary.applied += 1,
                Err(EntityApplyError::MissingEntity) => {
                    // The entity may have been deleted on this client
                    // already; not fatal by itself.
                    debug!(
                        "no local entity {} for {} event {}",
                        record.entity, channel, record.seq
                    );
                    summary.missing += 1;
                }
                Err(EntityApplyError::Malformed { context }) => {
                    return Err(Box::new(DesyncReport {
                        channel,
                        entity: record.entity,
                        last_applied: last,
                        received: record.seq,
                        context,
                        tracked_entities: registry.tracked_entities(),
                    }));
                }
            }
            // The channel advances past missing entities too, so a later
            // resend of the same event stays idempotent.
            self.last_applied[slot] = Some(record.seq);
        }
        Ok(summary)
    }
}

trait OptionSequenceExt {
    fn is_none_or_newer(self, candidate: SequenceId) -> bool;
}

impl OptionSequenceExt for Option<SequenceId> {
    fn is_none_or_newer(self, candidate: SequenceId) -> bool {
        match self {
            None => true,
            Some(last) => candidate.is_newer_than(last),
        }
    }
}
