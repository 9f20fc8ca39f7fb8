//! The single entry point for inbound frames.
//!
//! Every frame drained from the inbox passes through [`PacketDispatcher`],
//! which decodes the one-byte kind tag, consumes the round-lifecycle
//! messages itself and hands everything else back to the session for
//! routing. While the round is waiting for its finalize message, non-round
//! traffic is deferred onto a pending queue instead of being applied - the
//! client must not apply entity updates before it has finished loading the
//! round's deterministic content. This is the only queuing point in the
//! system.

use std::collections::VecDeque;

use tracing::{debug, trace};
use web_time::Instant;

use crate::events::SessionEvent;
use crate::network::messages::{Message, MessageKind};
use crate::round::{FileRequester, RoundBuilder, RoundLifecycle, RoundLifecycleState};
use crate::TidelinkError;

/// A decoded message that arrived before the round finished loading, held
/// for FIFO replay once the lifecycle reaches `Started`.
#[derive(Debug, Clone)]
struct PendingMessage {
    message: Message,
    received_at: Instant,
}

/// Decodes inbound frames and routes them relative to the round lifecycle.
#[derive(Debug)]
pub struct PacketDispatcher {
    lifecycle: RoundLifecycle,
    pending: VecDeque<PendingMessage>,
}

impl PacketDispatcher {
    /// Creates a dispatcher owning the given lifecycle.
    #[must_use]
    pub fn new(lifecycle: RoundLifecycle) -> Self {
        Self {
            lifecycle,
            pending: VecDeque::new(),
        }
    }

    /// Current round lifecycle state.
    #[must_use]
    pub fn round_state(&self) -> RoundLifecycleState {
        self.lifecycle.state()
    }

    /// Number of deferred messages.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decodes and dispatches one inbound frame.
    ///
    /// Round lifecycle messages are consumed here; all other kinds are
    /// returned for the session to route. The returned vector also carries
    /// any deferred messages released by a transition to `Started`, in their
    /// original arrival order.
    ///
    /// Fails only on framing errors (unknown tag, truncated body, trailing
    /// bytes), which are fatal for the connection.
    pub fn dispatch(
        &mut self,
        raw: &[u8],
        now: Instant,
        builder: &mut dyn RoundBuilder,
        files: &mut dyn FileRequester,
        events: &mut VecDeque<SessionEvent>,
    ) -> Result<Vec<Message>, TidelinkError> {
        let message = Message::decode(raw)?;
        let mut released = Vec::new();
        self.handle(message, now, builder, files, events, &mut released);
        Ok(released)
    }

    fn handle(
        &mut self,
        message: Message,
        now: Instant,
        builder: &mut dyn RoundBuilder,
        files: &mut dyn FileRequester,
        events: &mut VecDeque<SessionEvent>,
        released: &mut Vec<Message>,
    ) {
        // Finalize, end-of-round and keep-alive are the only kinds allowed
        // through while the finalize wait is in progress.
        if self.lifecycle.state() == RoundLifecycleState::WaitingForFinalize
            && !matches!(
                message.kind(),
                MessageKind::RoundFinalize | MessageKind::RoundEnd | MessageKind::KeepAlive
            )
        {
            trace!("deferring {:?} until the round starts", message.kind());
            self.pending.push_back(PendingMessage {
                message,
                received_at: now,
            });
            return;
        }

        match message {
            Message::KeepAlive => {}
            Message::RoundStart(start) => {
                self.lifecycle
                    .on_round_start(&start, now, builder, files, events);
                self.after_lifecycle_step(now, builder, files, events, released);
            }
            Message::RoundFinalize(finalize) => {
                self.lifecycle.on_finalize(&finalize, builder, events);
                self.after_lifecycle_step(now, builder, files, events, released);
            }
            Message::RoundEnd => {
                self.lifecycle.on_round_end(builder, events);
                self.drop_pending();
            }
            other => released.push(other),
        }
    }

    /// Replays deferred messages after a transition to `Started`, or drops
    /// them when the round setup aborted.
    fn after_lifecycle_step(
        &mut self,
        now: Instant,
        builder: &mut dyn RoundBuilder,
        files: &mut dyn FileRequester,
        events: &mut VecDeque<SessionEvent>,
        released: &mut Vec<Message>,
    ) {
        match self.lifecycle.state() {
            RoundLifecycleState::Started => {
                if !self.pending.is_empty() {
                    debug!("replaying {} deferred messages", self.pending.len());
                }
                while let Some(pending) = self.pending.pop_front() {
                    self.handle(
                        pending.message,
                        pending.received_at,
                        builder,
                        files,
                        events,
                        released,
                    );
                }
            }
            state if state.is_aborted() => self.drop_pending(),
            _ => {}
        }
    }

    /// Advances the finalize wait. Returns a finalize re-request when due.
    #[must_use]
    pub fn poll(
        &mut self,
        now: Instant,
        builder: &mut dyn RoundBuilder,
        events: &mut VecDeque<SessionEvent>,
    ) -> Option<Message> {
        let request = self.lifecycle.poll(now, builder, events);
        if self.lifecycle.state().is_aborted() {
            self.drop_pending();
        }
        request
    }

    /// Tears the current round down into the error state, e.g. on an
    /// entity-level desync.
    pub fn fail_round(
        &mut self,
        builder: &mut dyn RoundBuilder,
        events: &mut VecDeque<SessionEvent>,
    ) {
        self.lifecycle.force_error(builder, events);
        self.drop_pending();
    }

    /// Resets lifecycle and pending queue, e.g. when the connection itself
    /// goes away.
    pub fn reset(&mut self) {
        self.lifecycle.reset();
        self.pending.clear();
    }

    fn drop_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!("dropping {} deferred messages", self.pending.len());
            self.pending.clear();
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::network::messages::{
        EntityEventRecord, FileKind, ModeFlags, RoundFinalize, RoundStart,
    };
    use crate::round::{BuiltRound, RoundBuildError, RoundSettings};
    use crate::{EntityId, SequenceId};
    use web_time::Duration;

    struct StubBuilder {
        equality: u32,
    }

    impl RoundBuilder for StubBuilder {
        fn build(&mut self, _settings: &RoundSettings) -> Result<BuiltRound, RoundBuildError> {
            Ok(BuiltRound {
                level_equality: self.equality,
            })
        }
        fn preload(&mut self, _content: &[String]) {}
        fn teardown(&mut self) {}
    }

    struct StubFiles;

    impl FileRequester for StubFiles {
        fn request_file(&mut self, _kind: FileKind, _name: &str, _hash: &str) {}
    }

    fn dispatcher() -> PacketDispatcher {
        PacketDispatcher::new(RoundLifecycle::new(
            Duration::from_secs(2),
            Duration::from_secs(30),
        ))
    }

    fn round_start_frame() -> Vec<u8> {
        Message::RoundStart(RoundStart {
            random_seed: 1,
            level_seed: "seed".to_owned(),
            difficulty: 50.0,
            mode: ModeFlags::default(),
            submarine_name: "Typhon".to_owned(),
            submarine_hash: "a1b2c3".to_owned(),
            mission_id: None,
            campaign_save_id: None,
            inlined_finalize: None,
        })
        .encode()
        .unwrap()
    }

    fn finalize_frame(equality: u32) -> Vec<u8> {
        Message::RoundFinalize(RoundFinalize {
            preload_content: vec![],
            level_equality: equality,
        })
        .encode()
        .unwrap()
    }

    fn entity_events_frame(seq: u16) -> Vec<u8> {
        Message::EntityEvents(vec![EntityEventRecord {
            seq: SequenceId::new(seq),
            entity: EntityId::new(1),
            payload: vec![seq as u8],
        }])
        .encode()
        .unwrap()
    }

    #[test]
    fn non_round_messages_pass_through_outside_the_finalize_wait() {
        let mut dispatcher = dispatcher();
        let mut builder = StubBuilder { equality: 7 };
        let mut files = StubFiles;
        let mut events = VecDeque::new();
        let now = Instant::now();

        let released = dispatcher
            .dispatch(&entity_events_frame(1), now, &mut builder, &mut files, &mut events)
            .unwrap();
        assert_eq!(released.len(), 1);
        assert!(matches!(released[0], Message::EntityEvents(_)));
    }

    #[test]
    fn early_entity_event_is_deferred_and_replayed_after_started() {
        let mut dispatcher = dispatcher();
        let mut builder = StubBuilder { equality: 7 };
        let mut files = StubFiles;
        let mut events = VecDeque::new();
        let now = Instant::now();

        let released = dispatcher
            .dispatch(&round_start_frame(), now, &mut builder, &mut files, &mut events)
            .unwrap();
        assert!(released.is_empty());
        assert_eq!(dispatcher.round_state(), RoundLifecycleState::WaitingForFinalize);

        // Entity events arriving mid-wait are queued, not applied.
        for seq in [1u16, 2] {
            let released = dispatcher
                .dispatch(&entity_events_frame(seq), now, &mut builder, &mut files, &mut events)
                .unwrap();
            assert!(released.is_empty());
        }
        assert_eq!(dispatcher.pending_len(), 2);

        // The finalize releases them in arrival order.
        let released = dispatcher
            .dispatch(&finalize_frame(7), now, &mut builder, &mut files, &mut events)
            .unwrap();
        assert_eq!(dispatcher.round_state(), RoundLifecycleState::Started);
        assert_eq!(dispatcher.pending_len(), 0);
        assert_eq!(released.len(), 2);
        match (&released[0], &released[1]) {
            (Message::EntityEvents(a), Message::EntityEvents(b)) => {
                assert_eq!(a[0].seq, SequenceId::new(1));
                assert_eq!(b[0].seq, SequenceId::new(2));
            }
            other => panic!("unexpected replay order: {other:?}"),
        }

        // A late duplicate finalize is ignored.
        let released = dispatcher
            .dispatch(&finalize_frame(7), now, &mut builder, &mut files, &mut events)
            .unwrap();
        assert!(released.is_empty());
        assert_eq!(dispatcher.round_state(), RoundLifecycleState::Started);
    }

    #[test]
    fn keep_alive_is_allowed_through_the_finalize_wait() {
        let mut dispatcher = dispatcher();
        let mut builder = StubBuilder { equality: 7 };
        let mut files = StubFiles;
        let mut events = VecDeque::new();
        let now = Instant::now();

        let _ = dispatcher
            .dispatch(&round_start_frame(), now, &mut builder, &mut files, &mut events)
            .unwrap();
        let released = dispatcher
            .dispatch(
                &Message::KeepAlive.encode().unwrap(),
                now,
                &mut builder,
                &mut files,
                &mut events,
            )
            .unwrap();
        assert!(released.is_empty());
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[test]
    fn round_end_during_the_wait_drops_deferred_messages() {
        let mut dispatcher = dispatcher();
        let mut builder = StubBuilder { equality: 7 };
        let mut files = StubFiles;
        let mut events = VecDeque::new();
        let now = Instant::now();

        let _ = dispatcher
            .dispatch(&round_start_frame(), now, &mut builder, &mut files, &mut events)
            .unwrap();
        let _ = dispatcher
            .dispatch(&entity_events_frame(1), now, &mut builder, &mut files, &mut events)
            .unwrap();
        assert_eq!(dispatcher.pending_len(), 1);

        let released = dispatcher
            .dispatch(
                &Message::RoundEnd.encode().unwrap(),
                now,
                &mut builder,
                &mut files,
                &mut events,
            )
            .unwrap();
        assert!(released.is_empty());
        assert_eq!(dispatcher.round_state(), RoundLifecycleState::Interrupted);
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[test]
    fn equality_mismatch_drops_deferred_messages() {
        let mut dispatcher = dispatcher();
        let mut builder = StubBuilder { equality: 7 };
        let mut files = StubFiles;
        let mut events = VecDeque::new();
        let now = Instant::now();

        let _ = dispatcher
            .dispatch(&round_start_frame(), now, &mut builder, &mut files, &mut events)
            .unwrap();
        let _ = dispatcher
            .dispatch(&entity_events_frame(1), now, &mut builder, &mut files, &mut events)
            .unwrap();

        let released = dispatcher
            .dispatch(&finalize_frame(999), now, &mut builder, &mut files, &mut events)
            .unwrap();
        assert!(released.is_empty());
        assert_eq!(dispatcher.round_state(), RoundLifecycleState::Error);
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[test]
    fn unknown_tag_is_a_fatal_framing_error() {
        let mut dispatcher = dispatcher();
        let mut builder = StubBuilder { equality: 7 };
        let mut files = StubFiles;
        let mut events = VecDeque::new();

        let err = dispatcher
            .dispatch(&[0xEE], Instant::now(), &mut builder, &mut files, &mut events)
            .unwrap_err();
        assert!(matches!(err, TidelinkError::ProtocolViolation { .. }));
    }

    #[test]
    fn poll_timeout_drops_deferred_messages() {
        let mut dispatcher = dispatcher();
        let mut builder = StubBuilder { equality: 7 };
        let mut files = StubFiles;
        let mut events = VecDeque::new();
        let start = Instant::now();

        let _ = dispatcher
            .dispatch(&round_start_frame(), start, &mut builder, &mut files, &mut events)
            .unwrap();
        let _ = dispatcher
            .dispatch(&entity_events_frame(1), start, &mut builder, &mut files, &mut events)
            .unwrap();

        let request = dispatcher.poll(start + Duration::from_secs(30), &mut builder, &mut events);
        assert!(request.is_none());
        assert_eq!(dispatcher.round_state(), RoundLifecycleState::TimedOut);
        assert_eq!(dispatcher.pending_len(), 0);
    }
}
