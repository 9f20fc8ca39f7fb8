//! The per-tick session pump.
//!
//! [`ClientSession`] owns every protocol component and advances all of them
//! from a single [`tick`] call on the simulation thread. Nothing here
//! blocks: the transport deposits frames into the [`Inbox`] from its own
//! receive loop, and all waits (handshake, finalize, correction windows,
//! queue polls) are expressed as deadline checks against the `now` the
//! caller passes in.
//!
//! [`tick`]: ClientSession::tick

use std::collections::VecDeque;

use tracing::{debug, error, warn};
use web_time::{Duration, Instant};

use crate::chat::ChatMessageQueue;
use crate::correction::DelayedCorrectionBuffer;
use crate::dispatcher::PacketDispatcher;
use crate::entity_event::{
    DesyncReport, EntityApplyError, EntityEventSequencer, EntityRegistry, EventChannel,
};
use crate::events::SessionEvent;
use crate::network::messages::Message;
use crate::network::transport::{CloseReason, DeliveryMode, Inbox, Transport};
use crate::reconnect::{ConnectState, ReconnectionSupervisor, SupervisorDirective};
use crate::roster::{SessionRoster, SnapshotOutcome};
use crate::round::{FileRequester, RoundBuilder, RoundLifecycle, RoundLifecycleState};
use crate::sessions::builder::SessionConfig;
use crate::sessions::event_drain::EventDrain;
use crate::{EntityId, SequenceId, TidelinkError};

/// A client session: the single object the embedding game talks to.
///
/// Construct one through [`SessionBuilder`], then drive it by calling
/// [`tick`] once per simulation step and draining [`events`] afterwards.
/// Fatal errors (framing violations, serialization failures) close the
/// transport and poison the session; entity-level desyncs tear down only
/// the round and leave the connection usable.
///
/// [`SessionBuilder`]: crate::SessionBuilder
/// [`tick`]: ClientSession::tick
/// [`events`]: ClientSession::events
#[derive(Debug)]
pub struct ClientSession<T: Transport> {
    config: SessionConfig,
    transport: T,
    inbox: Inbox,
    dispatcher: PacketDispatcher,
    sequencer: EntityEventSequencer,
    corrections: DelayedCorrectionBuffer,
    supervisor: ReconnectionSupervisor,
    chat: ChatMessageQueue,
    roster: SessionRoster,
    events: VecDeque<SessionEvent>,
    next_keep_alive: Option<Instant>,
    poisoned: bool,
}

impl<T: Transport> ClientSession<T> {
    pub(crate) fn new(config: SessionConfig, transport: T, inbox: Inbox) -> Self {
        Self {
            config,
            transport,
            inbox,
            dispatcher: PacketDispatcher::new(RoundLifecycle::new(
                config.finalize_rerequest_interval,
                config.finalize_deadline,
            )),
            sequencer: EntityEventSequencer::new(),
            corrections: DelayedCorrectionBuffer::new(config.correction_delay),
            supervisor: ReconnectionSupervisor::new(
                config.handshake_deadline,
                config.password_check_delay,
                config.queue_poll_interval,
            ),
            chat: ChatMessageQueue::new(config.chat_packet_budget),
            roster: SessionRoster::new(),
            events: VecDeque::new(),
            next_keep_alive: None,
            poisoned: false,
        }
    }

    /// Opens the transport and begins a connection attempt.
    pub fn connect(&mut self, now: Instant) -> Result<(), TidelinkError> {
        if self.poisoned {
            return Err(TidelinkError::InvalidRequest {
                info: "session closed after a fatal error".to_owned(),
            });
        }
        self.transport.open()?;
        self.supervisor.begin_connect(now, &mut self.events);
        self.next_keep_alive = Some(now + self.config.keep_alive_interval);
        Ok(())
    }

    /// Cancels an in-flight connection attempt. Safe to call at any point;
    /// no timers or queued work stay active afterwards.
    pub fn cancel_connect(&mut self) {
        self.supervisor.cancel();
        self.transport.close(CloseReason::Cancelled);
        self.dispatcher.reset();
    }

    /// Answers the outstanding password challenge with a credential digest.
    pub fn supply_password(&mut self, digest: Vec<u8>, now: Instant) -> Result<(), TidelinkError> {
        let response = self.supervisor.supply_password(digest, now)?;
        self.transport.send_message(&response, DeliveryMode::Reliable)
    }

    /// Queues a chat message and returns its assigned sequence id. The
    /// entry is retransmitted every tick until the server acknowledges it.
    pub fn send_chat(&mut self, text: impl Into<String>) -> SequenceId {
        self.chat.submit(text)
    }

    /// Records a local optimistic write on an entity, opening its delayed
    /// correction window.
    pub fn predict(&mut self, entity: EntityId) {
        self.corrections.predict(entity);
    }

    /// Forgets all per-entity state for a removed entity.
    pub fn remove_entity(&mut self, entity: EntityId) {
        self.corrections.remove(entity);
    }

    /// Drains queued session events in order.
    pub fn events(&mut self) -> EventDrain<'_> {
        EventDrain::new(&mut self.events)
    }

    /// Current round lifecycle state.
    #[must_use]
    pub fn round_state(&self) -> RoundLifecycleState {
        self.dispatcher.round_state()
    }

    /// Current connection attempt state.
    #[must_use]
    pub fn connect_state(&self) -> ConnectState {
        self.supervisor.state()
    }

    /// Server-assigned session identity, once approved.
    #[must_use]
    pub fn session_id(&self) -> Option<u64> {
        self.supervisor.session_id()
    }

    /// The participant roster as of the last accepted snapshot.
    #[must_use]
    pub fn roster(&self) -> &SessionRoster {
        &self.roster
    }

    /// Advances the whole session by one simulation step.
    ///
    /// `now` and `dt` come from the caller's clock; the session keeps no
    /// clock of its own. The order within a tick is fixed: supervisor
    /// timers, inbound frames (strictly in arrival order), the finalize
    /// wait, correction windows, chat retransmission, keep-alive.
    ///
    /// Returns an error only for connection-fatal failures; after that the
    /// session is poisoned and every further call fails. Entity-level
    /// desyncs are reported through [`SessionEvent::Desynchronized`] and do
    /// not fail the tick.
    pub fn tick(
        &mut self,
        now: Instant,
        dt: Duration,
        registry: &mut dyn EntityRegistry,
        builder: &mut dyn RoundBuilder,
        files: &mut dyn FileRequester,
    ) -> Result<(), TidelinkError> {
        if self.poisoned {
            return Err(TidelinkError::NotConnected);
        }

        // Connection attempt timers.
        match self.supervisor.poll(now, &mut self.events) {
            Some(SupervisorDirective::CloseTimedOut) => {
                self.transport.close(CloseReason::Timeout);
                self.dispatcher.reset();
            }
            Some(SupervisorDirective::RetryConnect) => {
                self.transport.close(CloseReason::Shutdown);
                self.transport.open()?;
                self.supervisor.begin_connect(now, &mut self.events);
            }
            None => {}
        }

        // Inbound frames, strictly in arrival order.
        self.transport.poll_receive();
        for frame in self.inbox.drain() {
            let released =
                match self
                    .dispatcher
                    .dispatch(&frame, now, builder, files, &mut self.events)
                {
                    Ok(released) => released,
                    Err(err) => return Err(self.poison(err)),
                };
            for message in released {
                if let Err(err) = self.route(message, now, registry, builder) {
                    return Err(self.poison(err));
                }
            }
        }

        // Finalize wait: re-request or time out.
        if let Some(request) = self.dispatcher.poll(now, builder, &mut self.events) {
            self.transport
                .send_message(&request, DeliveryMode::Reliable)?;
        }

        // Correction windows that closed this tick release their held
        // authoritative payloads.
        for (entity, payload) in self.corrections.advance(dt) {
            match registry.apply_event(entity, &payload) {
                Ok(()) => {}
                Err(EntityApplyError::MissingEntity) => {
                    debug!("entity {entity} removed before its correction window closed");
                }
                Err(EntityApplyError::Malformed { context }) => {
                    let report = Box::new(DesyncReport {
                        channel: EventChannel::Event,
                        entity,
                        last_applied: self.sequencer.last_applied(EventChannel::Event),
                        received: self
                            .sequencer
                            .last_applied(EventChannel::Event)
                            .unwrap_or(SequenceId::ZERO),
                        context: format!("delayed correction failed to apply: {context}"),
                        tracked_entities: registry.tracked_entities(),
                    });
                    self.fail_round(report, builder);
                }
            }
        }

        let connected = self.supervisor.state() == ConnectState::Approved
            && self.transport.is_open();

        // Chat retransmission: everything unacknowledged, every tick.
        if connected {
            if let Some(packed) = self.chat.pack() {
                self.transport
                    .send_message(&packed, DeliveryMode::Reliable)?;
            }
        }

        // Keep-alive ping.
        if connected {
            if let Some(next) = self.next_keep_alive {
                if now >= next {
                    self.transport
                        .send_message(&Message::KeepAlive, DeliveryMode::Unreliable)?;
                    self.next_keep_alive = Some(now + self.config.keep_alive_interval);
                }
            }
        }

        self.enforce_event_limit();
        Ok(())
    }

    /// Routes one non-round message released by the dispatcher.
    fn route(
        &mut self,
        message: Message,
        now: Instant,
        registry: &mut dyn EntityRegistry,
        builder: &mut dyn RoundBuilder,
    ) -> Result<(), TidelinkError> {
        let kind = message.kind();
        match message {
            Message::EntityEvents(records) => {
                let mut gate = CorrectionGate {
                    registry,
                    corrections: &mut self.corrections,
                };
                match self
                    .sequencer
                    .ingest_batch(EventChannel::Event, &records, &mut gate)
                {
                    Ok(summary) => {
                        if summary.gaps > 0 {
                            self.events.push_back(SessionEvent::SequenceGap {
                                channel: EventChannel::Event,
                                count: summary.gaps,
                            });
                        }
                    }
                    Err(report) => self.fail_round(report, builder),
                }
            }
            Message::EntityPositions(records) => {
                match self
                    .sequencer
                    .ingest_batch(EventChannel::Position, &records, registry)
                {
                    Ok(summary) => {
                        if summary.gaps > 0 {
                            self.events.push_back(SessionEvent::SequenceGap {
                                channel: EventChannel::Position,
                                count: summary.gaps,
                            });
                        }
                    }
                    Err(report) => self.fail_round(report, builder),
                }
            }
            Message::ChatAck { last_acked } => {
                let _ = self.chat.acknowledge(last_acked);
                self.events
                    .push_back(SessionEvent::ChatAcknowledged { up_to: last_acked });
            }
            Message::RosterSnapshot { version, entries } => {
                if let SnapshotOutcome::Applied(diff) = self.roster.apply_snapshot(version, entries)
                {
                    self.events.push_back(SessionEvent::RosterUpdated {
                        joined: diff.joined.to_vec(),
                        left: diff.left.to_vec(),
                    });
                    for participant in diff.permission_changes {
                        if let Some(entry) = self.roster.get(participant) {
                            self.events.push_back(SessionEvent::PermissionsChanged {
                                participant,
                                permissions: entry.permissions,
                            });
                        }
                    }
                }
            }
            Message::PasswordChallenge(challenge) => {
                self.supervisor
                    .on_password_challenge(challenge, now, &mut self.events);
            }
            Message::ConnectApproved { session_id } => {
                self.supervisor.on_approved(session_id, &mut self.events);
            }
            Message::Disconnect { reason } => {
                use crate::reconnect::ReconnectDisposition;

                let disposition = self.supervisor.on_disconnect(reason, now, &mut self.events);
                self.end_round_locally(builder);
                match disposition {
                    ReconnectDisposition::QueueWait => {
                        // Poll the queue on a fixed interval instead of
                        // holding the connection open.
                        self.transport.close(CloseReason::Shutdown);
                    }
                    ReconnectDisposition::RejoinPreservingSession
                    | ReconnectDisposition::Reconnect => {
                        self.transport.close(CloseReason::Shutdown);
                        self.transport.open()?;
                        self.supervisor.begin_connect(now, &mut self.events);
                    }
                    ReconnectDisposition::Terminal => {
                        self.transport.close(CloseReason::Shutdown);
                    }
                }
            }
            Message::QueueStatus { position } => {
                self.supervisor.on_queue_status(position, &mut self.events);
            }
            // These kinds only ever travel client-to-server.
            Message::Chat(_) | Message::PasswordResponse(_) | Message::FinalizeRequest => {
                return Err(TidelinkError::ProtocolViolation {
                    context: format!("received client-to-server message kind {kind:?}"),
                });
            }
            // Consumed by the dispatcher; they never reach routing.
            Message::KeepAlive
            | Message::RoundStart(_)
            | Message::RoundFinalize(_)
            | Message::RoundEnd => {}
        }
        Ok(())
    }

    /// Tears the round down after an entity-level desync. The connection
    /// stays up; the server decides whether to let us rejoin mid-round.
    fn fail_round(&mut self, report: Box<DesyncReport>, builder: &mut dyn RoundBuilder) {
        warn!("simulation desync: {report}");
        self.events
            .push_back(SessionEvent::Desynchronized { report });
        self.dispatcher.fail_round(builder, &mut self.events);
        self.sequencer.reset();
        self.corrections.clear();
    }

    /// Drops all round-scoped state after the connection went away.
    fn end_round_locally(&mut self, builder: &mut dyn RoundBuilder) {
        builder.teardown();
        self.dispatcher.reset();
        self.sequencer.reset();
        self.corrections.clear();
    }

    /// Closes the connection after a fatal protocol error and poisons the
    /// session.
    fn poison(&mut self, error: TidelinkError) -> TidelinkError {
        error!("fatal protocol error: {error}");
        self.transport.close(CloseReason::ProtocolViolation);
        self.events.push_back(SessionEvent::FatalError {
            message: error.to_string(),
        });
        self.poisoned = true;
        error
    }

    fn enforce_event_limit(&mut self) {
        let limit = self.config.event_queue_limit;
        if self.events.len() > limit {
            let dropped = self.events.len() - limit;
            warn!("event queue over its limit, dropping {dropped} oldest events");
            self.events.drain(..dropped);
        }
    }
}

/// Registry wrapper that runs ordinary entity events through the delayed
/// correction buffer. A payload captured by an open correction window
/// counts as handled so the sequencer still advances past it; position
/// updates bypass the buffer entirely.
struct CorrectionGate<'a> {
    registry: &'a mut dyn EntityRegistry,
    corrections: &'a mut DelayedCorrectionBuffer,
}

impl EntityRegistry for CorrectionGate<'_> {
    fn apply_event(&mut self, entity: EntityId, payload: &[u8]) -> Result<(), EntityApplyError> {
        match self.corrections.intercept(entity, payload.to_vec(), true) {
            Some(payload) => self.registry.apply_event(entity, &payload),
            None => Ok(()),
        }
    }

    fn apply_position(&mut self, entity: EntityId, payload: &[u8]) -> Result<(), EntityApplyError> {
        self.registry.apply_position(entity, payload)
    }

    fn tracked_entities(&self) -> Vec<EntityId> {
        self.registry.tracked_entities()
    }
}
