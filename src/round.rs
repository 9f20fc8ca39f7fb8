//! The round start/finalize/end state machine.
//!
//! Round lifecycle is tracked independently from raw connectivity: the
//! connection can be perfectly healthy while the round is still loading, and
//! a round can survive a brief transport hiccup. The lifecycle owns the
//! finalize wait, including the fixed-interval re-request and the absolute
//! deadline, and hands the actual world construction to a [`RoundBuilder`]
//! supplied by the embedding game.

use std::collections::VecDeque;

use tracing::{debug, warn};
use web_time::{Duration, Instant};

use crate::events::SessionEvent;
use crate::network::messages::{FileKind, Message, ModeFlags, RoundFinalize, RoundStart};

/// Default interval between finalize re-requests.
pub const DEFAULT_FINALIZE_REREQUEST_INTERVAL: Duration = Duration::from_secs(2);
/// Default absolute deadline for the finalize wait.
pub const DEFAULT_FINALIZE_DEADLINE: Duration = Duration::from_secs(30);

/// Where the current round is in its lifecycle.
///
/// Owned exclusively by the session engine and mutated only on the tick
/// thread. The happy path is:
///
/// ```text
/// NotStarted --round start--> Starting --built--> WaitingForFinalize
///     WaitingForFinalize --finalize (equality ok)--> Started
///     Started --round end--> NotStarted
/// ```
///
/// The failure exits from the loading states:
///
/// ```text
/// WaitingForFinalize --deadline exceeded--> TimedOut
/// Starting | WaitingForFinalize --construction failed / equality mismatch--> Error
/// Starting | WaitingForFinalize --round end--> Interrupted
/// ```
///
/// Every terminal state other than `Started` aborts round setup and returns
/// control to the lobby; none of them closes the connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RoundLifecycleState {
    /// No round is running or loading.
    NotStarted,
    /// A round start arrived; local construction is in progress (possibly
    /// waiting on a missing asset to be transferred).
    Starting,
    /// Construction finished; waiting for the server's finalize message.
    WaitingForFinalize,
    /// The round is live. Entity updates flow freely.
    Started,
    /// The finalize message never arrived within the deadline.
    TimedOut,
    /// Construction failed or the level equality check mismatched.
    Error,
    /// The server ended the round while this client was still loading it.
    Interrupted,
}

impl RoundLifecycleState {
    /// Whether the round is still loading (entity updates must be deferred).
    #[must_use]
    pub const fn is_loading(self) -> bool {
        matches!(
            self,
            RoundLifecycleState::Starting | RoundLifecycleState::WaitingForFinalize
        )
    }

    /// Whether this is a terminal non-`Started` state.
    #[must_use]
    pub const fn is_aborted(self) -> bool {
        matches!(
            self,
            RoundLifecycleState::TimedOut
                | RoundLifecycleState::Error
                | RoundLifecycleState::Interrupted
        )
    }
}

impl std::fmt::Display for RoundLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoundLifecycleState::NotStarted => "not started",
            RoundLifecycleState::Starting => "starting",
            RoundLifecycleState::WaitingForFinalize => "waiting for finalize",
            RoundLifecycleState::Started => "started",
            RoundLifecycleState::TimedOut => "timed out",
            RoundLifecycleState::Error => "error",
            RoundLifecycleState::Interrupted => "interrupted",
        };
        write!(f, "{name}")
    }
}

/// Everything the builder needs to materialize a round locally.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSettings {
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
    /// Expected content hash of the submarine file.
    pub submarine_hash: String,
    /// Selected mission identifier, if any.
    pub mission_id: Option<String>,
    /// Campaign save identifier, if this round continues a campaign.
    pub campaign_save_id: Option<String>,
}

impl From<&RoundStart> for RoundSettings {
    fn from(start: &RoundStart) -> Self {
        RoundSettings {
            random_seed: start.random_seed,
            level_seed: start.level_seed.clone(),
            difficulty: start.difficulty,
            mode: start.mode,
            submarine_name: start.submarine_name.clone(),
            submarine_hash: start.submarine_hash.clone(),
            mission_id: start.mission_id.clone(),
            campaign_save_id: start.campaign_save_id.clone(),
        }
    }
}

/// Result of a successful local round construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BuiltRound {
    /// Independently computed level-generation equality value. Must match
    /// the value in the server's finalize message.
    pub level_equality: u32,
}

/// Why local round construction did not produce a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundBuildError {
    /// A referenced asset is not present locally. Not fatal: the asset is
    /// requested from the file transfer subsystem and construction is
    /// retried when the server retransmits the round start.
    MissingAsset {
        /// What kind of asset is missing.
        kind: FileKind,
        /// Asset name.
        name: String,
        /// Expected content hash.
        hash: String,
    },
    /// Construction failed unrecoverably.
    Failed {
        /// Human-readable failure description.
        context: String,
    },
}

impl std::fmt::Display for RoundBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundBuildError::MissingAsset { kind, name, hash } => {
                write!(f, "missing {kind} \"{name}\" (hash {hash})")
            }
            RoundBuildError::Failed { context } => {
                write!(f, "round construction failed: {context}")
            }
        }
    }
}

impl std::error::Error for RoundBuildError {}

/// Materializes rounds from server-provided settings.
///
/// Implemented by the embedding game. All calls happen on the tick thread
/// and must not block; a long-running construction should return
/// [`RoundBuildError::MissingAsset`]-style partial results or complete
/// synchronously.
pub trait RoundBuilder {
    /// Builds the round world. On success returns the independently computed
    /// level equality value.
    fn build(&mut self, settings: &RoundSettings) -> Result<BuiltRound, RoundBuildError>;

    /// Preloads the content identifiers named by the finalize message. By
    /// the time this returns the round is considered live.
    fn preload(&mut self, content: &[String]);

    /// Tears the current round world down, whether it finished loading or
    /// not. Must be idempotent.
    fn teardown(&mut self);
}

/// Requests missing assets from the file transfer subsystem.
///
/// Only the request handshake lives here; transfer mechanics and completion
/// notification are owned by the subsystem itself (a completed transfer
/// shows up as the server retransmitting the round start).
pub trait FileRequester {
    /// Requests a file by kind, name and expected content hash.
    fn request_file(&mut self, kind: FileKind, name: &str, hash: &str);
}

/// The round lifecycle state machine.
///
/// Advanced from two directions: message handlers (`on_round_start`,
/// `on_finalize`, `on_round_end`) and the once-per-tick [`poll`], which owns
/// the finalize re-request interval and the absolute deadline.
///
/// [`poll`]: RoundLifecycle::poll
#[derive(Debug)]
pub struct RoundLifecycle {
    state: RoundLifecycleState,
    rerequest_interval: Duration,
    finalize_deadline: Duration,
    deadline: Option<Instant>,
    next_rerequest: Option<Instant>,
    level_equality: Option<u32>,
}

impl RoundLifecycle {
    /// Creates a lifecycle in `NotStarted` with the given finalize-wait
    /// timing policy.
    #[must_use]
    pub fn new(rerequest_interval: Duration, finalize_deadline: Duration) -> Self {
        Self {
            state: RoundLifecycleState::NotStarted,
            rerequest_interval,
            finalize_deadline,
            deadline: None,
            next_rerequest: None,
            level_equality: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RoundLifecycleState {
        self.state
    }

    /// Handles a round start message.
    ///
    /// Runs local construction through the builder. A missing asset is
    /// requested and the lifecycle stays in `Starting` until the server
    /// retransmits the round start; any other construction failure is
    /// terminal for the round. On success the finalize wait is armed, and an
    /// inlined finalize payload is consumed immediately.
    pub fn on_round_start(
        &mut self,
        start: &RoundStart,
        now: Instant,
        builder: &mut dyn RoundBuilder,
        files: &mut dyn FileRequester,
        events: &mut VecDeque<SessionEvent>,
    ) {
        match self.state {
            RoundLifecycleState::WaitingForFinalize | RoundLifecycleState::Started => {
                debug!("ignoring redundant round start in state {}", self.state);
                return;
            }
            // Retransmits while Starting retry construction (the missing
            // asset may have arrived in the meantime); aborted states get a
            // fresh attempt.
            _ => {}
        }
        self.set_state(RoundLifecycleState::Starting, events);

        let settings = RoundSettings::from(start);
        match builder.build(&settings) {
            Ok(built) => {
                self.level_equality = Some(built.level_equality);
                self.deadline = Some(now + self.finalize_deadline);
                self.next_rerequest = Some(now + self.rerequest_interval);
                self.set_state(RoundLifecycleState::WaitingForFinalize, events);
                if let Some(finalize) = &start.inlined_finalize {
                    self.on_finalize(finalize, builder, events);
                }
            }
            Err(RoundBuildError::MissingAsset { kind, name, hash }) => {
                debug!("round start references missing {kind} \"{name}\"");
                files.request_file(kind, &name, &hash);
                events.push_back(SessionEvent::FileRequested { kind, name, hash });
                // Stay in Starting; the server retransmits the round start
                // once the transfer completes.
            }
            Err(RoundBuildError::Failed { context }) => {
                warn!("round construction failed: {context}");
                builder.teardown();
                self.clear_wait();
                self.set_state(RoundLifecycleState::Error, events);
            }
        }
    }

    /// Handles a finalize message.
    ///
    /// A duplicate arriving after `Started` is ignored. An equality value
    /// that does not match the locally computed one is a non-recoverable
    /// desync for this round: the round is torn down and the lifecycle lands
    /// in `Error`.
    pub fn on_finalize(
        &mut self,
        finalize: &RoundFinalize,
        builder: &mut dyn RoundBuilder,
        events: &mut VecDeque<SessionEvent>,
    ) {
        match self.state {
            RoundLifecycleState::Started => {
                debug!("ignoring duplicate finalize after round start");
                return;
            }
            RoundLifecycleState::WaitingForFinalize => {}
            other => {
                warn!("ignoring finalize in state {other}");
                return;
            }
        }

        let expected = self.level_equality;
        if expected != Some(finalize.level_equality) {
            warn!(
                "level equality mismatch: computed {:?}, server sent {}",
                expected, finalize.level_equality
            );
            builder.teardown();
            self.clear_wait();
            self.set_state(RoundLifecycleState::Error, events);
            return;
        }

        builder.preload(&finalize.preload_content);
        self.clear_wait();
        self.set_state(RoundLifecycleState::Started, events);
    }

    /// Handles an end-of-round message.
    ///
    /// During loading this is an interruption; after `Started` it is the
    /// normal return to the lobby. In any other state it is a no-op.
    pub fn on_round_end(
        &mut self,
        builder: &mut dyn RoundBuilder,
        events: &mut VecDeque<SessionEvent>,
    ) {
        if self.state.is_loading() {
            builder.teardown();
            self.clear_wait();
            self.set_state(RoundLifecycleState::Interrupted, events);
            events.push_back(SessionEvent::RoundInterrupted);
        } else if self.state == RoundLifecycleState::Started {
            builder.teardown();
            self.set_state(RoundLifecycleState::NotStarted, events);
        }
    }

    /// Advances the finalize wait.
    ///
    /// Returns `Some(FinalizeRequest)` when a re-request is due. Reaching
    /// the absolute deadline (checked first, so `now == deadline` times out
    /// rather than re-requesting) tears the round down into `TimedOut`.
    #[must_use]
    pub fn poll(
        &mut self,
        now: Instant,
        builder: &mut dyn RoundBuilder,
        events: &mut VecDeque<SessionEvent>,
    ) -> Option<Message> {
        if self.state != RoundLifecycleState::WaitingForFinalize {
            return None;
        }
        if let Some(deadline) = self.deadline {
            if now >= deadline {
                warn!("finalize wait exceeded its deadline");
                builder.teardown();
                self.clear_wait();
                self.set_state(RoundLifecycleState::TimedOut, events);
                return None;
            }
        }
        if let Some(next) = self.next_rerequest {
            if now >= next {
                self.next_rerequest = Some(now + self.rerequest_interval);
                debug!("re-requesting finalize");
                return Some(Message::FinalizeRequest);
            }
        }
        None
    }

    /// Forces the lifecycle into `Error`, tearing the round down. Used when
    /// an entity-level desync is detected mid-round.
    pub fn force_error(
        &mut self,
        builder: &mut dyn RoundBuilder,
        events: &mut VecDeque<SessionEvent>,
    ) {
        if self.state == RoundLifecycleState::Error {
            return;
        }
        builder.teardown();
        self.clear_wait();
        self.set_state(RoundLifecycleState::Error, events);
    }

    /// Returns the lifecycle to `NotStarted` without emitting events. Used
    /// when the connection itself goes away.
    pub fn reset(&mut self) {
        self.state = RoundLifecycleState::NotStarted;
        self.clear_wait();
    }

    fn clear_wait(&mut self) {
        self.deadline = None;
        self.next_rerequest = None;
        self.level_equality = None;
    }

    fn set_state(&mut self, state: RoundLifecycleState, events: &mut VecDeque<SessionEvent>) {
        if self.state == state {
            return;
        }
        debug!("round lifecycle {} -> {}", self.state, state);
        self.state = state;
        events.push_back(SessionEvent::RoundStateChanged { state });
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const REREQUEST: Duration = Duration::from_secs(2);
    const DEADLINE: Duration = Duration::from_secs(30);

    #[derive(Default)]
    struct StubBuilder {
        equality: u32,
        missing: Option<(FileKind, String, String)>,
        fail: bool,
        preloaded: Vec<String>,
        teardowns: usize,
    }

    impl RoundBuilder for StubBuilder {
        fn build(&mut self, _settings: &RoundSettings) -> Result<BuiltRound, RoundBuildError> {
            if let Some((kind, name, hash)) = self.missing.clone() {
                return Err(RoundBuildError::MissingAsset { kind, name, hash });
            }
            if self.fail {
                return Err(RoundBuildError::Failed {
                    context: "out of bolts".to_owned(),
                });
            }
            Ok(BuiltRound {
                level_equality: self.equality,
            })
        }

        fn preload(&mut self, content: &[String]) {
            self.preloaded.extend_from_slice(content);
        }

        fn teardown(&mut self) {
            self.teardowns += 1;
        }
    }

    #[derive(Default)]
    struct StubFiles {
        requests: Vec<(FileKind, String, String)>,
    }

    impl FileRequester for StubFiles {
        fn request_file(&mut self, kind: FileKind, name: &str, hash: &str) {
            self.requests.push((kind, name.to_owned(), hash.to_owned()));
        }
    }

    fn round_start(inlined: Option<RoundFinalize>) -> RoundStart {
        RoundStart {
            random_seed: 1,
            level_seed: "seed".to_owned(),
            difficulty: 50.0,
            mode: ModeFlags::default(),
            submarine_name: "Typhon".to_owned(),
            submarine_hash: "a1b2c3".to_owned(),
            mission_id: None,
            campaign_save_id: None,
            inlined_finalize: inlined,
        }
    }

    fn finalize(equality: u32) -> RoundFinalize {
        RoundFinalize {
            preload_content: vec!["monster_pack".to_owned()],
            level_equality: equality,
        }
    }

    #[test]
    fn happy_path_reaches_started() {
        let mut lifecycle = RoundLifecycle::new(REREQUEST, DEADLINE);
        let mut builder = StubBuilder {
            equality: 7,
            ..StubBuilder::default()
        };
        let mut files = StubFiles::default();
        let mut events = VecDeque::new();
        let now = Instant::now();

        lifecycle.on_round_start(&round_start(None), now, &mut builder, &mut files, &mut events);
        assert_eq!(lifecycle.state(), RoundLifecycleState::WaitingForFinalize);

        lifecycle.on_finalize(&finalize(7), &mut builder, &mut events);
        assert_eq!(lifecycle.state(), RoundLifecycleState::Started);
        assert_eq!(builder.preloaded, vec!["monster_pack".to_owned()]);

        let states: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::RoundStateChanged { state } => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                RoundLifecycleState::Starting,
                RoundLifecycleState::WaitingForFinalize,
                RoundLifecycleState::Started,
            ]
        );
    }

    #[test]
    fn inlined_finalize_skips_the_wait() {
        let mut lifecycle = RoundLifecycle::new(REREQUEST, DEADLINE);
        let mut builder = StubBuilder {
            equality: 7,
            ..StubBuilder::default()
        };
        let mut files = StubFiles::default();
        let mut events = VecDeque::new();

        lifecycle.on_round_start(
            &round_start(Some(finalize(7))),
            Instant::now(),
            &mut builder,
            &mut files,
            &mut events,
        );
        assert_eq!(lifecycle.state(), RoundLifecycleState::Started);
    }

    #[test]
    fn equality_mismatch_is_terminal() {
        let mut lifecycle = RoundLifecycle::new(REREQUEST, DEADLINE);
        let mut builder = StubBuilder {
            equality: 7,
            ..StubBuilder::default()
        };
        let mut files = StubFiles::default();
        let mut events = VecDeque::new();

        lifecycle.on_round_start(&round_start(None), Instant::now(), &mut builder, &mut files, &mut events);
        lifecycle.on_finalize(&finalize(8), &mut builder, &mut events);
        assert_eq!(lifecycle.state(), RoundLifecycleState::Error);
        assert_eq!(builder.teardowns, 1);
        assert!(builder.preloaded.is_empty());
    }

    #[test]
    fn duplicate_finalize_after_started_is_ignored() {
        let mut lifecycle = RoundLifecycle::new(REREQUEST, DEADLINE);
        let mut builder = StubBuilder {
            equality: 7,
            ..StubBuilder::default()
        };
        let mut files = StubFiles::default();
        let mut events = VecDeque::new();

        lifecycle.on_round_start(&round_start(None), Instant::now(), &mut builder, &mut files, &mut events);
        lifecycle.on_finalize(&finalize(7), &mut builder, &mut events);
        events.clear();
        // A late duplicate with any equality value changes nothing.
        lifecycle.on_finalize(&finalize(999), &mut builder, &mut events);
        assert_eq!(lifecycle.state(), RoundLifecycleState::Started);
        assert!(events.is_empty());
    }

    #[test]
    fn missing_asset_is_requested_and_construction_retried() {
        let mut lifecycle = RoundLifecycle::new(REREQUEST, DEADLINE);
        let mut builder = StubBuilder {
            equality: 7,
            missing: Some((
                FileKind::Submarine,
                "Typhon".to_owned(),
                "a1b2c3".to_owned(),
            )),
            ..StubBuilder::default()
        };
        let mut files = StubFiles::default();
        let mut events = VecDeque::new();
        let now = Instant::now();

        lifecycle.on_round_start(&round_start(None), now, &mut builder, &mut files, &mut events);
        assert_eq!(lifecycle.state(), RoundLifecycleState::Starting);
        assert_eq!(files.requests.len(), 1);
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::FileRequested { .. })));

        // The transfer completes; the server retransmits the round start.
        builder.missing = None;
        lifecycle.on_round_start(&round_start(None), now, &mut builder, &mut files, &mut events);
        assert_eq!(lifecycle.state(), RoundLifecycleState::WaitingForFinalize);
    }

    #[test]
    fn construction_failure_is_terminal() {
        let mut lifecycle = RoundLifecycle::new(REREQUEST, DEADLINE);
        let mut builder = StubBuilder {
            fail: true,
            ..StubBuilder::default()
        };
        let mut files = StubFiles::default();
        let mut events = VecDeque::new();

        lifecycle.on_round_start(&round_start(None), Instant::now(), &mut builder, &mut files, &mut events);
        assert_eq!(lifecycle.state(), RoundLifecycleState::Error);
        assert_eq!(builder.teardowns, 1);
    }

    #[test]
    fn poll_rerequests_at_the_fixed_interval() {
        let mut lifecycle = RoundLifecycle::new(REREQUEST, DEADLINE);
        let mut builder = StubBuilder {
            equality: 7,
            ..StubBuilder::default()
        };
        let mut files = StubFiles::default();
        let mut events = VecDeque::new();
        let start = Instant::now();

        lifecycle.on_round_start(&round_start(None), start, &mut builder, &mut files, &mut events);

        assert!(lifecycle
            .poll(start + Duration::from_secs(1), &mut builder, &mut events)
            .is_none());
        let request = lifecycle.poll(start + REREQUEST, &mut builder, &mut events);
        assert_eq!(request, Some(Message::FinalizeRequest));
        // Interval re-arms from the send time.
        assert!(lifecycle
            .poll(start + REREQUEST + Duration::from_secs(1), &mut builder, &mut events)
            .is_none());
        let request = lifecycle.poll(start + 2 * REREQUEST, &mut builder, &mut events);
        assert_eq!(request, Some(Message::FinalizeRequest));
    }

    #[test]
    fn deadline_times_out_exactly_not_earlier() {
        let mut lifecycle = RoundLifecycle::new(REREQUEST, DEADLINE);
        let mut builder = StubBuilder {
            equality: 7,
            ..StubBuilder::default()
        };
        let mut files = StubFiles::default();
        let mut events = VecDeque::new();
        let start = Instant::now();

        lifecycle.on_round_start(&round_start(None), start, &mut builder, &mut files, &mut events);

        let just_before = start + DEADLINE - Duration::from_millis(1);
        let _ = lifecycle.poll(just_before, &mut builder, &mut events);
        assert_eq!(lifecycle.state(), RoundLifecycleState::WaitingForFinalize);

        let request = lifecycle.poll(start + DEADLINE, &mut builder, &mut events);
        assert!(request.is_none());
        assert_eq!(lifecycle.state(), RoundLifecycleState::TimedOut);
        assert_eq!(builder.teardowns, 1);
    }

    #[test]
    fn round_end_while_loading_interrupts() {
        let mut lifecycle = RoundLifecycle::new(REREQUEST, DEADLINE);
        let mut builder = StubBuilder {
            equality: 7,
            ..StubBuilder::default()
        };
        let mut files = StubFiles::default();
        let mut events = VecDeque::new();

        lifecycle.on_round_start(&round_start(None), Instant::now(), &mut builder, &mut files, &mut events);
        lifecycle.on_round_end(&mut builder, &mut events);
        assert_eq!(lifecycle.state(), RoundLifecycleState::Interrupted);
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::RoundInterrupted)));
    }

    #[test]
    fn round_end_after_started_returns_to_not_started() {
        let mut lifecycle = RoundLifecycle::new(REREQUEST, DEADLINE);
        let mut builder = StubBuilder {
            equality: 7,
            ..StubBuilder::default()
        };
        let mut files = StubFiles::default();
        let mut events = VecDeque::new();

        lifecycle.on_round_start(&round_start(None), Instant::now(), &mut builder, &mut files, &mut events);
        lifecycle.on_finalize(&finalize(7), &mut builder, &mut events);
        lifecycle.on_round_end(&mut builder, &mut events);
        assert_eq!(lifecycle.state(), RoundLifecycleState::NotStarted);
        assert_eq!(builder.teardowns, 1);
    }

    #[test]
    fn force_error_tears_down_once() {
        let mut lifecycle = RoundLifecycle::new(REREQUEST, DEADLINE);
        let mut builder = StubBuilder {
            equality: 7,
            ..StubBuilder::default()
        };
        let mut files = StubFiles::default();
        let mut events = VecDeque::new();

        lifecycle.on_round_start(&round_start(None), Instant::now(), &mut builder, &mut files, &mut events);
        lifecycle.on_finalize(&finalize(7), &mut builder, &mut events);
        lifecycle.force_error(&mut builder, &mut events);
        lifecycle.force_error(&mut builder, &mut events);
        assert_eq!(lifecycle.state(), RoundLifecycleState::Error);
        assert_eq!(builder.teardowns, 1);
    }
}
