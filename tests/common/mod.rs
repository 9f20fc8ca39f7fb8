//! Shared stubs for the session integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tidelink::{
    BuiltRound, CloseReason, DeliveryMode, EntityApplyError, EntityId, EntityRegistry, FileKind,
    MessageKind, RoundBuildError, RoundBuilder, RoundSettings, TidelinkError, Transport,
};

/// Routes test logs through the test harness capture.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[derive(Default)]
struct TransportInner {
    open: bool,
    sent: Vec<(Vec<u8>, DeliveryMode)>,
    closes: Vec<CloseReason>,
}

/// Shared view onto everything a [`StubTransport`] did.
#[derive(Clone, Default)]
pub struct TransportLog(Arc<Mutex<TransportInner>>);

impl TransportLog {
    pub fn is_open(&self) -> bool {
        self.0.lock().open
    }

    pub fn closes(&self) -> Vec<CloseReason> {
        self.0.lock().closes.clone()
    }

    /// Message kinds of every frame sent so far, in order.
    pub fn sent_kinds(&self) -> Vec<MessageKind> {
        self.0
            .lock()
            .sent
            .iter()
            .filter_map(|(frame, _)| frame.first().copied())
            .filter_map(MessageKind::from_tag)
            .collect()
    }

    /// Raw frames of the given kind.
    pub fn sent_frames_of(&self, kind: MessageKind) -> Vec<Vec<u8>> {
        self.0
            .lock()
            .sent
            .iter()
            .filter(|(frame, _)| frame.first() == Some(&kind.tag()))
            .map(|(frame, _)| frame.clone())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.0.lock().sent.clear();
    }
}

/// In-memory transport that records everything instead of touching a socket.
#[derive(Default)]
pub struct StubTransport {
    log: TransportLog,
}

impl StubTransport {
    pub fn new() -> (Self, TransportLog) {
        let transport = StubTransport::default();
        let log = transport.log.clone();
        (transport, log)
    }
}

impl Transport for StubTransport {
    fn open(&mut self) -> Result<(), TidelinkError> {
        self.log.0.lock().open = true;
        Ok(())
    }

    fn send(&mut self, frame: &[u8], mode: DeliveryMode) -> Result<(), TidelinkError> {
        let mut inner = self.log.0.lock();
        if !inner.open {
            return Err(TidelinkError::NotConnected);
        }
        inner.sent.push((frame.to_vec(), mode));
        Ok(())
    }

    fn close(&mut self, reason: CloseReason) {
        let mut inner = self.log.0.lock();
        inner.open = false;
        inner.closes.push(reason);
    }

    fn is_open(&self) -> bool {
        self.log.0.lock().open
    }
}

/// Registry stub: entity 0xDEAD never exists, payload [0xFF] is malformed,
/// everything else is recorded per entity in application order.
#[derive(Default)]
pub struct StubRegistry {
    pub applied: BTreeMap<EntityId, Vec<Vec<u8>>>,
    pub positions: BTreeMap<EntityId, Vec<Vec<u8>>>,
}

impl StubRegistry {
    fn check(payload: &[u8]) -> Result<(), EntityApplyError> {
        if payload == [0xFF] {
            return Err(EntityApplyError::Malformed {
                context: "bad payload".to_owned(),
            });
        }
        Ok(())
    }
}

impl EntityRegistry for StubRegistry {
    fn apply_event(&mut self, entity: EntityId, payload: &[u8]) -> Result<(), EntityApplyError> {
        if entity == EntityId::new(0xDEAD) {
            return Err(EntityApplyError::MissingEntity);
        }
        Self::check(payload)?;
        self.applied.entry(entity).or_default().push(payload.to_vec());
        Ok(())
    }

    fn apply_position(&mut self, entity: EntityId, payload: &[u8]) -> Result<(), EntityApplyError> {
        if entity == EntityId::new(0xDEAD) {
            return Err(EntityApplyError::MissingEntity);
        }
        Self::check(payload)?;
        self.positions
            .entry(entity)
            .or_default()
            .push(payload.to_vec());
        Ok(())
    }

    fn tracked_entities(&self) -> Vec<EntityId> {
        self.applied.keys().copied().collect()
    }
}

/// Builder stub with a configurable equality value and failure modes.
pub struct StubBuilder {
    pub equality: u32,
    pub missing: Option<(FileKind, String, String)>,
    pub fail: bool,
    pub preloaded: Vec<String>,
    pub teardowns: usize,
}

impl Default for StubBuilder {
    fn default() -> Self {
        Self {
            equality: 7,
            missing: None,
            fail: false,
            preloaded: Vec::new(),
            teardowns: 0,
        }
    }
}

impl RoundBuilder for StubBuilder {
    fn build(&mut self, _settings: &RoundSettings) -> Result<BuiltRound, RoundBuildError> {
        if let Some((kind, name, hash)) = self.missing.clone() {
            return Err(RoundBuildError::MissingAsset { kind, name, hash });
        }
        if self.fail {
            return Err(RoundBuildError::Failed {
                context: "construction failed".to_owned(),
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

/// File requester stub recording every request.
#[derive(Default)]
pub struct StubFiles {
    pub requests: Vec<(FileKind, String, String)>,
}

impl tidelink::FileRequester for StubFiles {
    fn request_file(&mut self, kind: FileKind, name: &str, hash: &str) {
        self.requests.push((kind, name.to_owned(), hash.to_owned()));
    }
}
