//! Delayed authoritative corrections for optimistically predicted state.
//!
//! When the user toggles a device mode locally, the client applies the new
//! value immediately and the server echoes an authoritative update a moment
//! later. Applying that echo the instant it arrives makes the value visibly
//! snap back and forth. Instead, a per-object correction timer lets the
//! local prediction win for a short, fixed window; the most recent
//! authoritative message received inside the window is applied when the
//! window closes, so the server always wins eventually.
//!
//! This is deliberately not an interpolation system: it only suppresses
//! flicker for discrete mode-like state. Continuous physical position uses
//! the separate position channel and its own smoothing.

use std::collections::BTreeMap;

use web_time::Duration;

use crate::EntityId;

/// Default length of the correction window.
pub const DEFAULT_CORRECTION_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct CorrectionEntry {
    remaining: Duration,
    pending: Option<Vec<u8>>,
}

/// Per-object buffer that delays authoritative corrections for a bounded
/// window after a local optimistic write.
#[derive(Debug, Clone)]
pub struct DelayedCorrectionBuffer {
    delay: Duration,
    entries: BTreeMap<EntityId, CorrectionEntry>,
}

impl DelayedCorrectionBuffer {
    /// Creates a buffer with the given correction delay.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            entries: BTreeMap::new(),
        }
    }

    /// Records a local optimistic write: starts (or restarts) the object's
    /// correction timer. Any authoritative message already held stays held
    /// until the restarted window closes.
    pub fn predict(&mut self, object: EntityId) {
        let delay = self.delay;
        self.entries
            .entry(object)
            .and_modify(|entry| entry.remaining = delay)
            .or_insert(CorrectionEntry {
                remaining: delay,
                pending: None,
            });
    }

    /// Offers an authoritative message for the object.
    ///
    /// Returns `Some(payload)` when the message should be applied right now:
    /// either no correction window is running, or the message is flagged
    /// non-deferrable (which also cancels the window - the server has
    /// overruled the prediction outright). Returns `None` when the message
    /// was captured to be applied when the window closes; a later message
    /// inside the same window replaces the held one.
    #[must_use]
    pub fn intercept(
        &mut self,
        object: EntityId,
        payload: Vec<u8>,
        deferrable: bool,
    ) -> Option<Vec<u8>> {
        if !deferrable {
            self.entries.remove(&object);
            return Some(payload);
        }
        match self.entries.get_mut(&object) {
            Some(entry) => {
                entry.pending = Some(payload);
                None
            }
            None => Some(payload),
        }
    }

    /// Advances all timers by `dt` and returns the held authoritative
    /// payloads whose windows elapsed, ready to be applied. Objects whose
    /// windows elapsed with nothing held simply keep their optimistic value.
    #[must_use]
    pub fn advance(&mut self, dt: Duration) -> Vec<(EntityId, Vec<u8>)> {
        let mut elapsed = Vec::new();
        self.entries.retain(|object, entry| {
            entry.remaining = entry.remaining.saturating_sub(dt);
            if !entry.remaining.is_zero() {
                return true;
            }
            if let Some(payload) = entry.pending.take() {
                elapsed.push((*object, payload));
            }
            false
        });
        elapsed
    }

    /// Drops the object's correction state, e.g. when it is removed.
    pub fn remove(&mut self, object: EntityId) {
        self.entries.remove(&object);
    }

    /// Whether a correction window is currently running for the object.
    #[must_use]
    pub fn is_pending(&self, object: EntityId) -> bool {
        self.entries.contains_key(&object)
    }

    /// Number of objects with running windows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no windows are running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all correction state. Called between rounds.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(100);

    fn object(id: u32) -> EntityId {
        EntityId::new(id)
    }

    #[test]
    fn without_prediction_messages_apply_immediately() {
        let mut buffer = DelayedCorrectionBuffer::new(DELAY);
        let out = buffer.intercept(object(1), vec![7], true);
        assert_eq!(out, Some(vec![7]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn prediction_holds_authoritative_message_until_window_closes() {
        let mut buffer = DelayedCorrectionBuffer::new(DELAY);
        buffer.predict(object(1));
        assert!(buffer.intercept(object(1), vec![7], true).is_none());
        // Window still open: nothing released.
        assert!(buffer.advance(Duration::from_millis(50)).is_empty());
        // Window closes: the held message comes out.
        let out = buffer.advance(Duration::from_millis(50));
        assert_eq!(out, vec![(object(1), vec![7])]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn latest_message_in_window_wins() {
        let mut buffer = DelayedCorrectionBuffer::new(DELAY);
        buffer.predict(object(1));
        assert!(buffer.intercept(object(1), vec![1], true).is_none());
        assert!(buffer.intercept(object(1), vec![2], true).is_none());
        let out = buffer.advance(DELAY);
        assert_eq!(out, vec![(object(1), vec![2])]);
    }

    #[test]
    fn optimistic_value_stands_when_nothing_arrived() {
        let mut buffer = DelayedCorrectionBuffer::new(DELAY);
        buffer.predict(object(1));
        let out = buffer.advance(DELAY);
        assert!(out.is_empty());
        assert!(!buffer.is_pending(object(1)));
    }

    #[test]
    fn non_deferrable_message_bypasses_and_cancels_the_window() {
        let mut buffer = DelayedCorrectionBuffer::new(DELAY);
        buffer.predict(object(1));
        assert!(buffer.intercept(object(1), vec![1], true).is_none());
        let out = buffer.intercept(object(1), vec![9], false);
        assert_eq!(out, Some(vec![9]));
        // Window cancelled: the previously held message is gone too.
        assert!(buffer.advance(DELAY).is_empty());
    }

    #[test]
    fn repredicting_restarts_the_window() {
        let mut buffer = DelayedCorrectionBuffer::new(DELAY);
        buffer.predict(object(1));
        assert!(buffer.intercept(object(1), vec![4], true).is_none());
        let _ = buffer.advance(Duration::from_millis(80));
        // Restart just before expiry; the held message must wait the full
        // window again.
        buffer.predict(object(1));
        assert!(buffer.advance(Duration::from_millis(80)).is_empty());
        let out = buffer.advance(Duration::from_millis(20));
        assert_eq!(out, vec![(object(1), vec![4])]);
    }

    #[test]
    fn objects_are_independent() {
        let mut buffer = DelayedCorrectionBuffer::new(DELAY);
        buffer.predict(object(1));
        buffer.predict(object(2));
        assert!(buffer.intercept(object(1), vec![1], true).is_none());
        assert!(buffer.intercept(object(2), vec![2], true).is_none());
        assert_eq!(buffer.len(), 2);
        let out = buffer.advance(DELAY);
        assert_eq!(out, vec![(object(1), vec![1]), (object(2), vec![2])]);
    }

    #[test]
    fn remove_drops_state() {
        let mut buffer = DelayedCorrectionBuffer::new(DELAY);
        buffer.predict(object(1));
        assert!(buffer.intercept(object(1), vec![1], true).is_none());
        buffer.remove(object(1));
        assert!(buffer.advance(DELAY).is_empty());
    }
}
