//! The authoritative list of remote participants.
//!
//! The server periodically sends a complete roster snapshot tagged with a
//! version id. A snapshot is accepted only if its version is newer than the
//! one currently held; accepted snapshots replace the roster wholesale, and
//! entries absent from the newest snapshot are removed. Events arriving for
//! rounds the roster has not yet learned about do not affect it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::{ParticipantId, SequenceId};

/// A set of server-granted permissions, stored as a bitmask.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct PermissionSet(u32);

impl PermissionSet {
    /// No permissions.
    pub const EMPTY: PermissionSet = PermissionSet(0);
    /// May start and end rounds.
    pub const MANAGE_ROUND: u32 = 1 << 0;
    /// May kick other participants.
    pub const KICK: u32 = 1 << 1;
    /// May ban other participants.
    pub const BAN: u32 = 1 << 2;
    /// May select the submarine for the next round.
    pub const SELECT_SUBMARINE: u32 = 1 << 3;
    /// May run console commands on the server.
    pub const CONSOLE_COMMANDS: u32 = 1 << 4;

    /// Builds a set from a raw bitmask.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        PermissionSet(bits)
    }

    /// The raw bitmask.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns a copy with the given permission bits added.
    #[inline]
    #[must_use]
    pub const fn with(self, bits: u32) -> Self {
        PermissionSet(self.0 | bits)
    }

    /// Whether all of the given permission bits are present.
    #[inline]
    #[must_use]
    pub const fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }
}

/// One participant as described by the latest accepted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Server-assigned participant id.
    pub id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Version counter for the display name; lets the server rename a
    /// participant without bumping the whole snapshot semantics.
    pub name_version: SequenceId,
    /// Server-granted permissions.
    pub permissions: PermissionSet,
    /// Whether the participant has spawned into the current round.
    pub in_game: bool,
}

/// The participants added, removed or re-permissioned by one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RosterDiff {
    /// Present now, absent before.
    pub joined: SmallVec<[ParticipantId; 8]>,
    /// Absent now, present before.
    pub left: SmallVec<[ParticipantId; 8]>,
    /// Present in both with a different permission set.
    pub permission_changes: SmallVec<[ParticipantId; 8]>,
}

/// Result of offering a snapshot to the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The snapshot was newer and replaced the roster.
    Applied(RosterDiff),
    /// The snapshot was stale and discarded entirely.
    Stale,
}

/// Versioned, snapshot-replaced participant roster.
#[derive(Debug, Clone, Default)]
pub struct SessionRoster {
    version: Option<SequenceId>,
    entries: BTreeMap<ParticipantId, RosterEntry>,
}

impl SessionRoster {
    /// Creates an empty roster that will accept any first snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Version of the last accepted snapshot.
    #[must_use]
    pub fn version(&self) -> Option<SequenceId> {
        self.version
    }

    /// Offers a snapshot. Stale snapshots (version not newer than the held
    /// one) are discarded whole and leave the roster untouched.
    pub fn apply_snapshot(
        &mut self,
        version: SequenceId,
        entries: Vec<RosterEntry>,
    ) -> SnapshotOutcome {
        if let Some(current) = self.version {
            if !version.is_newer_than(current) {
                debug!(
                    "discarding stale roster snapshot {} (holding {})",
                    version, current
                );
                return SnapshotOutcome::Stale;
            }
        }

        let mut next: BTreeMap<ParticipantId, RosterEntry> = BTreeMap::new();
        for entry in entries {
            next.insert(entry.id, entry);
        }

        let mut diff = RosterDiff::default();
        for id in next.keys() {
            if !self.entries.contains_key(id) {
                diff.joined.push(*id);
            }
        }
        for (id, old) in &self.entries {
            match next.get(id) {
                None => diff.left.push(*id),
                Some(new) if new.permissions != old.permissions => {
                    diff.permission_changes.push(*id);
                }
                Some(_) => {}
            }
        }

        self.entries = next;
        self.version = Some(version);
        SnapshotOutcome::Applied(diff)
    }

    /// Looks up a participant.
    #[must_use]
    pub fn get(&self, id: ParticipantId) -> Option<&RosterEntry> {
        self.entries.get(&id)
    }

    /// All participants in id order.
    pub fn iter(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.values()
    }

    /// Number of participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the roster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
