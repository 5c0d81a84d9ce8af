//! Pending-id tracker.
//!
//! Change events discover secondary work ("this node changed, so these ways
//! must be reprocessed"); the tracker records those ids until the second
//! pass drains them. Marking is idempotent and drains are destructive. The
//! tracker is not thread-safe; the controller serialises access to it.

use log::warn;
use std::collections::BTreeSet;

use crate::osm::{OsmId, ID_NONE};

/// A set of entity ids awaiting reprocessing.
#[derive(Debug, Default)]
pub struct IdTracker {
    ids: BTreeSet<OsmId>,
}

impl IdTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as pending. Marking an already-pending id is a no-op;
    /// [`ID_NONE`] is never a legitimate id and is skipped with a warning.
    pub fn mark(&mut self, id: OsmId) {
        if id == ID_NONE {
            warn!("Skipped pending mark for the reserved no-id sentinel");
            return;
        }
        self.ids.insert(id);
    }

    #[must_use]
    pub fn is_marked(&self, id: OsmId) -> bool {
        self.ids.contains(&id)
    }

    /// Remove and return a pending id, or [`ID_NONE`] once the tracker is
    /// empty. Each marked id is yielded at most once per drain cycle.
    pub fn pop_mark(&mut self) -> OsmId {
        self.ids.pop_first().unwrap_or(ID_NONE)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.ids.len()
    }
}
