//! Dirty-state tracking against the last persisted snapshot.

use crate::dataflow::{Atom, lock};
use crate::error::SyncResult;
use serde::Serialize;
use shared::SaveRecord;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Canonical JSON form of a value, used only for equality.
///
/// Object keys serialize in sorted order, so equal configurations produce
/// equal snapshots regardless of how they were built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot(String);

impl Snapshot {
    pub fn of<T: Serialize>(value: &T) -> SyncResult<Self> {
        Ok(Self(serde_json::to_string(value)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    baseline: Option<SaveRecord>,
    // None when the latest value could not be serialized
    current: Option<Snapshot>,
}

impl TrackerState {
    fn is_dirty(&self) -> bool {
        match (&self.baseline, &self.current) {
            (Some(baseline), Some(current)) => baseline.snapshot != current.as_str(),
            _ => true,
        }
    }
}

/// Tracks `dirty == (current snapshot != last saved snapshot)`.
#[derive(Clone, Debug)]
pub struct DirtyTracker {
    state: Arc<Mutex<TrackerState>>,
    dirty: Atom<bool>,
}

impl Default for DirtyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DirtyTracker {
    /// No baseline yet, so everything is dirty.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::default())),
            dirty: Atom::new(true),
        }
    }

    /// Record the latest configuration. Serialization failure counts as dirty.
    pub fn observe<T: Serialize>(&self, value: &T) -> bool {
        let snapshot = match Snapshot::of(value) {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                log::warn!("DIRTY: Snapshot failed, assuming unsaved changes: {}", error);
                None
            }
        };
        let dirty = {
            let mut state = lock(&self.state);
            state.current = snapshot;
            state.is_dirty()
        };
        self.dirty.set_neq(dirty);
        dirty
    }

    /// Replace the baseline with `record`, e.g. after a successful save or a
    /// fresh load, and recompute against the current snapshot.
    pub fn rebase(&self, record: SaveRecord) -> bool {
        let dirty = {
            let mut state = lock(&self.state);
            state.baseline = Some(record);
            state.is_dirty()
        };
        self.dirty.set_neq(dirty);
        dirty
    }

    /// Set baseline and current to the same value.
    pub fn reset_to<T: Serialize>(&self, item_id: &str, value: &T) -> SyncResult<()> {
        let snapshot = Snapshot::of(value)?;
        let record = SaveRecord::new(item_id, snapshot.as_str());
        {
            let mut state = lock(&self.state);
            state.current = Some(snapshot);
            state.baseline = Some(record);
        }
        self.dirty.set_neq(false);
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get_cloned()
    }

    pub fn record(&self) -> Option<SaveRecord> {
        lock(&self.state).baseline.clone()
    }

    pub fn signal(&self) -> watch::Receiver<bool> {
        self.dirty.signal()
    }
}
