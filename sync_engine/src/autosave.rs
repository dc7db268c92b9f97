//! Autosave coordinator
//!
//! Persists the configuration of the bound item once edits have settled. A
//! save goes out only when the item is bound, the suppression window is clear
//! and the configuration differs from the last saved snapshot. Each settled
//! value restarts a short coalescing delay, so a series of quick edit cycles
//! ends in a single save.

use crate::cache::{LAST_SAVED_AT, LocalCache};
use crate::dataflow::{Atom, TaskGuard, lock};
use crate::dirty::{DirtyTracker, Snapshot};
use crate::error::{ErrorOrigin, ErrorSlot, SyncResult};
use crate::operation::{OperationHandle, OperationSlot, OperationToken};
use crate::services::ScenarioStore;
use crate::suppression::SuppressionWindow;
use shared::{Configuration, ItemId, SaveRecord};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone)]
pub struct AutosaveCoordinator {
    inner: Arc<AutosaveInner>,
}

struct AutosaveInner {
    store: Arc<dyn ScenarioStore>,
    cache: Arc<dyn LocalCache>,
    tracker: DirtyTracker,
    suppression: SuppressionWindow,
    target: Mutex<Option<ItemId>>,
    slot: OperationSlot,
    pending: Mutex<Option<Arc<OperationHandle>>>,
    delay: Duration,
    errors: ErrorSlot,
    // Saves on the wire, superseded ones included
    in_flight: AtomicUsize,
    saving: Atom<bool>,
}

impl AutosaveCoordinator {
    pub fn new(
        store: Arc<dyn ScenarioStore>,
        cache: Arc<dyn LocalCache>,
        tracker: DirtyTracker,
        suppression: SuppressionWindow,
        delay: Duration,
        errors: ErrorSlot,
    ) -> Self {
        Self {
            inner: Arc::new(AutosaveInner {
                store,
                cache,
                tracker,
                suppression,
                target: Mutex::new(None),
                slot: OperationSlot::new("autosave"),
                pending: Mutex::new(None),
                delay,
                errors,
                in_flight: AtomicUsize::new(0),
                saving: Atom::new(false),
            }),
        }
    }

    /// Bind autosave to `item_id`. Any save pending for the previous target
    /// is dropped.
    pub fn bind(&self, item_id: Option<ItemId>) {
        let previous = std::mem::replace(&mut *lock(&self.inner.target), item_id.clone());
        if previous != item_id {
            self.drop_pending();
            log::debug!("AUTOSAVE: Bound to {:?}", item_id);
        }
    }

    pub fn target(&self) -> Option<ItemId> {
        lock(&self.inner.target).clone()
    }

    /// React to a settled configuration. Schedules a save after the
    /// coalescing delay if every gate is open.
    pub fn on_settled(&self, config: Configuration) {
        let Some(item_id) = self.inner.gate() else {
            return;
        };

        let handle = self.begin();
        let token = handle.token();
        let inner = Arc::downgrade(&self.inner);
        let delay = self.inner.delay;

        handle.own(TaskGuard::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = Weak::upgrade(&inner) else {
                return;
            };
            // The save itself must outlive a newer pending delay
            tokio::spawn(async move {
                let _ = inner.save(token, item_id, config).await;
            });
        }));
    }

    /// Save `config` now, skipping the coalescing delay. Still honors binding,
    /// suppression and dirtiness. Returns whether a save was written.
    pub async fn flush(&self, config: Configuration) -> SyncResult<bool> {
        let Some(item_id) = self.inner.gate() else {
            return Ok(false);
        };
        let handle = self.begin();
        self.inner.clone().save(handle.token(), item_id, config).await
    }

    /// Forget any pending save.
    pub fn cancel(&self) {
        self.drop_pending();
    }

    fn begin(&self) -> Arc<OperationHandle> {
        let handle = Arc::new(self.inner.slot.begin());
        let previous = lock(&self.inner.pending).replace(handle.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        handle
    }

    fn drop_pending(&self) {
        self.inner.slot.invalidate();
        let previous = lock(&self.inner.pending).take();
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    pub fn is_saving(&self) -> bool {
        self.inner.saving.get_cloned()
    }

    pub fn saving_signal(&self) -> watch::Receiver<bool> {
        self.inner.saving.signal()
    }
}

impl AutosaveInner {
    fn gate(&self) -> Option<ItemId> {
        let Some(item_id) = lock(&self.target).clone() else {
            log::debug!("AUTOSAVE: No item bound, skipping");
            return None;
        };
        if self.suppression.is_active() {
            log::debug!("AUTOSAVE: Suppressed after load, skipping");
            return None;
        }
        if !self.tracker.is_dirty() {
            return None;
        }
        Some(item_id)
    }

    async fn save(self: Arc<Self>, token: OperationToken, item_id: ItemId, config: Configuration) -> SyncResult<bool> {
        if self.suppression.is_active() {
            log::debug!("AUTOSAVE: Suppression engaged during delay, dropping save");
            return Ok(false);
        }
        if token.is_stale() {
            return Ok(false);
        }

        let snapshot = match Snapshot::of(&config) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.errors.surface(ErrorOrigin::Save, error.clone());
                return Err(error);
            }
        };

        log::debug!("AUTOSAVE: Saving {}", item_id);
        let outcome = {
            let _in_flight = InFlightSave::enter(&self);
            self.store.save_item(&item_id, &config).await
        };

        if token.is_stale() {
            log::debug!("AUTOSAVE: Save of {} superseded, ignoring outcome", item_id);
            return Ok(false);
        }

        match outcome {
            Ok(()) => {
                let record = SaveRecord::new(item_id, snapshot.into_string());
                if let Err(error) = self.cache.write(LAST_SAVED_AT, &record.timestamp_rfc3339()) {
                    self.errors.surface(ErrorOrigin::Cache, error);
                }
                log::info!("AUTOSAVE: Saved {} at {}", record.item_id, record.timestamp_rfc3339());
                self.tracker.rebase(record);
                self.errors.clear_from(ErrorOrigin::Save);
                Ok(true)
            }
            Err(error) => {
                self.errors.surface(ErrorOrigin::Save, error.clone());
                Err(error)
            }
        }
    }
}

/// Keeps `saving` raised while at least one save is on the wire.
struct InFlightSave<'a> {
    inner: &'a AutosaveInner,
}

impl<'a> InFlightSave<'a> {
    fn enter(inner: &'a AutosaveInner) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        inner.saving.set_neq(true);
        Self { inner }
    }
}

impl Drop for InFlightSave<'_> {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.saving.set_neq(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::testing::FakeStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<FakeStore>,
        cache: Arc<MemoryCache>,
        tracker: DirtyTracker,
        suppression: SuppressionWindow,
        errors: ErrorSlot,
        autosave: AutosaveCoordinator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(FakeStore::with_items(&[("ula", json!({"elements": 8}))]));
        let cache = Arc::new(MemoryCache::new());
        let tracker = DirtyTracker::new();
        let suppression = SuppressionWindow::new(Duration::from_millis(1000));
        let errors = ErrorSlot::new();
        let autosave = AutosaveCoordinator::new(
            store.clone(),
            cache.clone(),
            tracker.clone(),
            suppression.clone(),
            Duration::from_millis(500),
            errors.clone(),
        );
        tracker.reset_to("ula", &json!({"elements": 8})).unwrap();
        autosave.bind(Some("ula".into()));
        Fixture {
            store,
            cache,
            tracker,
            suppression,
            errors,
            autosave,
        }
    }

    fn edit(fixture: &Fixture, elements: u32) -> Configuration {
        let config = Configuration::new(json!({ "elements": elements }));
        fixture.tracker.observe(&config);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_keeps_dirty_until_next_success() {
        let f = fixture();
        f.store.fail_next_saves(1);

        let config = edit(&f, 16);
        f.autosave.on_settled(config.clone());
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(f.store.saves().len(), 1);
        assert!(f.tracker.is_dirty());
        assert_eq!(f.errors.current().map(|e| e.origin), Some(ErrorOrigin::Save));
        assert_eq!(f.cache.get(LAST_SAVED_AT), None);

        // Next edit cycle retries
        f.autosave.on_settled(config.clone());
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(f.store.saves().len(), 2);
        assert!(!f.tracker.is_dirty());
        assert_eq!(f.errors.current(), None);
        assert_eq!(f.store.stored("ula"), Some(config));
        assert!(f.cache.get(LAST_SAVED_AT).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_settled_value_restarts_delay() {
        let f = fixture();
        let start = tokio::time::Instant::now();

        f.autosave.on_settled(edit(&f, 9));
        tokio::time::sleep(Duration::from_millis(300)).await;
        let latest = edit(&f, 10);
        f.autosave.on_settled(latest.clone());
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(f.store.saves(), vec![("ula".to_string(), latest)]);
        assert_eq!(f.store.save_instants()[0] - start, Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppression_blocks_autosave() {
        let f = fixture();
        let _hold = f.suppression.engage();

        f.autosave.on_settled(edit(&f, 12));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(f.store.saves().is_empty());
        assert!(f.tracker.is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppression_engaged_during_delay_drops_save() {
        let f = fixture();

        f.autosave.on_settled(edit(&f, 12));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _hold = f.suppression.engage();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(f.store.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_or_unbound_configuration_is_not_saved() {
        let f = fixture();

        f.autosave.on_settled(edit(&f, 8));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(f.store.saves().is_empty());

        f.autosave.bind(None);
        f.autosave.on_settled(edit(&f, 20));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(f.store.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebinding_drops_pending_save() {
        let f = fixture();

        f.autosave.on_settled(edit(&f, 12));
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.autosave.bind(Some("other".into()));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(f.store.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_saves_immediately() {
        let f = fixture();
        let config = edit(&f, 32);
        let start = tokio::time::Instant::now();

        assert!(f.autosave.flush(config.clone()).await.unwrap());

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(f.store.stored("ula"), Some(config.clone()));
        assert!(!f.tracker.is_dirty());
        assert!(!f.autosave.flush(config).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_saving_stays_raised_while_newer_save_is_in_flight() {
        let f = fixture();
        f.store.set_save_delay(Duration::from_millis(1000));

        f.autosave.on_settled(edit(&f, 12));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(f.autosave.is_saving());

        // Second save leaves at 1100ms, the first one lands at 1500ms
        f.autosave.on_settled(edit(&f, 13));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(f.store.saves().len(), 2);
        assert!(f.autosave.is_saving());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!f.autosave.is_saving());
        assert!(!f.tracker.is_dirty());
    }
}
