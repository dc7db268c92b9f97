//! Suppression window
//!
//! Blocks autosave while a load or reset is fetching, and for a fixed delay
//! after it finished, so the freshly loaded configuration is not immediately
//! written back by an autosave that raced the fetch.

use crate::dataflow::{Atom, TaskGuard, lock};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct SuppressionWindow {
    active: Atom<bool>,
    // Fetches currently holding the window open
    holders: Arc<AtomicUsize>,
    // Bumped by every engage; a pending expiry only applies to its own epoch
    epoch: Arc<AtomicU64>,
    expiry: Arc<Mutex<Option<TaskGuard>>>,
    delay: Duration,
}

impl SuppressionWindow {
    pub fn new(delay: Duration) -> Self {
        Self {
            active: Atom::new(false),
            holders: Arc::new(AtomicUsize::new(0)),
            epoch: Arc::new(AtomicU64::new(0)),
            expiry: Arc::new(Mutex::new(None)),
            delay,
        }
    }

    /// Raise the flag now and cancel any pending expiry. The window stays
    /// engaged until the returned hold is dropped.
    pub fn engage(&self) -> SuppressionHold {
        self.holders.fetch_add(1, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        lock(&self.expiry).take();
        if self.active.set_neq(true) {
            log::debug!("SUPPRESSION: Autosave suppressed");
        }
        SuppressionHold {
            window: self.clone(),
        }
    }

    // Schedule the flag to drop after the delay once every hold is gone
    fn release(&self) {
        let remaining = self
            .holders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |holders| {
                Some(holders.saturating_sub(1))
            })
            .map(|previous| previous.saturating_sub(1))
            .unwrap_or(0);
        if remaining > 0 {
            return;
        }

        // A hold dropped off the runtime has no timer to wait on
        if tokio::runtime::Handle::try_current().is_err() {
            self.active.set_neq(false);
            return;
        }

        let scheduled_epoch = self.epoch.load(Ordering::SeqCst);
        let epoch = self.epoch.clone();
        let active = self.active.clone();
        let timer = TaskGuard::after(self.delay, move || {
            if epoch.load(Ordering::SeqCst) == scheduled_epoch && active.set_neq(false) {
                log::debug!("SUPPRESSION: Autosave allowed again");
            }
        });
        *lock(&self.expiry) = Some(timer);
    }

    /// Run `fetch` with the window engaged, then start the expiry delay.
    /// Dropping the returned future mid-fetch releases the window too.
    pub async fn during<F: Future>(&self, fetch: F) -> F::Output {
        let _hold = self.engage();
        fetch.await
    }

    pub fn is_active(&self) -> bool {
        self.active.get_cloned()
    }

    pub fn signal(&self) -> watch::Receiver<bool> {
        self.active.signal()
    }
}

/// One engaged fetch. Dropping it releases the window.
#[must_use = "the window is released as soon as the hold is dropped"]
#[derive(Debug)]
pub struct SuppressionHold {
    window: SuppressionWindow,
}

impl Drop for SuppressionHold {
    fn drop(&mut self) {
        self.window.release();
    }
}
