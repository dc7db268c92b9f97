//! Generation tokens for cancellable operations
//!
//! Each operation class (computation, mixing job, autosave) owns one
//! [`OperationSlot`]. Starting work in the slot hands out a new generation
//! and makes every earlier generation stale. Stale work may still finish,
//! but its result must be discarded by checking [`OperationToken::is_stale`].

use crate::dataflow::{TaskGuard, lock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source of generations for one operation class.
#[derive(Debug, Clone)]
pub struct OperationSlot {
    class: &'static str,
    live: Arc<AtomicU64>,
}

impl OperationSlot {
    pub fn new(class: &'static str) -> Self {
        Self {
            class,
            live: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a new generation; all earlier ones become stale.
    pub fn begin(&self) -> OperationHandle {
        let generation = Generation(self.live.fetch_add(1, Ordering::SeqCst) + 1);
        log::debug!("OPERATION: {} generation {} started", self.class, generation);
        OperationHandle {
            token: OperationToken {
                generation,
                live: self.live.clone(),
            },
            class: self.class,
            timers: Mutex::new(Vec::new()),
        }
    }

    /// Make whatever generation is live stale without starting a new one.
    pub fn invalidate(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cheap, cloneable staleness check handed to the tasks doing the work.
#[derive(Debug, Clone)]
pub struct OperationToken {
    generation: Generation,
    live: Arc<AtomicU64>,
}

impl OperationToken {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        self.live.load(Ordering::SeqCst) != self.generation.0
    }

    pub fn is_current(&self) -> bool {
        !self.is_stale()
    }

    /// Mark this generation stale if it is still the live one.
    pub fn cancel(&self) -> bool {
        self.live
            .compare_exchange(
                self.generation.0,
                self.generation.0 + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

/// Live handle of one generation. Owns the timers started on its behalf;
/// they are aborted on [`cancel`](Self::cancel) and on drop.
#[derive(Debug)]
pub struct OperationHandle {
    token: OperationToken,
    class: &'static str,
    timers: Mutex<Vec<TaskGuard>>,
}

impl OperationHandle {
    pub fn token(&self) -> OperationToken {
        self.token.clone()
    }

    pub fn generation(&self) -> Generation {
        self.token.generation
    }

    pub fn is_stale(&self) -> bool {
        self.token.is_stale()
    }

    /// Attach a timer or task to this generation.
    pub fn own(&self, timer: TaskGuard) {
        if self.is_stale() {
            // A stale generation must not gain timers
            timer.abort();
            return;
        }
        lock(&self.timers).push(timer);
    }

    /// Abort every timer owned by this generation without making it stale.
    pub fn stop_timers(&self) {
        let timers = std::mem::take(&mut *lock(&self.timers));
        for timer in &timers {
            timer.abort();
        }
    }

    /// Make this generation stale and stop its timers.
    pub fn cancel(&self) {
        if self.token.cancel() {
            log::debug!("OPERATION: {} generation {} cancelled", self.class, self.generation());
        }
        self.stop_timers();
    }
}
