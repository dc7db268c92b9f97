//! Computation scheduler
//!
//! Turns settled configurations into remote computations. Only the most
//! recently triggered generation may publish a result; earlier ones keep
//! running on the network but their outcome is dropped on arrival.
//!
//! ```text
//! Idle -> Triggered -> InFlight -> Settling -> Idle
//!                         |
//!                         +-> (failure) -> Idle
//! ```

use crate::dataflow::{Atom, TaskGuard, lock};
use crate::error::{ErrorOrigin, ErrorSlot, SyncError, SyncResult};
use crate::operation::{OperationHandle, OperationSlot};
use crate::progress::{ProgressReporter, ProgressSource, SimulatedProgress};
use crate::services::ComputeService;
use crate::settings::SyncSettings;
use shared::{ComputeResult, Configuration};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Triggered,
    InFlight,
    Settling,
}

#[derive(Clone)]
pub struct ComputationScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    compute: Arc<dyn ComputeService>,
    slot: OperationSlot,
    live: Mutex<Option<Arc<OperationHandle>>>,
    progress: ProgressReporter,
    source: Arc<dyn ProgressSource>,
    state: Atom<SchedulerState>,
    result: Atom<Option<ComputeResult>>,
    errors: ErrorSlot,
    initializing: Atom<bool>,
    settle: Duration,
}

impl ComputationScheduler {
    pub fn new(
        compute: Arc<dyn ComputeService>,
        source: Arc<dyn ProgressSource>,
        settle: Duration,
        errors: ErrorSlot,
        initializing: Atom<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                compute,
                slot: OperationSlot::new("compute"),
                live: Mutex::new(None),
                progress: ProgressReporter::new(),
                source,
                state: Atom::new(SchedulerState::Idle),
                result: Atom::new(None),
                errors,
                initializing,
                settle,
            }),
        }
    }

    /// Scheduler with the simulated ticker configured by `settings`.
    pub fn from_settings(
        compute: Arc<dyn ComputeService>,
        settings: &SyncSettings,
        errors: ErrorSlot,
        initializing: Atom<bool>,
    ) -> Self {
        let source = SimulatedProgress::new(
            settings.progress_step,
            settings.progress_tick(),
            settings.progress_cap,
        );
        Self::new(compute, Arc::new(source), settings.settle(), errors, initializing)
    }

    /// Start a computation for `config` in the background, superseding any
    /// computation still in flight or settling.
    pub fn trigger(&self, config: Configuration) {
        let handle = self.begin();
        log::debug!("SCHEDULER: Triggered computation {}", handle.generation());
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _ = inner.run(handle, config).await;
        });
    }

    /// Same transitions as [`trigger`](Self::trigger), awaited inline.
    ///
    /// Returns `Cancelled` when a newer computation superseded this one.
    pub async fn run_now(&self, config: Configuration) -> SyncResult<ComputeResult> {
        let handle = self.begin();
        log::debug!("SCHEDULER: Running computation {} inline", handle.generation());
        self.inner.clone().run(handle, config).await
    }

    /// Drop the live computation: its result will be discarded and progress
    /// goes back to 0.
    pub fn cancel(&self) {
        let previous = lock(&self.inner.live).take();
        if let Some(previous) = previous {
            previous.cancel();
            log::debug!("SCHEDULER: Cancelled computation {}", previous.generation());
        }
        self.inner.progress.clear();
        self.inner.state.set_neq(SchedulerState::Idle);
    }

    fn begin(&self) -> Arc<OperationHandle> {
        let handle = Arc::new(self.inner.slot.begin());
        let previous = lock(&self.inner.live).replace(handle.clone());
        if let Some(previous) = previous {
            // Stops the old ticker and settle timer
            previous.cancel();
        }
        self.inner.progress.bind(handle.generation());
        self.inner.state.set(SchedulerState::Triggered);
        handle
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.state.get_cloned()
    }

    pub fn state_signal(&self) -> watch::Receiver<SchedulerState> {
        self.inner.state.signal()
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.inner.progress
    }

    pub fn result(&self) -> Option<ComputeResult> {
        self.inner.result.get_cloned()
    }

    pub fn result_signal(&self) -> watch::Receiver<Option<ComputeResult>> {
        self.inner.result.signal()
    }
}

impl SchedulerInner {
    async fn run(self: Arc<Self>, handle: Arc<OperationHandle>, config: Configuration) -> SyncResult<ComputeResult> {
        let generation = handle.generation();
        self.state.set_neq(SchedulerState::InFlight);
        if let Some(ticker) = self.source.drive(&self.progress, generation) {
            handle.own(ticker);
        }

        let outcome = self.compute.compute(&config).await;
        handle.stop_timers();

        if handle.is_stale() {
            match &outcome {
                Ok(_) => log::debug!("SCHEDULER: Dropping stale result of {}", generation),
                Err(error) => log::debug!("SCHEDULER: Dropping stale failure of {}: {}", generation, error),
            }
            return Err(SyncError::Cancelled);
        }

        self.initializing.set_neq(false);

        match outcome {
            Ok(result) => {
                self.progress.complete(generation);
                self.result.set(Some(result.clone()));
                self.errors.clear_from(ErrorOrigin::Compute);
                self.state.set_neq(SchedulerState::Settling);
                log::debug!("SCHEDULER: Computation {} applied", generation);

                let token = handle.token();
                let progress = self.progress.clone();
                let state = self.state.clone();
                handle.own(TaskGuard::after(self.settle, move || {
                    if token.is_current() {
                        progress.reset(generation);
                        state.set_neq(SchedulerState::Idle);
                    }
                }));
                Ok(result)
            }
            Err(error) => {
                self.progress.reset(generation);
                self.errors.surface(ErrorOrigin::Compute, error.clone());
                self.state.set_neq(SchedulerState::Idle);
                Err(error)
            }
        }
    }
}
