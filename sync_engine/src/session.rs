//! Editing session
//!
//! [`SessionController`] owns one editable configuration and every component
//! that keeps it computed and persisted. Edits flow through a single
//! debounced pipeline:
//!
//! ```text
//! update / apply_patch ──> write-through cache + dirty check
//!          │
//!          └──> edit relay ──> debounce ──┬──> scheduler.trigger
//!                                         └──> autosave.on_settled
//! ```
//!
//! Everything is torn down with the controller; there is no global state.

use crate::autosave::AutosaveCoordinator;
use crate::bootstrap::{BootstrapContext, BootstrapOutcome, BootstrapSequencer, BootstrapTarget, Seed};
use crate::cache::{CURRENT_CONFIG, CURRENT_ITEM_ID, LocalCache};
use crate::dataflow::{Actor, Atom, Relay, TaskGuard, lock, relay};
use crate::debounce::debounce;
use crate::dirty::DirtyTracker;
use crate::error::{ErrorOrigin, ErrorSlot, SyncResult};
use crate::poller::{JobOutput, TaskPoller};
use crate::scheduler::{ComputationScheduler, SchedulerState};
use crate::services::{ComputeService, JobService, ScenarioStore, TerminationTransport};
use crate::settings::SyncSettings;
use crate::suppression::SuppressionWindow;
use crate::termination::{TerminationOutcome, TerminationPersister};
use serde_json::Value;
use shared::{CatalogEntry, ComputeResult, Configuration, ItemId, JobId, TaskStatus};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

/// Services a session runs against.
#[derive(Clone)]
pub struct SessionServices {
    pub scenarios: Arc<dyn ScenarioStore>,
    pub compute: Arc<dyn ComputeService>,
    pub jobs: Arc<dyn JobService>,
    pub cache: Arc<dyn LocalCache>,
    /// Tried in order at termination.
    pub transports: Vec<Arc<dyn TerminationTransport>>,
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    session_id: Uuid,
    settings: SyncSettings,
    scenarios: Arc<dyn ScenarioStore>,
    cache: Arc<dyn LocalCache>,

    configuration: Atom<Configuration>,
    item_id: Atom<Option<ItemId>>,
    catalog: Atom<Vec<CatalogEntry>>,
    initializing: Atom<bool>,
    errors: ErrorSlot,

    tracker: DirtyTracker,
    suppression: SuppressionWindow,
    scheduler: ComputationScheduler,
    poller: TaskPoller,
    autosave: AutosaveCoordinator,
    termination: TerminationPersister,
    bootstrap: BootstrapSequencer,

    config_edited_relay: Relay<Configuration>,
    // Counts settled values; owns the debounce pipeline
    pipeline: Actor<u64>,
    termination_watch: Mutex<Option<TaskGuard>>,
}

impl SessionController {
    /// Build a session. Must be called inside a tokio runtime.
    pub fn new(services: SessionServices, settings: SyncSettings) -> Self {
        let session_id = Uuid::new_v4();
        log::info!("SESSION: Starting session {}", session_id);

        let errors = ErrorSlot::new();
        let initializing = Atom::new(true);
        let tracker = DirtyTracker::new();
        let suppression = SuppressionWindow::new(settings.suppression());

        let scheduler = ComputationScheduler::from_settings(
            services.compute.clone(),
            &settings,
            errors.clone(),
            initializing.clone(),
        );
        let poller = TaskPoller::new(services.jobs.clone(), &settings, errors.clone());
        let autosave = AutosaveCoordinator::new(
            services.scenarios.clone(),
            services.cache.clone(),
            tracker.clone(),
            suppression.clone(),
            settings.autosave_delay(),
            errors.clone(),
        );
        let termination = TerminationPersister::new(services.transports.clone(), services.cache.clone());

        let (config_edited_relay, config_edited_stream) = relay::<Configuration>();
        let pipeline = {
            let scheduler = scheduler.clone();
            let autosave = autosave.clone();
            let mut settled = debounce(config_edited_stream, settings.debounce());
            Actor::new(0u64, move |ticks| async move {
                while let Some(config) = settled.next().await {
                    ticks.update_mut(|count| *count += 1);
                    scheduler.trigger(config.clone());
                    autosave.on_settled(config);
                }
            })
        };

        Self {
            inner: Arc::new(SessionInner {
                session_id,
                bootstrap: BootstrapSequencer::new(settings.bootstrap_timeout()),
                settings,
                scenarios: services.scenarios,
                cache: services.cache,
                configuration: Atom::new(Configuration::empty()),
                item_id: Atom::new(None),
                catalog: Atom::new(Vec::new()),
                initializing,
                errors,
                tracker,
                suppression,
                scheduler,
                poller,
                autosave,
                termination,
                config_edited_relay,
                pipeline,
                termination_watch: Mutex::new(None),
            }),
        }
    }

    /// Run the one-time startup sequence.
    pub async fn bootstrap(&self) -> SyncResult<BootstrapOutcome> {
        let inner = self.inner.as_ref();
        let context = BootstrapContext {
            store: inner.scenarios.as_ref(),
            cache: inner.cache.as_ref(),
            suppression: &inner.suppression,
            scheduler: &inner.scheduler,
            errors: &inner.errors,
            initializing: &inner.initializing,
        };
        inner.bootstrap.run(context, inner).await
    }

    // ===== EDITING =====

    /// Mutate the configuration in place.
    pub fn update(&self, edit: impl FnOnce(&mut Configuration)) {
        self.inner.configuration.update_mut(edit);
        let config = self.inner.configuration.get_cloned();
        self.inner.commit_edit(config);
    }

    /// Apply a JSON merge patch to the configuration.
    pub fn apply_patch(&self, patch: &Value) {
        self.update(|config| config.merge_patch(patch));
    }

    /// Load another item, replacing the configuration wholesale.
    pub async fn switch_item(&self, item_id: &str) -> SyncResult<()> {
        let inner = &self.inner;
        log::info!("SESSION: Switching to {}", item_id);
        let loaded = inner.suppression.during(inner.scenarios.fetch_item(item_id)).await;
        inner.install_loaded(item_id.to_string(), loaded)
    }

    /// Restore the bound item to its factory state.
    pub async fn reset_item(&self) -> SyncResult<()> {
        let inner = &self.inner;
        let Some(item_id) = inner.item_id.get_cloned() else {
            log::warn!("SESSION: No item loaded, nothing to reset");
            return Ok(());
        };
        log::info!("SESSION: Resetting {}", item_id);
        let loaded = inner.suppression.during(inner.scenarios.reset_item(&item_id)).await;
        inner.install_loaded(item_id, loaded)
    }

    /// Restore every item to its factory state and reload the bound one.
    pub async fn reset_all(&self) -> SyncResult<()> {
        let inner = &self.inner;
        log::info!("SESSION: Resetting all scenarios");
        let item_id = inner.item_id.get_cloned();
        let loaded = inner
            .suppression
            .during(async {
                if let Err(error) = inner.scenarios.reset_all().await {
                    return Err(error);
                }
                match &item_id {
                    Some(item_id) => inner.scenarios.fetch_item(item_id).await.map(Some),
                    None => Ok(None),
                }
            })
            .await;

        match (item_id, loaded) {
            (Some(item_id), Ok(Some(config))) => inner.install_loaded(item_id, Ok(config)),
            (_, Ok(_)) => Ok(()),
            (_, Err(error)) => {
                inner.errors.surface(ErrorOrigin::Load, error.clone());
                Err(error)
            }
        }
    }

    /// Save now instead of waiting for the autosave delay.
    pub async fn flush(&self) -> SyncResult<bool> {
        let config = self.inner.configuration.get_cloned();
        self.inner.autosave.flush(config).await
    }

    // ===== JOBS =====

    pub async fn start_job(&self, params: Value) -> SyncResult<JobId> {
        self.inner.poller.start(params).await
    }

    pub fn cancel_job(&self) {
        self.inner.poller.cancel();
    }

    // ===== TEARDOWN =====

    /// Shut the session down when `signal` resolves. Replaces any earlier
    /// registration.
    pub fn on_termination<F>(&self, signal: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let session = Arc::downgrade(&self.inner);
        let watch = TaskGuard::spawn(async move {
            signal.await;
            if let Some(inner) = session.upgrade() {
                log::info!("SESSION: Termination signal received");
                inner.shutdown();
            }
        });
        *lock(&self.inner.termination_watch) = Some(watch);
    }

    /// Run the termination persister and stop live work. Only the first call
    /// does anything.
    pub fn shutdown(&self) -> Option<TerminationOutcome> {
        self.inner.shutdown()
    }

    // ===== OBSERVERS =====

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub fn configuration(&self) -> Configuration {
        self.inner.configuration.get_cloned()
    }

    pub fn configuration_signal(&self) -> watch::Receiver<Configuration> {
        self.inner.configuration.signal()
    }

    pub fn item_id(&self) -> Option<ItemId> {
        self.inner.item_id.get_cloned()
    }

    pub fn item_id_signal(&self) -> watch::Receiver<Option<ItemId>> {
        self.inner.item_id.signal()
    }

    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.inner.catalog.get_cloned()
    }

    pub fn catalog_signal(&self) -> watch::Receiver<Vec<CatalogEntry>> {
        self.inner.catalog.signal()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.tracker.is_dirty()
    }

    pub fn dirty_signal(&self) -> watch::Receiver<bool> {
        self.inner.tracker.signal()
    }

    pub fn is_saving(&self) -> bool {
        self.inner.autosave.is_saving()
    }

    pub fn progress_signal(&self) -> watch::Receiver<u8> {
        self.inner.scheduler.progress().signal()
    }

    pub fn result(&self) -> Option<ComputeResult> {
        self.inner.scheduler.result()
    }

    pub fn result_signal(&self) -> watch::Receiver<Option<ComputeResult>> {
        self.inner.scheduler.result_signal()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.scheduler.state()
    }

    pub fn scheduler_state_signal(&self) -> watch::Receiver<SchedulerState> {
        self.inner.scheduler.state_signal()
    }

    pub fn job_progress_signal(&self) -> watch::Receiver<u8> {
        self.inner.poller.progress().signal()
    }

    pub fn job_status(&self) -> TaskStatus {
        self.inner.poller.status()
    }

    pub fn job_output(&self) -> Option<JobOutput> {
        self.inner.poller.output()
    }

    pub fn job_output_signal(&self) -> watch::Receiver<Option<JobOutput>> {
        self.inner.poller.output_signal()
    }

    pub fn job_active_signal(&self) -> watch::Receiver<bool> {
        self.inner.poller.active_signal()
    }

    pub fn is_initializing(&self) -> bool {
        self.inner.initializing.get_cloned()
    }

    pub fn initializing_signal(&self) -> watch::Receiver<bool> {
        self.inner.initializing.signal()
    }

    pub fn is_suppressed(&self) -> bool {
        self.inner.suppression.is_active()
    }

    pub fn errors(&self) -> &ErrorSlot {
        &self.inner.errors
    }

    /// Number of configurations that came out of the debounce filter.
    pub fn settled_ticks(&self) -> u64 {
        self.inner.pipeline.get_cloned()
    }

    pub fn settled_ticks_signal(&self) -> watch::Receiver<u64> {
        self.inner.pipeline.signal()
    }
}

impl SessionInner {
    fn commit_edit(&self, config: Configuration) {
        self.write_through(&config);
        self.tracker.observe(&config);
        self.config_edited_relay.send(config);
    }

    fn write_through(&self, config: &Configuration) {
        let written = serde_json::to_string(config)
            .map_err(Into::into)
            .and_then(|payload| self.cache.write(CURRENT_CONFIG, &payload));
        if let Err(error) = written {
            self.errors.surface(ErrorOrigin::Cache, error);
        }
    }

    fn remember_item(&self, item_id: &str) {
        if let Err(error) = self.cache.write(CURRENT_ITEM_ID, item_id) {
            self.errors.surface(ErrorOrigin::Cache, error);
        }
    }

    /// Install a freshly fetched configuration as the saved baseline and push
    /// it through the pipeline so it gets recomputed.
    fn install_loaded(&self, item_id: ItemId, loaded: SyncResult<Configuration>) -> SyncResult<()> {
        let config = match loaded {
            Ok(config) => config,
            Err(error) => {
                self.errors.surface(ErrorOrigin::Load, error.clone());
                return Err(error);
            }
        };

        self.autosave.bind(Some(item_id.clone()));
        self.item_id.set(Some(item_id.clone()));
        self.configuration.set(config.clone());
        if let Err(error) = self.tracker.reset_to(&item_id, &config) {
            log::warn!("SESSION: Could not snapshot {}: {}", item_id, error);
            self.tracker.observe(&config);
        }
        self.remember_item(&item_id);
        self.write_through(&config);
        self.errors.clear_from(ErrorOrigin::Load);
        self.config_edited_relay.send(config);
        Ok(())
    }

    fn shutdown(&self) -> Option<TerminationOutcome> {
        let item_id = self.item_id.get_cloned();
        let config = self.configuration.get_cloned();
        let outcome = self
            .termination
            .fire(item_id.as_ref(), &config, self.tracker.is_dirty())?;

        self.pipeline.stop();
        self.scheduler.cancel();
        self.poller.cancel();
        self.autosave.cancel();
        log::info!("SESSION: Session {} shut down", self.session_id);
        Some(outcome)
    }
}

impl BootstrapTarget for SessionInner {
    fn catalog_loaded(&self, catalog: Vec<CatalogEntry>) {
        self.catalog.set(catalog);
    }

    fn seed(&self, seed: Seed) {
        let Seed {
            item_id,
            config,
            baseline,
            ..
        } = seed;
        self.item_id.set(Some(item_id.clone()));
        self.configuration.set(config.clone());
        self.tracker.observe(&config);
        if let Some(baseline) = baseline {
            self.tracker.rebase(baseline);
        }
        self.autosave.bind(Some(item_id.clone()));
        self.remember_item(&item_id);
        self.write_through(&config);
    }
}
