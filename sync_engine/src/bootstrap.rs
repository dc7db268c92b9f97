//! Bootstrap and recovery
//!
//! Reconciles the local cache with the remote catalog once per session:
//!
//! 1. fetch the catalog
//! 2. read the cached item id and configuration
//! 3. restore from the cache if that item still exists remotely
//! 4. otherwise load the first catalog entry from the server
//! 5. compute the initial result right away
//!
//! A safety timer leaves the loading state if this takes too long.

use crate::cache::{CURRENT_CONFIG, CURRENT_ITEM_ID, LocalCache};
use crate::dataflow::{Atom, TaskGuard};
use crate::dirty::Snapshot;
use crate::error::{ErrorOrigin, ErrorSlot, SyncError, SyncResult};
use crate::scheduler::ComputationScheduler;
use crate::services::ScenarioStore;
use crate::suppression::SuppressionWindow;
use shared::{CatalogEntry, Configuration, ItemId, SaveRecord, catalog_contains};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Restored(ItemId),
    Fetched(ItemId),
    EmptyCatalog,
    AlreadyRan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOrigin {
    Cache,
    Remote,
}

/// Initial item handed to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    pub item_id: ItemId,
    pub config: Configuration,
    /// Snapshot the configuration was loaded as. Absent for cache restores,
    /// whose remote state is unknown.
    pub baseline: Option<SaveRecord>,
    pub origin: SeedOrigin,
}

/// Receiver of what bootstrap loads.
pub trait BootstrapTarget: Send + Sync {
    fn catalog_loaded(&self, catalog: Vec<CatalogEntry>);

    fn seed(&self, seed: Seed);
}

/// Services and state bootstrap works against.
pub struct BootstrapContext<'a> {
    pub store: &'a dyn ScenarioStore,
    pub cache: &'a dyn LocalCache,
    pub suppression: &'a SuppressionWindow,
    pub scheduler: &'a ComputationScheduler,
    pub errors: &'a ErrorSlot,
    pub initializing: &'a Atom<bool>,
}

#[derive(Debug)]
pub struct BootstrapSequencer {
    started: AtomicBool,
    timeout: Duration,
}

impl BootstrapSequencer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            started: AtomicBool::new(false),
            timeout,
        }
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub async fn run(&self, context: BootstrapContext<'_>, target: &dyn BootstrapTarget) -> SyncResult<BootstrapOutcome> {
        if self.started.swap(true, Ordering::SeqCst) {
            log::debug!("BOOTSTRAP: Already ran, ignoring");
            return Ok(BootstrapOutcome::AlreadyRan);
        }

        log::info!("BOOTSTRAP: Starting");
        context.initializing.set_neq(true);
        let _safety = {
            let initializing = context.initializing.clone();
            let errors = context.errors.clone();
            let timeout = self.timeout;
            TaskGuard::after(timeout, move || {
                if initializing.set_neq(false) {
                    errors.surface(ErrorOrigin::Bootstrap, SyncError::BootstrapTimeout(timeout));
                }
            })
        };

        let loaded = context.suppression.during(load_seed(&context, target)).await;
        let seed = match loaded {
            Ok(Some(seed)) => seed,
            Ok(None) => {
                log::warn!("BOOTSTRAP: Catalog is empty, nothing to load");
                context.initializing.set_neq(false);
                return Ok(BootstrapOutcome::EmptyCatalog);
            }
            Err(error) => {
                context.initializing.set_neq(false);
                return Err(error);
            }
        };

        let outcome = match seed.origin {
            SeedOrigin::Cache => BootstrapOutcome::Restored(seed.item_id.clone()),
            SeedOrigin::Remote => BootstrapOutcome::Fetched(seed.item_id.clone()),
        };
        let config = seed.config.clone();
        target.seed(seed);

        // Failures are surfaced by the scheduler itself
        if let Err(error) = context.scheduler.run_now(config).await {
            log::debug!("BOOTSTRAP: Initial computation did not apply: {}", error);
        }
        context.initializing.set_neq(false);

        log::info!("BOOTSTRAP: Finished with {:?}", outcome);
        Ok(outcome)
    }
}

async fn load_seed(context: &BootstrapContext<'_>, target: &dyn BootstrapTarget) -> SyncResult<Option<Seed>> {
    let catalog = match context.store.fetch_catalog().await {
        Ok(catalog) => catalog,
        Err(error) => {
            context.errors.surface(ErrorOrigin::Bootstrap, error.clone());
            return Err(error);
        }
    };
    log::debug!("BOOTSTRAP: Catalog has {} entries", catalog.len());
    let first_id = catalog.first().map(|entry| entry.id.clone());
    let restored = read_cached(context.cache, context.errors)
        .filter(|(item_id, _)| catalog_contains(&catalog, item_id));
    target.catalog_loaded(catalog);

    if let Some((item_id, config)) = restored {
        log::info!("BOOTSTRAP: Restoring {} from local cache", item_id);
        return Ok(Some(Seed {
            item_id,
            config,
            baseline: None,
            origin: SeedOrigin::Cache,
        }));
    }

    let Some(item_id) = first_id else {
        return Ok(None);
    };

    log::info!("BOOTSTRAP: Loading {} from server", item_id);
    let config = match context.store.fetch_item(&item_id).await {
        Ok(config) => config,
        Err(error) => {
            context.errors.surface(ErrorOrigin::Load, error.clone());
            return Err(error);
        }
    };
    let baseline = Snapshot::of(&config)
        .map(|snapshot| SaveRecord::new(item_id.clone(), snapshot.into_string()))
        .ok();

    Ok(Some(Seed {
        item_id,
        config,
        baseline,
        origin: SeedOrigin::Remote,
    }))
}

/// Cached item id and configuration, if both are present and readable.
fn read_cached(cache: &dyn LocalCache, errors: &ErrorSlot) -> Option<(ItemId, Configuration)> {
    let read = |slot: &str| match cache.read(slot) {
        Ok(value) => value,
        Err(error) => {
            errors.surface(ErrorOrigin::Cache, error);
            None
        }
    };

    let item_id = read(CURRENT_ITEM_ID)?;
    let raw = read(CURRENT_CONFIG)?;
    match serde_json::from_str::<Configuration>(&raw) {
        Ok(config) => Some((item_id, config)),
        Err(error) => {
            log::warn!("BOOTSTRAP: Ignoring unreadable cached configuration: {}", error);
            None
        }
    }
}
