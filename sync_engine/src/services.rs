//! Remote services consumed by the engine.
//!
//! The engine talks to these traits only. [`crate::http::HttpBackend`]
//! implements them against the scenario REST service; tests use in-memory
//! fakes.

use crate::error::SyncResult;
use async_trait::async_trait;
use serde_json::Value;
use shared::{CatalogEntry, ComputeResult, Configuration, ItemId, JobId, JobStatus};

/// Persisted scenarios (items) and their configurations.
#[async_trait]
pub trait ScenarioStore: Send + Sync {
    async fn fetch_catalog(&self) -> SyncResult<Vec<CatalogEntry>>;

    async fn fetch_item(&self, item_id: &str) -> SyncResult<Configuration>;

    async fn save_item(&self, item_id: &str, config: &Configuration) -> SyncResult<()>;

    /// Restore one item to its factory state and return it.
    async fn reset_item(&self, item_id: &str) -> SyncResult<Configuration>;

    /// Restore every item to its factory state.
    async fn reset_all(&self) -> SyncResult<()>;
}

/// Fast-path computation that returns its result directly.
#[async_trait]
pub trait ComputeService: Send + Sync {
    async fn compute(&self, config: &Configuration) -> SyncResult<ComputeResult>;
}

/// Long-running server jobs with pollable status.
#[async_trait]
pub trait JobService: Send + Sync {
    async fn start_job(&self, params: &Value) -> SyncResult<JobId>;

    async fn poll_job(&self, job_id: &str) -> SyncResult<JobStatus>;

    /// Result document of a completed job.
    async fn fetch_result(&self, job_id: &str) -> SyncResult<Value>;

    /// Ask the server to stop a job. Servers without cancellation accept silently.
    async fn cancel_job(&self, _job_id: &str) -> SyncResult<()> {
        Ok(())
    }
}

/// One way of getting a final save out during teardown.
///
/// `offer` must not block on delivery. Returning `true` means the write was
/// handed off, not that it arrived.
pub trait TerminationTransport: Send + Sync {
    fn name(&self) -> &str;

    fn offer(&self, item_id: &ItemId, payload: &str) -> bool;
}
