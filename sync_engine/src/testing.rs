//! In-memory services for engine tests.

use crate::dataflow::lock;
use crate::error::{SyncError, SyncResult};
use crate::services::{ComputeService, JobService, ScenarioStore, TerminationTransport};
use async_trait::async_trait;
use serde_json::{Value, json};
use shared::{CatalogEntry, ComputeResult, Configuration, ItemId, JobId, JobStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

// ===== SCENARIO STORE =====

#[derive(Default)]
pub struct FakeStore {
    catalog: Mutex<Vec<CatalogEntry>>,
    items: Mutex<HashMap<ItemId, Configuration>>,
    factory: Mutex<HashMap<ItemId, Configuration>>,
    saves: Mutex<Vec<(ItemId, Configuration, Instant)>>,
    fetches: Mutex<Vec<ItemId>>,
    failing_saves: AtomicUsize,
    hang_catalog: AtomicBool,
    fetch_delay: Mutex<Duration>,
    save_delay: Mutex<Duration>,
}

impl FakeStore {
    pub fn with_items(items: &[(&str, Value)]) -> Self {
        let store = Self::default();
        for (id, value) in items {
            lock(&store.catalog).push(CatalogEntry::new(*id, id.to_uppercase()));
            lock(&store.items).insert(id.to_string(), Configuration::new(value.clone()));
            lock(&store.factory).insert(id.to_string(), Configuration::new(value.clone()));
        }
        store
    }

    /// The next `count` saves fail with a network error.
    pub fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    pub fn hang_catalog(&self) {
        self.hang_catalog.store(true, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *lock(&self.fetch_delay) = delay;
    }

    pub fn set_save_delay(&self, delay: Duration) {
        *lock(&self.save_delay) = delay;
    }

    pub fn saves(&self) -> Vec<(ItemId, Configuration)> {
        lock(&self.saves)
            .iter()
            .map(|(id, config, _)| (id.clone(), config.clone()))
            .collect()
    }

    pub fn save_instants(&self) -> Vec<Instant> {
        lock(&self.saves).iter().map(|(_, _, at)| *at).collect()
    }

    pub fn fetches(&self) -> Vec<ItemId> {
        lock(&self.fetches).clone()
    }

    pub fn stored(&self, item_id: &str) -> Option<Configuration> {
        lock(&self.items).get(item_id).cloned()
    }
}

#[async_trait]
impl ScenarioStore for FakeStore {
    async fn fetch_catalog(&self) -> SyncResult<Vec<CatalogEntry>> {
        if self.hang_catalog.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(lock(&self.catalog).clone())
    }

    async fn fetch_item(&self, item_id: &str) -> SyncResult<Configuration> {
        lock(&self.fetches).push(item_id.to_string());
        let delay = *lock(&self.fetch_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        lock(&self.items)
            .get(item_id)
            .cloned()
            .ok_or_else(|| SyncError::Network(format!("404 Not Found: Scenario {} not found", item_id)))
    }

    async fn save_item(&self, item_id: &str, config: &Configuration) -> SyncResult<()> {
        lock(&self.saves).push((item_id.to_string(), config.clone(), Instant::now()));
        let delay = *lock(&self.save_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::Network("503 Service Unavailable".to_string()));
        }
        lock(&self.items).insert(item_id.to_string(), config.clone());
        Ok(())
    }

    async fn reset_item(&self, item_id: &str) -> SyncResult<Configuration> {
        let factory = lock(&self.factory)
            .get(item_id)
            .cloned()
            .ok_or_else(|| SyncError::Network(format!("404 Not Found: Scenario {} not found", item_id)))?;
        lock(&self.items).insert(item_id.to_string(), factory.clone());
        Ok(factory)
    }

    async fn reset_all(&self) -> SyncResult<()> {
        let factory = lock(&self.factory).clone();
        *lock(&self.items) = factory;
        Ok(())
    }
}

// ===== COMPUTE =====

pub struct ScriptedCompute {
    pub delay: Duration,
    pub outcome: SyncResult<ComputeResult>,
}

/// Echoes its input after a delay unless a scripted outcome is queued.
pub struct FakeCompute {
    delay: Duration,
    script: Mutex<VecDeque<ScriptedCompute>>,
    calls: Mutex<Vec<(Instant, Configuration)>>,
}

impl FakeCompute {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, delay: Duration, outcome: SyncResult<ComputeResult>) {
        lock(&self.script).push_back(ScriptedCompute { delay, outcome });
    }

    pub fn echo(config: &Configuration) -> ComputeResult {
        ComputeResult(json!({ "echo": config.as_value() }))
    }

    pub fn calls(&self) -> Vec<(Instant, Configuration)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl ComputeService for FakeCompute {
    async fn compute(&self, config: &Configuration) -> SyncResult<ComputeResult> {
        lock(&self.calls).push((Instant::now(), config.clone()));
        let scripted = lock(&self.script).pop_front();
        let (delay, outcome) = match scripted {
            Some(ScriptedCompute { delay, outcome }) => (delay, outcome),
            None => (self.delay, Ok(Self::echo(config))),
        };
        tokio::time::sleep(delay).await;
        outcome
    }
}

// ===== JOBS =====

/// Jobs named `job-1`, `job-2`, ... Each job replays its scripted statuses
/// one per poll and keeps repeating the last one.
#[derive(Default)]
pub struct FakeJobs {
    next_id: AtomicU64,
    scripts: Mutex<HashMap<JobId, VecDeque<SyncResult<JobStatus>>>>,
    result_delays: Mutex<HashMap<JobId, Duration>>,
    started: Mutex<Vec<Value>>,
    cancelled: Mutex<Vec<JobId>>,
    polls: AtomicUsize,
    start_delay: Mutex<Duration>,
}

impl FakeJobs {
    pub fn script(&self, job_id: &str, statuses: Vec<SyncResult<JobStatus>>) {
        lock(&self.scripts).insert(job_id.to_string(), statuses.into());
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *lock(&self.start_delay) = delay;
    }

    pub fn delay_result(&self, job_id: &str, delay: Duration) {
        lock(&self.result_delays).insert(job_id.to_string(), delay);
    }

    pub fn started(&self) -> Vec<Value> {
        lock(&self.started).clone()
    }

    pub fn cancelled(&self) -> Vec<JobId> {
        lock(&self.cancelled).clone()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn next_status(&self, job_id: &str) -> SyncResult<JobStatus> {
        let mut scripts = lock(&self.scripts);
        let Some(queue) = scripts.get_mut(job_id) else {
            return Ok(JobStatus::running(0.0));
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_else(|| Ok(JobStatus::running(0.0)))
        } else {
            queue.front().cloned().unwrap_or_else(|| Ok(JobStatus::running(0.0)))
        }
    }
}

#[async_trait]
impl JobService for FakeJobs {
    async fn start_job(&self, params: &Value) -> SyncResult<JobId> {
        lock(&self.started).push(params.clone());
        let delay = *lock(&self.start_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("job-{}", id))
    }

    async fn poll_job(&self, job_id: &str) -> SyncResult<JobStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.next_status(job_id)
    }

    async fn fetch_result(&self, job_id: &str) -> SyncResult<Value> {
        let delay = lock(&self.result_delays).get(job_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(json!({ "job": job_id }))
    }

    async fn cancel_job(&self, job_id: &str) -> SyncResult<()> {
        lock(&self.cancelled).push(job_id.to_string());
        Ok(())
    }
}

// ===== TERMINATION =====

pub struct RecordingTransport {
    name: String,
    accepts: bool,
    offers: Mutex<Vec<(ItemId, String)>>,
}

impl RecordingTransport {
    pub fn new(name: &str, accepts: bool) -> Self {
        Self {
            name: name.to_string(),
            accepts,
            offers: Mutex::new(Vec::new()),
        }
    }

    pub fn offers(&self) -> Vec<(ItemId, String)> {
        lock(&self.offers).clone()
    }
}

impl TerminationTransport for RecordingTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn offer(&self, item_id: &ItemId, payload: &str) -> bool {
        lock(&self.offers).push((item_id.clone(), payload.to_string()));
        self.accepts
    }
}
