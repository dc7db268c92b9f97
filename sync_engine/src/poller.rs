//! Async task poller
//!
//! Long-running server jobs (image mixing) report their own progress. The
//! poller starts a job, polls its status on a fixed interval and publishes the
//! result of the most recently started job only.

use crate::dataflow::{Atom, TaskGuard, lock};
use crate::error::{ErrorOrigin, ErrorSlot, SyncError, SyncResult};
use crate::operation::{Generation, OperationHandle, OperationSlot, OperationToken};
use crate::progress::{ProgressReporter, ProgressSource, ServerProgress};
use crate::services::JobService;
use crate::settings::SyncSettings;
use serde_json::Value;
use shared::{JobId, JobPhase, TaskStatus};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// Result of a completed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub job_id: JobId,
    pub result: Value,
}

struct LiveJob {
    handle: Arc<OperationHandle>,
    job_id: Option<JobId>,
    // Reached a terminal state on the server; nothing left to cancel
    finished: bool,
}

#[derive(Clone)]
pub struct TaskPoller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    slot: OperationSlot,
    live: Arc<Mutex<Option<LiveJob>>>,
    context: PollContext,
}

/// Everything the poll loop touches. Cloned into the loop so the loop never
/// holds the poller itself.
#[derive(Clone)]
struct PollContext {
    jobs: Arc<dyn JobService>,
    progress: ProgressReporter,
    source: Arc<dyn ProgressSource>,
    active: Atom<bool>,
    status: Atom<TaskStatus>,
    output: Atom<Option<JobOutput>>,
    errors: ErrorSlot,
    interval: Duration,
    settle: Duration,
}

impl TaskPoller {
    pub fn new(jobs: Arc<dyn JobService>, settings: &SyncSettings, errors: ErrorSlot) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                slot: OperationSlot::new("job"),
                live: Arc::new(Mutex::new(None)),
                context: PollContext {
                    jobs,
                    progress: ProgressReporter::new(),
                    source: Arc::new(ServerProgress),
                    active: Atom::new(false),
                    status: Atom::new(TaskStatus::default()),
                    output: Atom::new(None),
                    errors,
                    interval: settings.poll_interval(),
                    settle: settings.settle(),
                },
            }),
        }
    }

    /// Start a job, superseding whatever job is still being polled.
    pub async fn start(&self, params: Value) -> SyncResult<JobId> {
        self.abandon_live();

        let context = &self.inner.context;
        let handle = Arc::new(self.inner.slot.begin());
        let generation = handle.generation();
        *lock(&self.inner.live) = Some(LiveJob {
            handle: handle.clone(),
            job_id: None,
            finished: false,
        });
        context.progress.bind(generation);
        context.active.set_neq(true);
        context.status.set(TaskStatus {
            running: true,
            ..TaskStatus::default()
        });

        let mut starting = PendingStart {
            poller: self,
            handle: &handle,
            armed: true,
        };
        let started = context.jobs.start_job(&params).await;
        starting.armed = false;

        let job_id = match started {
            Ok(job_id) => job_id,
            Err(error) => {
                if !handle.is_stale() {
                    context.finish(&handle.token(), Some(error.to_string()));
                    context.errors.surface(ErrorOrigin::Job, error.clone());
                }
                return Err(error);
            }
        };

        if handle.is_stale() {
            log::debug!("JOBS: Job {} was superseded while starting", job_id);
            context.cancel_remote(job_id);
            return Err(SyncError::Cancelled);
        }

        log::info!("JOBS: Started job {} ({})", job_id, generation);
        if let Some(live) = lock(&self.inner.live).as_mut() {
            if Arc::ptr_eq(&live.handle, &handle) {
                live.job_id = Some(job_id.clone());
            }
        }
        context.errors.clear_from(ErrorOrigin::Job);

        let poll_loop = context
            .clone()
            .poll(handle.token(), job_id.clone(), Arc::downgrade(&self.inner.live));
        handle.own(TaskGuard::spawn(poll_loop));
        Ok(job_id)
    }

    /// Stop polling the live job and ask the server to cancel it.
    /// Nothing is surfaced.
    pub fn cancel(&self) {
        if self.abandon_live() {
            let context = &self.inner.context;
            context.progress.clear();
            context.active.set_neq(false);
            context.status.update_mut(|status| status.running = false);
        }
    }

    /// Supersede the live job if it is still running. A finished job is left
    /// to settle on its own.
    fn abandon_live(&self) -> bool {
        let previous = {
            let mut live = lock(&self.inner.live);
            let running = live.as_ref().is_some_and(|job| !job.finished);
            if running { live.take() } else { None }
        };
        let Some(previous) = previous else {
            return false;
        };
        previous.handle.cancel();
        if let Some(job_id) = previous.job_id {
            log::debug!("JOBS: Abandoning job {}", job_id);
            self.inner.context.cancel_remote(job_id);
        }
        true
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.inner.context.progress
    }

    pub fn is_active(&self) -> bool {
        self.inner.context.active.get_cloned()
    }

    pub fn active_signal(&self) -> watch::Receiver<bool> {
        self.inner.context.active.signal()
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.context.status.get_cloned()
    }

    pub fn output(&self) -> Option<JobOutput> {
        self.inner.context.output.get_cloned()
    }

    pub fn output_signal(&self) -> watch::Receiver<Option<JobOutput>> {
        self.inner.context.output.signal()
    }

    pub fn live_job(&self) -> Option<JobId> {
        lock(&self.inner.live).as_ref().and_then(|live| live.job_id.clone())
    }
}

/// Resets the poller if `start` is dropped before the server answered.
struct PendingStart<'a> {
    poller: &'a TaskPoller,
    handle: &'a Arc<OperationHandle>,
    armed: bool,
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if !self.armed || self.handle.is_stale() {
            return;
        }
        log::debug!("JOBS: Start of {} abandoned before the server answered", self.handle.generation());
        {
            let mut live = lock(&self.poller.inner.live);
            if live.as_ref().is_some_and(|job| Arc::ptr_eq(&job.handle, self.handle)) {
                live.take();
            }
        }
        self.handle.cancel();
        self.poller.inner.context.finish(&self.handle.token(), None);
    }
}

/// Mark the job of `generation` finished so it is never cancelled remotely.
fn retire(live: &Weak<Mutex<Option<LiveJob>>>, generation: Generation) {
    let Some(shared) = live.upgrade() else {
        return;
    };
    let mut live = lock(&shared);
    if let Some(job) = live.as_mut().filter(|job| job.handle.generation() == generation) {
        job.finished = true;
        job.job_id = None;
    }
}

impl PollContext {
    async fn poll(self, token: OperationToken, job_id: JobId, live: Weak<Mutex<Option<LiveJob>>>) {
        let generation = token.generation();
        loop {
            tokio::time::sleep(self.interval).await;
            if token.is_stale() {
                return;
            }

            let status = match self.jobs.poll_job(&job_id).await {
                Ok(status) => status,
                Err(error) => {
                    if token.is_current() {
                        retire(&live, generation);
                        log::warn!("JOBS: Polling {} failed, giving up", job_id);
                        self.finish(&token, Some(error.to_string()));
                        self.errors.surface(ErrorOrigin::Job, error);
                    }
                    return;
                }
            };
            if token.is_stale() {
                return;
            }

            self.source.observe(&self.progress, generation, status.progress);
            if status.status.is_terminal() {
                retire(&live, generation);
            }

            match status.status {
                JobPhase::Starting | JobPhase::Processing => {
                    // The reporter never moves backwards, the raw document can
                    self.status.set(TaskStatus {
                        progress: self.progress.get(),
                        ..TaskStatus::from(&status)
                    });
                }
                JobPhase::Completed => {
                    match self.jobs.fetch_result(&job_id).await {
                        Ok(result) if token.is_current() => {
                            self.progress.complete(generation);
                            self.output.set(Some(JobOutput {
                                job_id: job_id.clone(),
                                result: result.clone(),
                            }));
                            self.status.set(TaskStatus {
                                running: false,
                                progress: self.progress.get(),
                                result: Some(result),
                                error: None,
                            });
                            self.active.set_neq(false);
                            log::info!("JOBS: Job {} completed", job_id);

                            tokio::time::sleep(self.settle).await;
                            self.progress.reset(generation);
                        }
                        Ok(_) => log::debug!("JOBS: Dropping late result of {}", job_id),
                        Err(error) => {
                            if token.is_current() {
                                self.finish(&token, Some(error.to_string()));
                                self.errors.surface(ErrorOrigin::Job, error);
                            }
                        }
                    }
                    return;
                }
                JobPhase::Failed => {
                    let message = status.error.unwrap_or_else(|| "job failed".to_string());
                    self.finish(&token, Some(message.clone()));
                    self.errors.surface(ErrorOrigin::Job, SyncError::JobFailure(message));
                    return;
                }
                JobPhase::Cancelled => {
                    log::debug!("JOBS: Job {} cancelled on the server", job_id);
                    self.finish(&token, None);
                    return;
                }
            }
        }
    }

    /// Terminal without a result: progress back to 0, no longer active.
    fn finish(&self, token: &OperationToken, error: Option<String>) {
        self.progress.reset(token.generation());
        self.active.set_neq(false);
        self.status.set(TaskStatus {
            running: false,
            progress: 0,
            result: None,
            error,
        });
    }

    fn cancel_remote(&self, job_id: JobId) {
        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            if let Err(error) = jobs.cancel_job(&job_id).await {
                log::warn!("JOBS: Best-effort cancel of {} failed: {}", job_id, error);
            }
        });
    }
}
