//! Progress reporting
//!
//! One 0..=100 progress value per operation class. The value is written only
//! on behalf of the generation that currently owns the reporter, and within
//! one generation it never goes down until it is explicitly reset.
//!
//! Where the numbers come from is a [`ProgressSource`]: a simulated ticker for
//! computations that report nothing, or server-reported fractions for polled
//! jobs.

use crate::dataflow::{Atom, TaskGuard};
use crate::operation::Generation;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

pub const PROGRESS_MAX: u8 = 100;

#[derive(Clone, Debug)]
pub struct ProgressReporter {
    value: Atom<u8>,
    owner: Arc<AtomicU64>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            value: Atom::new(0),
            owner: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hand the reporter to `generation` and start it from zero.
    pub fn bind(&self, generation: Generation) {
        self.owner.store(generation.value(), Ordering::SeqCst);
        self.value.set_neq(0);
    }

    pub fn is_owned_by(&self, generation: Generation) -> bool {
        self.owner.load(Ordering::SeqCst) == generation.value()
    }

    /// Raise progress to `percent`. Lower values and foreign generations are
    /// ignored. Returns whether the value changed.
    pub fn advance(&self, generation: Generation, percent: u8) -> bool {
        if !self.is_owned_by(generation) {
            return false;
        }
        let percent = percent.min(PROGRESS_MAX);
        self.value.update_if(|current| {
            if percent > *current {
                *current = percent;
                true
            } else {
                false
            }
        })
    }

    pub fn complete(&self, generation: Generation) {
        self.advance(generation, PROGRESS_MAX);
    }

    pub fn reset(&self, generation: Generation) {
        if self.is_owned_by(generation) {
            self.value.set_neq(0);
        }
    }

    /// Reset regardless of owner. Used when the owning operation is cancelled
    /// from outside.
    pub fn clear(&self) {
        self.value.set_neq(0);
    }

    pub fn get(&self) -> u8 {
        self.value.get_cloned()
    }

    pub fn signal(&self) -> watch::Receiver<u8> {
        self.value.signal()
    }
}

/// Strategy that feeds a [`ProgressReporter`] for one generation.
pub trait ProgressSource: Send + Sync + fmt::Debug {
    /// Start producing progress on its own. The returned task is owned by the
    /// operation and dropped with it.
    fn drive(&self, reporter: &ProgressReporter, generation: Generation) -> Option<TaskGuard>;

    /// Feed a fraction in `[0, 1]` reported by the remote side.
    fn observe(&self, _reporter: &ProgressReporter, _generation: Generation, _reported: f64) {}
}

/// Fixed step every tick, held below a cap until the real result arrives.
#[derive(Debug, Clone)]
pub struct SimulatedProgress {
    pub step: u8,
    pub tick: Duration,
    pub cap: u8,
}

impl SimulatedProgress {
    pub fn new(step: u8, tick: Duration, cap: u8) -> Self {
        Self {
            step: step.max(1),
            tick,
            cap: cap.min(PROGRESS_MAX),
        }
    }
}

impl ProgressSource for SimulatedProgress {
    fn drive(&self, reporter: &ProgressReporter, generation: Generation) -> Option<TaskGuard> {
        let reporter = reporter.clone();
        let SimulatedProgress { step, tick, cap } = self.clone();

        Some(TaskGuard::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                if !reporter.is_owned_by(generation) {
                    break;
                }
                let current = reporter.get();
                let next = current.saturating_add(step).min(cap);
                if next <= current {
                    break;
                }
                reporter.advance(generation, next);
            }
        }))
    }
}

/// Progress taken from the server's own reports.
#[derive(Debug, Clone, Default)]
pub struct ServerProgress;

impl ProgressSource for ServerProgress {
    fn drive(&self, _reporter: &ProgressReporter, _generation: Generation) -> Option<TaskGuard> {
        None
    }

    fn observe(&self, reporter: &ProgressReporter, generation: Generation, reported: f64) {
        let fraction = if reported.is_finite() { reported.clamp(0.0, 1.0) } else { 0.0 };
        reporter.advance(generation, (fraction * 100.0).round() as u8);
    }
}
