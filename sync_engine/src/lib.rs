//! Reactive synchronization engine for configuration editors.
//!
//! A session holds one user-editable [`Configuration`](shared::Configuration)
//! and keeps it computed and persisted against a remote service: edits are
//! debounced, stale computations are dropped, dirty configurations are
//! autosaved and a final save is attempted when the session ends.
//!
//! Start with [`SessionController`].

pub mod autosave;
pub mod bootstrap;
pub mod cache;
pub mod dataflow;
pub mod debounce;
pub mod dirty;
pub mod error;
pub mod http;
pub mod operation;
pub mod poller;
pub mod progress;
pub mod scheduler;
pub mod services;
pub mod session;
pub mod settings;
pub mod suppression;
pub mod termination;

#[cfg(test)]
mod testing;

pub use autosave::AutosaveCoordinator;
pub use bootstrap::{BootstrapOutcome, BootstrapSequencer};
pub use cache::{FileCache, LocalCache, MemoryCache};
pub use debounce::{Debounced, debounce};
pub use dirty::{DirtyTracker, Snapshot};
pub use error::{ErrorOrigin, ErrorSlot, SurfacedError, SyncError, SyncResult};
pub use http::{HttpBackend, HttpBeacon, SmallPayloadBeacon};
pub use operation::{Generation, OperationHandle, OperationSlot, OperationToken};
pub use poller::{JobOutput, TaskPoller};
pub use progress::{ProgressReporter, ProgressSource, ServerProgress, SimulatedProgress};
pub use scheduler::{ComputationScheduler, SchedulerState};
pub use services::{ComputeService, JobService, ScenarioStore, TerminationTransport};
pub use session::{SessionController, SessionServices};
pub use settings::SyncSettings;
pub use suppression::{SuppressionHold, SuppressionWindow};
pub use termination::{TerminationOutcome, TerminationPersister};
