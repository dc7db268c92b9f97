//! Core dataflow primitives for the synchronization engine
//!
//! These are the building blocks every component uses to hold observable
//! state and own its background work. They carry no business logic.
//!
//! # Core Components
//!
//! - **[`Relay`]** - Event streaming from editors into the pipeline
//! - **[`Atom`]** - Observable single value (progress, flags, slots)
//! - **[`Actor`]** - Observable value plus the task that drives it
//! - **[`TaskGuard`]** - Ownership of a spawned task or timer; aborts on drop
//!
//! # Architecture Principles
//!
//! 1. **Owned timers** - Every timer lives in a `TaskGuard` held by the operation that created it
//! 2. **Event-Source Naming** - Relays follow `{source}_{event}_relay` pattern
//! 3. **Signals for observers** - Consumers watch `signal()` receivers instead of polling

pub mod actor;
pub mod atom;
pub mod relay;
pub mod task;

pub use actor::Actor;
pub use atom::Atom;
pub use relay::{Relay, RelayError, relay};
pub use task::TaskGuard;

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
