//! Observable single-value state
//!
//! Atom is the engine's equivalent of a reactive cell: components write to
//! it synchronously and observers hold a `watch::Receiver` that wakes on
//! every change.

use std::sync::Arc;
use tokio::sync::watch;

/// Observable value shared between a component and its observers.
///
/// Writes are applied immediately, so a component can read back what it just
/// wrote within the same tick. Observers get the latest value only; missed
/// intermediate values are not replayed.
///
/// Use Atom for engine state like:
/// - Progress percentage
/// - Dirty / initializing / active flags
/// - Result and error slots
///
/// # Examples
///
/// ```rust
/// use sync_engine::dataflow::Atom;
///
/// let progress = Atom::new(0u8);
/// let observer = progress.signal();
///
/// progress.set_neq(40);
/// assert_eq!(*observer.borrow(), 40);
/// ```
#[derive(Debug)]
pub struct Atom<T> {
    state: Arc<watch::Sender<T>>,
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Atom<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (state, _receiver) = watch::channel(initial);
        Self {
            state: Arc::new(state),
        }
    }

    /// Replace the value and notify observers.
    pub fn set(&self, value: T) {
        self.state.send_replace(value);
    }

    /// Replace the value only if it differs, notifying observers on change.
    pub fn set_neq(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        self.state.send_if_modified(|current| {
            if *current != value {
                *current = value;
                true
            } else {
                false
            }
        })
    }

    /// Mutate in place and notify observers.
    pub fn update_mut(&self, update: impl FnOnce(&mut T)) {
        self.state.send_modify(update);
    }

    /// Mutate in place; observers are notified only when `update` returns true.
    pub fn update_if(&self, update: impl FnOnce(&mut T) -> bool) -> bool {
        self.state.send_if_modified(update)
    }

    pub fn get_cloned(&self) -> T {
        self.state.borrow().clone()
    }

    /// Read through a reference without cloning.
    pub fn with<R>(&self, read: impl FnOnce(&T) -> R) -> R {
        read(&self.state.borrow())
    }

    /// A receiver that observes every subsequent change.
    pub fn signal(&self) -> watch::Receiver<T> {
        self.state.subscribe()
    }
}

impl<T> Default for Atom<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}
