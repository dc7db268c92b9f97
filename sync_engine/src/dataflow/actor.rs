//! Single-value Actor implementation
//!
//! Actor couples an observable [`Atom`] with the task that owns its
//! mutations. The task typically drains one or more relay streams.

use crate::dataflow::{Atom, TaskGuard};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Observable state plus the processing loop that updates it.
///
/// # Core Principles
///
/// - **Single Point of Mutation**: Only the processor writes the state
/// - **Sequential Processing**: Events are handled one at a time in order
/// - **Owned Loop**: The processor task is aborted when the last clone drops
///
/// # Examples
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use sync_engine::dataflow::{Actor, relay};
///
/// # async fn demo() {
/// let (edit_made_relay, mut edit_made_stream) = relay::<u32>();
///
/// let edits_seen = Actor::new(0u32, |state| async move {
///     while let Some(_) = edit_made_stream.next().await {
///         state.update_mut(|count| *count += 1);
///     }
/// });
///
/// edit_made_relay.send(1);
/// let observer = edits_seen.signal();
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Actor<T> {
    state: Atom<T>,
    #[allow(dead_code)]
    task_guard: Arc<TaskGuard>,
}

impl<T> Actor<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new Actor and start its processor on the current runtime.
    pub fn new<F, Fut>(initial_state: T, processor: F) -> Self
    where
        F: FnOnce(Atom<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = Atom::new(initial_state);
        let task_guard = Arc::new(TaskGuard::spawn(processor(state.clone())));
        Self { state, task_guard }
    }

    pub fn signal(&self) -> watch::Receiver<T> {
        self.state.signal()
    }

    pub fn get_cloned(&self) -> T {
        self.state.get_cloned()
    }

    /// Whether the processing loop has ended (its input streams closed).
    pub fn is_stopped(&self) -> bool {
        self.task_guard.is_finished()
    }

    /// Abort the processing loop. The last state stays readable.
    pub fn stop(&self) {
        self.task_guard.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::relay;
    use futures::{StreamExt, select};
    use std::time::Duration;

    #[tokio::test]
    async fn test_actor_basic_functionality() {
        let (increment_relay, mut increment_stream) = relay();

        let counter = Actor::new(0, |state| async move {
            while let Some(amount) = increment_stream.next().await {
                state.update_mut(|current| *current += amount);
            }
        });

        increment_relay.send(5);
        increment_relay.send(3);

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(counter.get_cloned(), 8);
    }

    #[tokio::test]
    async fn test_actor_multiple_streams() {
        let (increment_relay, increment_stream) = relay();
        let (decrement_relay, decrement_stream) = relay();

        let counter = Actor::new(10u32, |state| async move {
            let mut increment_stream = increment_stream.fuse();
            let mut decrement_stream = decrement_stream.fuse();
            loop {
                select! {
                    amount = increment_stream.next() => match amount {
                        Some(amount) => state.update_mut(|current| *current += amount),
                        None => break,
                    },
                    amount = decrement_stream.next() => match amount {
                        Some(amount) => state.update_mut(|current| *current = current.saturating_sub(amount)),
                        None => break,
                    },
                }
            }
        });

        increment_relay.send(5);
        decrement_relay.send(3);

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(counter.get_cloned(), 12);
    }

    #[tokio::test]
    async fn test_actor_stops_when_inputs_close() {
        let (event_relay, mut event_stream) = relay::<()>();

        let actor = Actor::new((), |_state| async move {
            while event_stream.next().await.is_some() {}
        });

        drop(event_relay);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(actor.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_actor_ignores_events() {
        let (event_relay, mut event_stream) = relay::<u32>();

        let last_event = Actor::new(0u32, |state| async move {
            while let Some(event) = event_stream.next().await {
                state.set(event);
            }
        });

        event_relay.send(1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        last_event.stop();
        event_relay.send(2);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(last_event.get_cloned(), 1);
        assert!(!event_relay.is_connected());
    }
}
