//! Debounce filter
//!
//! Holds back a rapidly changing value until it has been quiet for a fixed
//! window, then emits only the latest one.

use crate::dataflow::TaskGuard;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

/// Output side of a debounce filter.
///
/// Yields one value per quiet period. The filtering task is owned by this
/// handle and stops when it is dropped.
#[derive(Debug)]
pub struct Debounced<T> {
    output: mpsc::UnboundedReceiver<T>,
    _task_guard: TaskGuard,
}

impl<T> Debounced<T> {
    pub async fn next(&mut self) -> Option<T> {
        self.output.recv().await
    }
}

impl<T> Stream for Debounced<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.output.poll_recv(cx)
    }
}

/// Debounce `input` with quiescence window `window`.
///
/// Every new input restarts the wait. When the input ends while a value is
/// still pending, that value is flushed immediately and the output ends.
pub fn debounce<S>(input: S, window: Duration) -> Debounced<S::Item>
where
    S: Stream + Send + Unpin + 'static,
    S::Item: Send + 'static,
{
    let (sender, output) = mpsc::unbounded_channel();

    let task_guard = TaskGuard::spawn(async move {
        let mut input = input.fuse();

        while let Some(first) = input.next().await {
            let mut latest = first;
            // Debounce loop - wait for quiet period, restarting if a new value arrives
            loop {
                tokio::select! {
                    next = input.next() => match next {
                        Some(value) => {
                            latest = value;
                        }
                        None => {
                            let _ = sender.send(latest);
                            return;
                        }
                    },
                    _ = tokio::time::sleep(window) => {
                        if sender.send(latest).is_err() {
                            return;
                        }
                        break;
                    }
                }
            }
        }
    });

    Debounced {
        output,
        _task_guard: task_guard,
    }
}
