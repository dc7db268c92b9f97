//! Event streaming Relay
//!
//! Relay carries events from editor call sites into the engine's processing
//! loops over an unbounded channel.

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};

/// Type-safe event relay feeding a single processing loop.
///
/// Every clone sends into the same receiver, so any number of editor call
/// sites can report into one pipeline.
///
/// # Event-Source Naming Convention
///
/// Relays follow the `{source}_{event}_relay` naming pattern:
/// - `config_changed_relay` - An edit produced a new configuration
/// - `scenario_loaded_relay` - A fetch replaced the configuration
///
/// # Examples
///
/// ```rust
/// use futures::StreamExt;
/// use sync_engine::dataflow::relay;
///
/// # futures::executor::block_on(async {
/// let (config_changed_relay, mut stream) = relay::<u32>();
/// config_changed_relay.send(7);
/// assert_eq!(stream.next().await, Some(7));
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct Relay<T>
where
    T: Send + 'static,
{
    sender: UnboundedSender<T>,
}

/// Error type for Relay operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The channel has been closed (receiver dropped)
    ChannelClosed,
}

impl<T> Relay<T>
where
    T: Send + 'static,
{
    /// Create a new Relay with its receiving stream.
    pub fn new() -> (Self, UnboundedReceiver<T>) {
        let (sender, receiver) = unbounded();
        (Relay { sender }, receiver)
    }

    /// Send an event through the relay.
    ///
    /// If the receiver has been dropped (the pipeline shut down), the event
    /// is silently discarded.
    pub fn send(&self, value: T) {
        let _ = self.sender.unbounded_send(value);
    }

    /// Send an event, reporting a closed pipeline.
    pub fn try_send(&self, value: T) -> Result<(), RelayError> {
        self.sender
            .unbounded_send(value)
            .map_err(|_| RelayError::ChannelClosed)
    }

    /// Whether the receiving loop is still alive.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl<T> Default for Relay<T>
where
    T: Send + 'static,
{
    /// A disconnected relay whose events are discarded.
    fn default() -> Self {
        let (relay, _receiver) = Self::new();
        relay
    }
}

/// Creates a new Relay with an associated receiver stream.
pub fn relay<T>() -> (Relay<T>, UnboundedReceiver<T>)
where
    T: Send + 'static,
{
    Relay::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_relay_basic_functionality() {
        let (relay, mut receiver) = Relay::new();

        relay.send("config_changed".to_string());

        assert_eq!(receiver.next().await, Some("config_changed".to_string()));
    }

    #[tokio::test]
    async fn test_relay_try_send() {
        let (relay, mut receiver) = Relay::new();

        assert!(relay.try_send(1u32).is_ok());
        assert_eq!(receiver.next().await, Some(1));

        drop(receiver);

        assert_eq!(relay.try_send(2), Err(RelayError::ChannelClosed));
        assert!(!relay.is_connected());
    }

    #[tokio::test]
    async fn test_cloned_relays_share_one_stream() {
        let (first, mut stream) = relay::<u32>();
        let second = first.clone();

        first.send(1);
        second.send(2);

        assert_eq!(stream.next().await, Some(1));
        assert_eq!(stream.next().await, Some(2));
    }

    #[test]
    fn test_default_relay_is_disconnected() {
        let relay = Relay::<u32>::default();
        assert!(!relay.is_connected());
        relay.send(5);
    }
}
