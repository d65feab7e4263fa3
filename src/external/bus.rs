//! Message bus contract and an in-process implementation
//!
//! The relay consumes control messages from one binding key and publishes
//! events to per-reply destinations. The broker transport itself is not
//! part of the relay; [`ChannelBus`] wires everything through tokio
//! channels for tests and single-process deployments.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::Result;

pub trait MessageBus: Send + Sync {
    /// Send `message` to whoever listens on `destination`
    fn publish(&self, destination: &str, message: String) -> Result<()>;

    /// Start receiving messages addressed to `binding_key`
    fn subscribe(&self, binding_key: &str) -> Result<mpsc::UnboundedReceiver<String>>;
}

/// Bus backed by unbounded tokio channels
#[derive(Debug, Default)]
pub struct ChannelBus {
    routes: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
}

impl ChannelBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live receivers bound to `destination`
    pub fn listeners(&self, destination: &str) -> usize {
        self.routes
            .lock()
            .get(destination)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl MessageBus for ChannelBus {
    fn publish(&self, destination: &str, message: String) -> Result<()> {
        let mut routes = self.routes.lock();
        let Some(senders) = routes.get_mut(destination) else {
            tracing::debug!(destination = %destination, "No listener for message, dropping");
            return Ok(());
        };

        senders.retain(|sender| sender.send(message.clone()).is_ok());
        if senders.is_empty() {
            routes.remove(destination);
            tracing::debug!(destination = %destination, "Last listener gone, dropping");
        }
        Ok(())
    }

    fn subscribe(&self, binding_key: &str) -> Result<mpsc::UnboundedReceiver<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .entry(binding_key.to_string())
            .or_default()
            .push(tx);
        tracing::debug!(binding_key = %binding_key, "Bus subscription added");
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = ChannelBus::new();
        let mut a = bus.subscribe("q1").unwrap();
        let mut b = bus.subscribe("q1").unwrap();

        bus.publish("q1", "hello".into()).unwrap();

        assert_eq!(a.recv().await.unwrap(), "hello");
        assert_eq!(b.recv().await.unwrap(), "hello");
    }

    #[test]
    fn test_publish_without_listener_is_dropped() {
        let bus = ChannelBus::new();
        assert!(bus.publish("nobody", "x".into()).is_ok());
        assert_eq!(bus.listeners("nobody"), 0);
    }

    #[test]
    fn test_closed_receiver_is_pruned() {
        let bus = ChannelBus::new();
        let rx = bus.subscribe("q1").unwrap();
        let _keep = bus.subscribe("q1").unwrap();
        drop(rx);

        bus.publish("q1", "x".into()).unwrap();
        assert_eq!(bus.listeners("q1"), 1);
    }

    #[test]
    fn test_destinations_are_isolated() {
        let bus = ChannelBus::new();
        let mut q1 = bus.subscribe("q1").unwrap();
        let mut q2 = bus.subscribe("q2").unwrap();

        bus.publish("q2", "only-q2".into()).unwrap();

        assert!(q1.try_recv().is_err());
        assert_eq!(q2.try_recv().unwrap(), "only-q2");
    }
}
