//! In-process frame bus.
//!
//! [`FrameBus`] carries raw topic-framed messages between tasks of the same
//! process using a [`tokio::sync::broadcast`] channel, so every subscriber
//! receives every frame without any single subscriber blocking the others.
//! [`BusSubscriber`] filters by topic prefix exactly like a SUB socket and
//! plugs into the multiplexer as an ordinary [`Subscriber`].

use std::sync::Arc;

use async_trait::async_trait;
use tiltbridge_types::BridgeError;
use tokio::sync::broadcast;
use tracing::warn;

use crate::transport::Subscriber;

/// Default channel capacity (number of buffered frames before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 64;

/// Shared frame bus. Clone it cheaply – all clones share the same underlying
/// broadcast channel.  The bus closes when the last clone is dropped.
#[derive(Clone, Debug)]
pub struct FrameBus {
    sender: broadcast::Sender<Arc<[u8]>>,
}

impl FrameBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a complete frame (topic, separator, payload).
    ///
    /// Returns the number of subscribers handed the frame.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Transport`] when nobody is subscribed.
    pub fn publish(&self, frame: impl Into<Arc<[u8]>>) -> Result<usize, BridgeError> {
        self.sender
            .send(frame.into())
            .map_err(|_| BridgeError::Transport("no subscribers on frame bus".to_string()))
    }

    /// Subscribe to frames whose bytes start with `topic`.
    pub fn subscribe(&self, topic: impl Into<String>) -> BusSubscriber {
        BusSubscriber {
            topic: topic.into(),
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A subscriber that only delivers frames starting with its topic.
pub struct BusSubscriber {
    topic: String,
    receiver: broadcast::Receiver<Arc<[u8]>>,
}

#[async_trait]
impl Subscriber for BusSubscriber {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
        loop {
            match self.receiver.recv().await {
                Ok(frame) if frame.starts_with(self.topic.as_bytes()) => {
                    return Ok(Some(frame.to_vec()));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Older frames are gone; the newest ones are still queued.
                    warn!(topic = %self.topic, lagged_by = n, "bus subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_filters_by_topic() -> Result<(), Box<dyn std::error::Error>> {
        let bus = FrameBus::default();
        let mut sub = bus.subscribe("platform");

        bus.publish(&b"driver_input {}"[..])?;
        bus.publish(&b"platform {\"platform_status\": true}"[..])?;

        let frame = sub.receive().await?.ok_or("bus closed")?;
        assert_eq!(frame, b"platform {\"platform_status\": true}");
        Ok(())
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_frame() -> Result<(), Box<dyn std::error::Error>> {
        let bus = FrameBus::default();
        let mut a = bus.subscribe("driver_input");
        let mut b = bus.subscribe("driver_input");

        assert_eq!(bus.publish(&b"driver_input {}"[..])?, 2);
        assert!(a.receive().await?.is_some());
        assert!(b.receive().await?.is_some());
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_an_error() {
        let bus = FrameBus::default();
        assert!(matches!(
            bus.publish(&b"platform {}"[..]),
            Err(BridgeError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn dropping_the_bus_closes_subscribers() {
        let bus = FrameBus::default();
        let mut sub = bus.subscribe("platform");
        drop(bus);
        assert!(matches!(sub.receive().await, Ok(None)));
    }

    #[tokio::test]
    async fn lagging_subscriber_keeps_newest_frames() {
        let bus = FrameBus::new(4);
        let mut sub = bus.subscribe("driver_input");
        for i in 0..100 {
            let _ = bus.publish(format!("driver_input {i}").into_bytes());
        }
        let frame = sub.receive().await.unwrap().unwrap();
        assert_eq!(frame, b"driver_input 96");
    }
}
