//! # Push Hub
//!
//! Channel-path based fan-out of [`PushEvent`]s.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            PUSH HUB                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Database mutation ──► publish(event) ──► channels[event.channel]       │
//! │                                                │                        │
//! │                                  broadcast::Sender<PushEvent>           │
//! │                                   │            │            │           │
//! │                                   ▼            ▼            ▼           │
//! │                             Subscription Subscription Subscription      │
//! │                                                                         │
//! │  A channel entry lives while it has at least one subscriber.           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

use super::events::PushEvent;
use crate::error::{Error, Result};

/// Default buffer per channel before slow subscribers start lagging
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Source of push subscriptions
///
/// Implemented by [`PushHub`]; tests and other transports can provide
/// their own.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Subscribe to every event published on `channel_path`
    async fn subscribe(&self, channel_path: &str) -> Result<Subscription>;
}

/// Item yielded by [`Subscription::recv`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// An event for this channel
    Event(PushEvent),
    /// The subscriber fell behind and this many events were dropped
    Lagged(u64),
}

type UnsubscribeFn = Box<dyn FnOnce() + Send + Sync>;

/// A live subscription to one channel path
///
/// Dropping it unsubscribes. `unsubscribe` may be called any number of
/// times.
pub struct Subscription {
    channel_path: String,
    receiver: Option<broadcast::Receiver<PushEvent>>,
    on_unsubscribe: Option<UnsubscribeFn>,
}

impl Subscription {
    /// Wrap a broadcast receiver with an unsubscribe hook
    pub fn new(
        channel_path: impl Into<String>,
        receiver: broadcast::Receiver<PushEvent>,
        on_unsubscribe: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            channel_path: channel_path.into(),
            receiver: Some(receiver),
            on_unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    /// The subscribed channel path
    pub fn channel_path(&self) -> &str {
        &self.channel_path
    }

    /// Whether `unsubscribe` has not been called yet
    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Wait for the next event
    ///
    /// Returns `None` once unsubscribed or when the channel closes.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        let receiver = self.receiver.as_mut()?;

        match receiver.recv().await {
            Ok(event) => Some(SubscriptionEvent::Event(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(SubscriptionEvent::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Stop receiving events (idempotent)
    pub fn unsubscribe(&mut self) {
        self.receiver = None;
        if let Some(hook) = self.on_unsubscribe.take() {
            hook();
            tracing::debug!(channel = %self.channel_path, "Unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel_path", &self.channel_path)
            .field("active", &self.is_active())
            .finish()
    }
}

struct ChannelState {
    sender: broadcast::Sender<PushEvent>,
    subscribers: usize,
}

struct HubInner {
    channels: RwLock<HashMap<String, ChannelState>>,
    capacity: usize,
}

impl HubInner {
    fn release(&self, channel_path: &str) {
        let mut channels = self.channels.write();
        if let Some(state) = channels.get_mut(channel_path) {
            state.subscribers = state.subscribers.saturating_sub(1);
            if state.subscribers == 0 {
                channels.remove(channel_path);
            }
        }
    }
}

/// In-process push channel backed by `tokio::sync::broadcast`
#[derive(Clone)]
pub struct PushHub {
    inner: Arc<HubInner>,
}

impl PushHub {
    /// Create a hub with the default per-channel capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a hub with a custom per-channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Publish an event on its channel
    ///
    /// Returns how many subscribers received it. Publishing to a channel
    /// with no subscribers is not an error.
    pub fn publish(&self, event: PushEvent) -> usize {
        let channels = self.inner.channels.read();
        let Some(state) = channels.get(&event.channel) else {
            tracing::trace!(channel = %event.channel, "No subscribers for event");
            return 0;
        };

        let kind = event.kind.as_str();
        let delivered = state.sender.send(event).unwrap_or(0);
        tracing::trace!(kind, delivered, "Published push event");
        delivered
    }

    /// Number of live subscriptions on a channel
    pub fn subscriber_count(&self, channel_path: &str) -> usize {
        self.inner
            .channels
            .read()
            .get(channel_path)
            .map(|state| state.subscribers)
            .unwrap_or(0)
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushChannel for PushHub {
    async fn subscribe(&self, channel_path: &str) -> Result<Subscription> {
        if channel_path.is_empty() {
            return Err(Error::SubscriptionFailed("empty channel path".into()));
        }

        let receiver = {
            let mut channels = self.inner.channels.write();
            let state = channels
                .entry(channel_path.to_string())
                .or_insert_with(|| ChannelState {
                    sender: broadcast::channel(self.inner.capacity).0,
                    subscribers: 0,
                });
            state.subscribers += 1;
            state.sender.subscribe()
        };

        let hub: Weak<HubInner> = Arc::downgrade(&self.inner);
        let path = channel_path.to_string();

        tracing::debug!(channel = channel_path, "Subscribed");

        Ok(Subscription::new(channel_path, receiver, move || {
            if let Some(inner) = hub.upgrade() {
                inner.release(&path);
            }
        }))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::PushEventKind;

    fn event(channel: &str, item: &str) -> PushEvent {
        PushEvent::new(PushEventKind::Create, channel, "scope", item)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let hub = PushHub::new();
        let mut sub = hub.subscribe("conversations/c1/messages").await.unwrap();

        assert_eq!(hub.publish(event("conversations/c1/messages", "m1")), 1);

        match sub.recv().await {
            Some(SubscriptionEvent::Event(e)) => assert_eq!(e.item_id(), "m1"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let hub = PushHub::new();
        let _a = hub.subscribe("a").await.unwrap();

        assert_eq!(hub.publish(event("b", "m1")), 0);
        assert_eq!(hub.publish(event("a", "m2")), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = PushHub::new();
        let mut sub = hub.subscribe("a").await.unwrap();
        let _other = hub.subscribe("a").await.unwrap();
        assert_eq!(hub.subscriber_count("a"), 2);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(hub.subscriber_count("a"), 1);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = PushHub::new();
        {
            let _sub = hub.subscribe("a").await.unwrap();
            assert_eq!(hub.subscriber_count("a"), 1);
        }
        assert_eq!(hub.subscriber_count("a"), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_is_reported() {
        let hub = PushHub::with_capacity(2);
        let mut sub = hub.subscribe("a").await.unwrap();

        for i in 0..5 {
            hub.publish(event("a", &format!("m{}", i)));
        }

        assert!(matches!(sub.recv().await, Some(SubscriptionEvent::Lagged(3))));
    }

    #[tokio::test]
    async fn test_empty_path_rejected() {
        let hub = PushHub::new();
        assert!(matches!(
            hub.subscribe("").await,
            Err(Error::SubscriptionFailed(_))
        ));
    }
}
