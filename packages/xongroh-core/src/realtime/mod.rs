//! # Realtime Module
//!
//! Push notifications for create/update/delete changes, scoped by channel
//! path. Stands in for the hosted backend's realtime fan-out and is the
//! event source feeds subscribe to.

mod events;
mod hub;

pub use events::{PushEvent, PushEventKind, PushPayload};
pub use hub::{PushChannel, PushHub, Subscription, SubscriptionEvent, DEFAULT_CHANNEL_CAPACITY};
