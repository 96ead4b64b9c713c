//! # Xongroh Core
//!
//! Encrypted direct messages and live, paginated feeds for the Xongroh
//! creator community.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        XONGROH CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌───────────────┐  ┌───────────────────────────────┐  │
//! │  │   Crypto    │  │   Messaging   │  │         Notifications         │  │
//! │  │             │  │               │  │                               │  │
//! │  │ - AES-GCM   │◄─│ - Send/Render │  │ - Personal / Community        │  │
//! │  │ - Key import│  │ - Soft delete │  │ - Mark all read               │  │
//! │  └─────────────┘  └───────┬───────┘  └───────────────┬───────────────┘  │
//! │                           │                          │                  │
//! │                           ▼                          ▼                  │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Storage (SQLite)  ──── mutations ────►  Realtime (PushHub)     │   │
//! │  └───────────────┬───────────────────────────────────┬─────────────┘   │
//! │                  │ fetch_page / mark_read            │ subscribe       │
//! │                  ▼                                   ▼                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Feed (LiveFeed): pages + push events → items, unread count     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Startup configuration
//! - [`crypto`] - Message cipher and key handling
//! - [`messaging`] - Conversations and encrypted messages
//! - [`notifications`] - Personal and community notifications
//! - [`storage`] - SQLite persistence with keyset pagination
//! - [`realtime`] - Push events and subscriptions
//! - [`feed`] - Live feed reconciler
//!
//! Nothing here is global: the key, database and hub live in an
//! [`XongrohCore`] value that callers pass around.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod error;
pub mod feed;
pub mod messaging;
pub mod notifications;
pub mod realtime;
pub mod storage;
/// Millisecond timestamp helpers.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::CoreConfig;
pub use crypto::{decrypt_message, encrypt_message, DisplayContent, MessageCipher, MessageKey};
pub use error::{Error, Result};
pub use feed::{FeedConfig, FeedItem, FeedSnapshot, FeedState, LiveFeed, MarkReadOutcome, Scope};
pub use messaging::{Conversation, Message, MessagingService};
pub use notifications::{Notification, NotificationNamespace, NotificationService};
pub use realtime::{PushChannel, PushEvent, PushEventKind, PushHub};
pub use storage::Database;

// ============================================================================
// CORE INSTANCE
// ============================================================================

use std::sync::Arc;

/// Wires the cipher, storage, push hub and services together
///
/// ## Lifecycle
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                       XONGROH CORE LIFECYCLE                            │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │  1. initialize(config)                                                  │
/// │     ├──► validate config                                               │
/// │     ├──► import message key      (bad key fails startup)               │
/// │     ├──► create PushHub                                                │
/// │     └──► open Database           (attached to the hub)                 │
/// │                                                                         │
/// │  2. Operate                                                             │
/// │     ├──► messaging().send_text(..)                                     │
/// │     ├──► notifications().notify(..)                                    │
/// │     └──► conversation_feed(viewer).start(scope)                        │
/// │                                                                         │
/// │  3. Drop                                                                │
/// │     └──► feeds tear down, subscriptions release                        │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Clone)]
pub struct XongrohCore {
    config: CoreConfig,
    cipher: MessageCipher,
    hub: PushHub,
    database: Arc<Database>,
    messaging: Arc<MessagingService>,
    notifications: Arc<NotificationService>,
}

impl XongrohCore {
    /// Initialize the core with the given configuration
    ///
    /// ## Example
    ///
    /// ```ignore
    /// use xongroh_core::{CoreConfig, XongrohCore};
    ///
    /// let core = XongrohCore::initialize(CoreConfig::from_env()?).await?;
    /// ```
    pub async fn initialize(config: CoreConfig) -> Result<Self> {
        tracing::info!("Initializing Xongroh Core v{}", version());

        config.validate()?;
        let cipher = MessageCipher::from_base64(&config.message_key)?;

        let hub = PushHub::new();
        let database = Arc::new(
            Database::open(config.database_path.as_deref())
                .await?
                .with_push_hub(hub.clone()),
        );

        let messaging = Arc::new(MessagingService::new(cipher.clone(), database.clone()));
        let notifications = Arc::new(NotificationService::new(database.clone()));

        tracing::info!(
            page_size = config.page_size,
            persistent = config.database_path.is_some(),
            "Xongroh Core initialized"
        );

        Ok(Self {
            config,
            cipher,
            hub,
            database,
            messaging,
            notifications,
        })
    }

    /// The validated configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The shared message cipher
    pub fn cipher(&self) -> &MessageCipher {
        &self.cipher
    }

    /// The push hub every mutation is published on
    pub fn push_hub(&self) -> &PushHub {
        &self.hub
    }

    /// The database
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// The messaging service
    pub fn messaging(&self) -> &MessagingService {
        &self.messaging
    }

    /// The notification service
    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    /// An idle message feed for `viewer_id`
    pub fn conversation_feed(&self, viewer_id: &str) -> LiveFeed<Message> {
        LiveFeed::new(
            self.database.clone(),
            Arc::new(self.hub.clone()),
            viewer_id,
            self.config.feed_config(),
        )
    }

    /// An idle notification feed for `viewer_id`
    pub fn notification_feed(&self, viewer_id: &str) -> LiveFeed<Notification> {
        LiveFeed::new(
            self.database.clone(),
            Arc::new(self.hub.clone()),
            viewer_id,
            self.config.feed_config(),
        )
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Xongroh Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_rejects_short_key() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let config = CoreConfig::new(STANDARD.encode([7u8; 16]));
        let result = XongrohCore::initialize(config).await;

        assert!(matches!(result, Err(Error::InvalidKeyLength(16))));
    }

    #[tokio::test]
    async fn test_initialize_rejects_missing_key() {
        let result = XongrohCore::initialize(CoreConfig::new("")).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_feeds_share_the_core_hub() {
        let core = XongrohCore::initialize(CoreConfig::new(MessageKey::generate().to_base64()))
            .await
            .unwrap();
        let conv = core
            .messaging()
            .get_or_create_conversation("alice", "bob")
            .unwrap();

        let feed = core.conversation_feed("bob");
        feed.start(Scope::Conversation(conv.id.clone())).await.unwrap();

        assert_eq!(
            core.push_hub()
                .subscriber_count(&feed::conversation_channel(&conv.id)),
            1
        );
        assert_eq!(feed.current_state(), FeedState::Synced);
    }
}
