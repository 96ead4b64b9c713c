//! # Notifications Module
//!
//! Plain-text notifications in two disjoint namespaces. Each namespace has
//! its own push channel and is reconciled by its own feed, so the personal
//! and community unread counters never mix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::feed::FeedItem;
use crate::storage::Database;

/// Which notification bucket an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationNamespace {
    /// Direct activity on the user's own content
    Personal,
    /// Activity in communities the user belongs to
    Community,
}

impl NotificationNamespace {
    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Community => "community",
        }
    }
}

impl fmt::Display for NotificationNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationNamespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "personal" => Ok(Self::Personal),
            "community" => Ok(Self::Community),
            other => Err(Error::SerializationError(format!(
                "Unknown notification namespace: {}",
                other
            ))),
        }
    }
}

/// A notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique ID, assigned by storage
    pub id: String,
    /// Bucket
    pub namespace: NotificationNamespace,
    /// Who it is for
    pub receiver_id: String,
    /// Who caused it
    pub sender_id: String,
    /// The entity it refers to
    pub resource_id: String,
    /// Display text
    pub message: String,
    /// Read flag (monotonic)
    pub is_read: bool,
    /// Unix timestamp (milliseconds)
    pub created_at: i64,
}

impl FeedItem for Notification {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn is_read(&self) -> bool {
        self.is_read
    }

    fn set_read(&mut self) {
        self.is_read = true;
    }
}

/// Creates and bulk-updates notifications
pub struct NotificationService {
    database: Arc<Database>,
}

impl NotificationService {
    /// Create a new notification service
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Record a notification for `receiver_id`
    pub fn notify(
        &self,
        namespace: NotificationNamespace,
        receiver_id: &str,
        sender_id: &str,
        resource_id: &str,
        text: &str,
    ) -> Result<Notification> {
        if receiver_id.is_empty() {
            return Err(Error::InvalidMessageContent("Notification has no receiver".into()));
        }
        if text.trim().is_empty() {
            return Err(Error::InvalidMessageContent("Notification text is empty".into()));
        }

        let notification =
            self.database
                .insert_notification(namespace, receiver_id, sender_id, resource_id, text)?;

        tracing::debug!(
            namespace = namespace.as_str(),
            receiver = receiver_id,
            id = %notification.id,
            "Notification created"
        );
        Ok(notification)
    }

    /// Mark every notification in one bucket read; returns how many changed
    pub fn mark_all_read(&self, namespace: NotificationNamespace, receiver_id: &str) -> Result<usize> {
        self.database.mark_all_notifications_read(namespace, receiver_id)
    }

    /// Remove a notification
    pub fn dismiss(&self, notification_id: &str) -> Result<bool> {
        self.database.delete_notification(notification_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_parse() {
        assert_eq!(
            "community".parse::<NotificationNamespace>().unwrap(),
            NotificationNamespace::Community
        );
        assert!("group".parse::<NotificationNamespace>().is_err());
        assert_eq!(NotificationNamespace::Personal.to_string(), "personal");
    }

    #[tokio::test]
    async fn test_mark_all_read_is_per_namespace() {
        let db = Arc::new(Database::open(None).await.unwrap());
        let svc = NotificationService::new(db.clone());

        svc.notify(NotificationNamespace::Personal, "u1", "u2", "post-1", "liked your post")
            .unwrap();
        svc.notify(NotificationNamespace::Personal, "u1", "u3", "post-1", "commented")
            .unwrap();
        svc.notify(NotificationNamespace::Community, "u1", "u2", "club-1", "new event")
            .unwrap();

        assert_eq!(svc.mark_all_read(NotificationNamespace::Personal, "u1").unwrap(), 2);
        assert_eq!(svc.mark_all_read(NotificationNamespace::Personal, "u1").unwrap(), 0);

        let community = db
            .fetch_notification_page(NotificationNamespace::Community, "u1", None, 10)
            .unwrap();
        assert!(!community.items[0].is_read);
    }

    #[tokio::test]
    async fn test_notify_rejects_blank_text() {
        let db = Arc::new(Database::open(None).await.unwrap());
        let svc = NotificationService::new(db);

        assert!(matches!(
            svc.notify(NotificationNamespace::Personal, "u1", "u2", "r", "   "),
            Err(Error::InvalidMessageContent(_))
        ));
    }
}
