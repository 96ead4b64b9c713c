//! # Database
//!
//! SQLite database wrapper with keyset pagination and push fan-out.
//!
//! ## Database Operations
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │    Services     │  MessagingService / NotificationService / feeds   │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐        ┌─────────────────┐                        │
//! │  │    Database     │──────► │     PushHub     │  create/update/delete  │
//! │  │   (this file)   │        └─────────────────┘  per channel path      │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │   SQLite DB     │  - In-memory for tests                            │
//! │  │                 │  - File for production                            │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Pages are ordered by `(created_at DESC, id DESC)` and keyed by a
//! [`Cursor`], so rows inserted after a page was read never shift the next
//! page. Timestamps handed out by one `Database` are strictly increasing.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::schema;
use crate::error::{Error, Result};
use crate::feed::{conversation_channel, notification_channel, Cursor, FeedItem, Page};
use crate::messaging::{Conversation, Message};
use crate::notifications::{Notification, NotificationNamespace};
use crate::realtime::{PushEvent, PushEventKind, PushHub};

/// The main database handle
pub struct Database {
    /// The underlying SQLite connection
    conn: Mutex<Connection>,
    /// Where mutations are announced
    hub: Option<PushHub>,
    /// Last timestamp handed out
    clock: Mutex<i64>,
}

impl Database {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub async fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let db = Self {
            conn: Mutex::new(conn),
            hub: None,
            clock: Mutex::new(0),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Announce every mutation on `hub`
    pub fn with_push_hub(mut self, hub: PushHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// The attached push hub, if any
    pub fn push_hub(&self) -> Option<&PushHub> {
        self.hub.as_ref()
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| Error::DatabaseError(format!("Failed to enable foreign keys: {}", e)))?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;

                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {}", e)))?;

                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(format!(
                    "Database schema version {} is newer than supported {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Database schema version: {}", v);
            }
        }

        Ok(())
    }

    /// Current schema version stored in the database
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.conn.lock();
        let version = conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })?;
        Ok(version)
    }

    fn next_timestamp(&self) -> i64 {
        let mut last = self.clock.lock();
        *last = crate::time::now_timestamp_millis().max(*last + 1);
        *last
    }

    fn publish(&self, kind: PushEventKind, channel: String, scope_id: &str, item_id: &str) {
        if let Some(hub) = &self.hub {
            hub.publish(PushEvent::new(kind, channel, scope_id, item_id));
        }
    }

    // ========================================================================
    // CONVERSATION OPERATIONS
    // ========================================================================

    /// Insert a conversation unless its participant pair already has one
    ///
    /// Returns the stored conversation either way.
    pub fn upsert_conversation(&self, conversation: &Conversation) -> Result<Conversation> {
        {
            let conn = self.conn.lock();
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO conversations
                     (id, participants_key, participant_a, participant_b, created_at)
                     VALUES (?, ?, ?, ?, ?)",
                    params![
                        conversation.id,
                        conversation.participants_key,
                        conversation.participants[0],
                        conversation.participants[1],
                        conversation.created_at,
                    ],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to create conversation: {}", e)))?;

            if inserted > 0 {
                tracing::info!(conversation = %conversation.id, "Created conversation");
            }
        }

        self.get_conversation(&conversation.id)?.ok_or_else(|| {
            Error::Internal(format!("conversation {} vanished after insert", conversation.id))
        })
    }

    /// Get a conversation by ID
    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn.lock();
        let conversation = conn
            .query_row(
                "SELECT id, participants_key, participant_a, participant_b,
                        last_message_id, last_message_at, created_at
                 FROM conversations WHERE id = ?",
                params![id],
                conversation_from_row,
            )
            .optional()?;
        Ok(conversation)
    }

    /// Conversations `user_id` takes part in, most recently active first
    pub fn get_conversations_for(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, participants_key, participant_a, participant_b,
                        last_message_id, last_message_at, created_at
                 FROM conversations
                 WHERE participant_a = ?1 OR participant_b = ?1
                 ORDER BY COALESCE(last_message_at, created_at) DESC, id DESC",
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt.query_map(params![user_id], conversation_from_row)?;
        let conversations = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conversations)
    }

    // ========================================================================
    // MESSAGE OPERATIONS
    // ========================================================================

    /// Store a message and move the conversation's preview pointer
    ///
    /// Assigns the id and timestamp, then publishes `create`.
    pub fn insert_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            is_read: false,
            deleted_for: BTreeSet::new(),
            created_at: self.next_timestamp(),
        };

        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;

            let updated = tx.execute(
                "UPDATE conversations SET last_message_id = ?, last_message_at = ? WHERE id = ?",
                params![message.id, message.created_at, conversation_id],
            )?;
            if updated == 0 {
                return Err(Error::NotFound(format!("conversation {}", conversation_id)));
            }

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, is_read, created_at)
                 VALUES (?, ?, ?, ?, ?, 0, ?)",
                params![
                    message.id,
                    message.conversation_id,
                    message.sender_id,
                    message.receiver_id,
                    message.content,
                    message.created_at,
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to store message: {}", e)))?;

            tx.commit()?;
        }

        self.publish(
            PushEventKind::Create,
            conversation_channel(conversation_id),
            conversation_id,
            &message.id,
        );
        Ok(message)
    }

    /// Get a single message by ID
    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.conn.lock();
        let message = conn
            .query_row(
                "SELECT id, conversation_id, sender_id, receiver_id, content, is_read, created_at
                 FROM messages WHERE id = ?",
                params![id],
                message_from_row,
            )
            .optional()?;

        match message {
            Some(mut message) => {
                message.deleted_for = load_deletions(&conn, &message.id)?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// One page of a conversation as seen by `viewer_id`
    ///
    /// Messages the viewer soft-deleted are skipped.
    pub fn fetch_message_page(
        &self,
        conversation_id: &str,
        viewer_id: &str,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<Page<Message>> {
        let limit = limit.max(1);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT m.id, m.conversation_id, m.sender_id, m.receiver_id, m.content, m.is_read, m.created_at
                 FROM messages m
                 WHERE m.conversation_id = ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_deletions d
                       WHERE d.message_id = m.id AND d.participant_id = ?2
                   )
                   AND (?3 IS NULL OR m.created_at < ?3 OR (m.created_at = ?3 AND m.id < ?4))
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?5",
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(
                params![
                    conversation_id,
                    viewer_id,
                    cursor.map(|c| c.created_at),
                    cursor.map(|c| c.id.as_str()),
                    (limit + 1) as i64,
                ],
                message_from_row,
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to query messages: {}", e)))?;

        let mut messages = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        for message in &mut messages {
            message.deleted_for = load_deletions(&conn, &message.id)?;
        }

        Ok(into_page(messages, limit))
    }

    /// Set `is_read` on behalf of `reader_id`; returns whether it changed
    ///
    /// Only the receiver may mark a message read. Marking an already-read
    /// message succeeds without publishing.
    pub fn mark_message_read(&self, id: &str, reader_id: &str) -> Result<bool> {
        let (conversation_id, changed) = {
            let conn = self.conn.lock();
            let (conversation_id, receiver_id): (String, String) = conn
                .query_row(
                    "SELECT conversation_id, receiver_id FROM messages WHERE id = ?",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("message {}", id)))?;

            if receiver_id != reader_id {
                return Err(Error::NotRecipient(format!(
                    "{} cannot mark message {} read",
                    reader_id, id
                )));
            }

            let changed = conn.execute(
                "UPDATE messages SET is_read = 1 WHERE id = ? AND is_read = 0",
                params![id],
            )?;
            (conversation_id, changed > 0)
        };

        if changed {
            tracing::debug!(message_id = id, "Message marked read");
            self.publish(
                PushEventKind::Update,
                conversation_channel(&conversation_id),
                &conversation_id,
                id,
            );
        }
        Ok(changed)
    }

    /// Hide a message from one participant; returns whether it changed
    pub fn soft_delete_message(&self, id: &str, participant_id: &str) -> Result<bool> {
        let message = self
            .get_message(id)?
            .ok_or_else(|| Error::NotFound(format!("message {}", id)))?;

        if message.sender_id != participant_id && message.receiver_id != participant_id {
            return Err(Error::NotParticipant(format!(
                "{} cannot delete message {}",
                participant_id, id
            )));
        }

        let changed = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT OR IGNORE INTO message_deletions (message_id, participant_id, deleted_at)
                 VALUES (?, ?, ?)",
                params![id, participant_id, crate::time::now_timestamp_millis()],
            )? > 0
        };

        if changed {
            tracing::debug!(message_id = id, participant = participant_id, "Message soft-deleted");
            self.publish(
                PushEventKind::Update,
                conversation_channel(&message.conversation_id),
                &message.conversation_id,
                id,
            );
        }
        Ok(changed)
    }

    // ========================================================================
    // NOTIFICATION OPERATIONS
    // ========================================================================

    /// Store a notification and publish `create` on its bucket's channel
    pub fn insert_notification(
        &self,
        namespace: NotificationNamespace,
        receiver_id: &str,
        sender_id: &str,
        resource_id: &str,
        message: &str,
    ) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            namespace,
            receiver_id: receiver_id.to_string(),
            sender_id: sender_id.to_string(),
            resource_id: resource_id.to_string(),
            message: message.to_string(),
            is_read: false,
            created_at: self.next_timestamp(),
        };

        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO notifications
                 (id, namespace, receiver_id, sender_id, resource_id, message, is_read, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
                params![
                    notification.id,
                    namespace.as_str(),
                    notification.receiver_id,
                    notification.sender_id,
                    notification.resource_id,
                    notification.message,
                    notification.created_at,
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to store notification: {}", e)))?;
        }

        self.publish(
            PushEventKind::Create,
            notification_channel(namespace, receiver_id),
            receiver_id,
            &notification.id,
        );
        Ok(notification)
    }

    /// Get a single notification by ID
    pub fn get_notification(&self, id: &str) -> Result<Option<Notification>> {
        let conn = self.conn.lock();
        let notification = conn
            .query_row(
                "SELECT id, namespace, receiver_id, sender_id, resource_id, message, is_read, created_at
                 FROM notifications WHERE id = ?",
                params![id],
                notification_from_row,
            )
            .optional()?;
        Ok(notification)
    }

    /// One page of a receiver's notifications in one bucket
    pub fn fetch_notification_page(
        &self,
        namespace: NotificationNamespace,
        receiver_id: &str,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<Page<Notification>> {
        let limit = limit.max(1);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, namespace, receiver_id, sender_id, resource_id, message, is_read, created_at
                 FROM notifications
                 WHERE namespace = ?1 AND receiver_id = ?2
                   AND (?3 IS NULL OR created_at < ?3 OR (created_at = ?3 AND id < ?4))
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?5",
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(
                params![
                    namespace.as_str(),
                    receiver_id,
                    cursor.map(|c| c.created_at),
                    cursor.map(|c| c.id.as_str()),
                    (limit + 1) as i64,
                ],
                notification_from_row,
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to query notifications: {}", e)))?;

        let notifications = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(into_page(notifications, limit))
    }

    /// Set `is_read` on behalf of `reader_id`; returns whether it changed
    pub fn mark_notification_read(&self, id: &str, reader_id: &str) -> Result<bool> {
        let (namespace, receiver_id, changed) = {
            let conn = self.conn.lock();
            let (namespace, receiver_id): (String, String) = conn
                .query_row(
                    "SELECT namespace, receiver_id FROM notifications WHERE id = ?",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("notification {}", id)))?;

            if receiver_id != reader_id {
                return Err(Error::NotRecipient(format!(
                    "{} cannot mark notification {} read",
                    reader_id, id
                )));
            }

            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ? AND is_read = 0",
                params![id],
            )?;
            (namespace.parse::<NotificationNamespace>()?, receiver_id, changed > 0)
        };

        if changed {
            self.publish(
                PushEventKind::Update,
                notification_channel(namespace, &receiver_id),
                &receiver_id,
                id,
            );
        }
        Ok(changed)
    }

    /// Mark a whole bucket read; returns how many changed
    pub fn mark_all_notifications_read(
        &self,
        namespace: NotificationNamespace,
        receiver_id: &str,
    ) -> Result<usize> {
        let ids = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let ids = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM notifications
                     WHERE namespace = ? AND receiver_id = ? AND is_read = 0",
                )?;
                let rows = stmt.query_map(params![namespace.as_str(), receiver_id], |row| {
                    row.get::<_, String>(0)
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            tx.execute(
                "UPDATE notifications SET is_read = 1
                 WHERE namespace = ? AND receiver_id = ? AND is_read = 0",
                params![namespace.as_str(), receiver_id],
            )?;
            tx.commit()?;
            ids
        };

        let channel = notification_channel(namespace, receiver_id);
        for id in &ids {
            self.publish(PushEventKind::Update, channel.clone(), receiver_id, id);
        }

        tracing::debug!(
            namespace = namespace.as_str(),
            receiver = receiver_id,
            count = ids.len(),
            "Notifications marked read"
        );
        Ok(ids.len())
    }

    /// Delete a notification; returns whether it existed
    pub fn delete_notification(&self, id: &str) -> Result<bool> {
        let Some(notification) = self.get_notification(id)? else {
            return Ok(false);
        };

        {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM notifications WHERE id = ?", params![id])?;
        }

        self.publish(
            PushEventKind::Delete,
            notification_channel(notification.namespace, &notification.receiver_id),
            &notification.receiver_id,
            id,
        );
        Ok(true)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        participants_key: row.get(1)?,
        participants: [row.get(2)?, row.get(3)?],
        last_message_id: row.get(4)?,
        last_message_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        is_read: row.get(5)?,
        deleted_for: BTreeSet::new(),
        created_at: row.get(6)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let namespace: String = row.get(1)?;
    let namespace = namespace.parse::<NotificationNamespace>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Notification {
        id: row.get(0)?,
        namespace,
        receiver_id: row.get(2)?,
        sender_id: row.get(3)?,
        resource_id: row.get(4)?,
        message: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn load_deletions(conn: &Connection, message_id: &str) -> Result<BTreeSet<String>> {
    let mut stmt =
        conn.prepare_cached("SELECT participant_id FROM message_deletions WHERE message_id = ?")?;
    let rows = stmt.query_map(params![message_id], |row| row.get::<_, String>(0))?;
    let deleted_for = rows.collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(deleted_for)
}

/// Trim a `limit + 1` result to a page, deriving the next cursor
fn into_page<T: FeedItem>(mut items: Vec<T>, limit: usize) -> Page<T> {
    let has_more = items.len() > limit;
    items.truncate(limit);
    let next_cursor = if has_more {
        items.last().map(|item| item.cursor())
    } else {
        None
    };
    Page { items, next_cursor }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::{PushChannel, SubscriptionEvent};

    async fn db_with_conversation() -> (Database, Conversation) {
        let db = Database::open(None).await.unwrap();
        let conv = db.upsert_conversation(&Conversation::new("alice", "bob")).unwrap();
        (db, conv)
    }

    fn ids<T: FeedItem>(page: &Page<T>) -> Vec<String> {
        page.items.iter().map(|i| i.id().to_string()).collect()
    }

    #[tokio::test]
    async fn test_open_in_memory() {
        let db = Database::open(None).await.unwrap();
        assert_eq!(db.schema_version().unwrap(), schema::SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_reopen_on_disk_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xongroh.db");
        let path = path.to_str().unwrap();

        let conv_id = {
            let db = Database::open(Some(path)).await.unwrap();
            let conv = db.upsert_conversation(&Conversation::new("alice", "bob")).unwrap();
            db.insert_message(&conv.id, "alice", "bob", "blob").unwrap();
            conv.id
        };

        let db = Database::open(Some(path)).await.unwrap();
        let page = db.fetch_message_page(&conv_id, "bob", None, 10).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(db.schema_version().unwrap(), schema::SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_upsert_conversation_is_idempotent() {
        let (db, conv) = db_with_conversation().await;
        let again = db.upsert_conversation(&Conversation::new("bob", "alice")).unwrap();

        assert_eq!(conv.id, again.id);
        assert_eq!(conv.created_at, again.created_at);
        assert_eq!(db.get_conversations_for("alice").unwrap().len(), 1);
        assert!(db.get_conversations_for("carol").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_message_requires_conversation() {
        let db = Database::open(None).await.unwrap();
        assert!(matches!(
            db.insert_message("nope", "alice", "bob", "blob"),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let (db, conv) = db_with_conversation().await;
        let a = db.insert_message(&conv.id, "alice", "bob", "1").unwrap();
        let b = db.insert_message(&conv.id, "alice", "bob", "2").unwrap();
        assert!(b.created_at > a.created_at);
    }

    #[tokio::test]
    async fn test_keyset_pages_stable_under_insert() {
        let (db, conv) = db_with_conversation().await;
        let mut sent = Vec::new();
        for i in 0..15 {
            sent.push(db.insert_message(&conv.id, "alice", "bob", &format!("{}", i)).unwrap().id);
        }

        let first = db.fetch_message_page(&conv.id, "bob", None, 10).unwrap();
        assert_eq!(first.items.len(), 10);
        assert!(first.has_next());

        db.insert_message(&conv.id, "alice", "bob", "late").unwrap();

        let second = db
            .fetch_message_page(&conv.id, "bob", first.next_cursor.as_ref(), 10)
            .unwrap();
        assert_eq!(second.items.len(), 5);
        assert!(!second.has_next());

        let mut seen = ids(&first);
        seen.extend(ids(&second));
        sent.reverse();
        assert_eq!(seen, sent);
    }

    #[tokio::test]
    async fn test_exact_page_has_no_next_cursor() {
        let (db, conv) = db_with_conversation().await;
        for i in 0..3 {
            db.insert_message(&conv.id, "alice", "bob", &i.to_string()).unwrap();
        }
        let page = db.fetch_message_page(&conv.id, "bob", None, 3).unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_is_per_viewer() {
        let (db, conv) = db_with_conversation().await;
        let m = db.insert_message(&conv.id, "alice", "bob", "blob").unwrap();

        assert!(db.soft_delete_message(&m.id, "bob").unwrap());
        assert!(!db.soft_delete_message(&m.id, "bob").unwrap());

        assert!(db.fetch_message_page(&conv.id, "bob", None, 10).unwrap().items.is_empty());
        let alice_view = db.fetch_message_page(&conv.id, "alice", None, 10).unwrap();
        assert_eq!(alice_view.items.len(), 1);
        assert!(alice_view.items[0].deleted_for.contains("bob"));

        assert!(matches!(
            db.soft_delete_message(&m.id, "carol"),
            Err(Error::NotParticipant(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_message_read_idempotent() {
        let (db, conv) = db_with_conversation().await;
        let m = db.insert_message(&conv.id, "alice", "bob", "blob").unwrap();

        assert!(db.mark_message_read(&m.id, "bob").unwrap());
        assert!(!db.mark_message_read(&m.id, "bob").unwrap());
        assert!(db.get_message(&m.id).unwrap().unwrap().is_read);
        assert!(matches!(
            db.mark_message_read("missing", "bob"),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_only_receiver_marks_message_read() {
        let (db, conv) = db_with_conversation().await;
        let m = db.insert_message(&conv.id, "alice", "bob", "blob").unwrap();

        assert!(matches!(
            db.mark_message_read(&m.id, "alice"),
            Err(Error::NotRecipient(_))
        ));
        assert!(matches!(
            db.mark_message_read(&m.id, "carol"),
            Err(Error::NotRecipient(_))
        ));
        assert!(!db.get_message(&m.id).unwrap().unwrap().is_read);
    }

    #[tokio::test]
    async fn test_mutations_publish_push_events() {
        let hub = PushHub::new();
        let db = Database::open(None).await.unwrap().with_push_hub(hub.clone());
        let conv = db.upsert_conversation(&Conversation::new("alice", "bob")).unwrap();
        let mut sub = hub.subscribe(&conversation_channel(&conv.id)).await.unwrap();

        let m = db.insert_message(&conv.id, "alice", "bob", "blob").unwrap();
        db.mark_message_read(&m.id, "bob").unwrap();
        db.mark_message_read(&m.id, "bob").unwrap();

        match sub.recv().await {
            Some(SubscriptionEvent::Event(e)) => {
                assert_eq!(e.kind, PushEventKind::Create);
                assert_eq!(e.scope_id(), conv.id);
                assert_eq!(e.item_id(), m.id);
            }
            other => panic!("unexpected: {:?}", other),
        }
        match sub.recv().await {
            Some(SubscriptionEvent::Event(e)) => assert_eq!(e.kind, PushEventKind::Update),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(hub.publish(PushEvent::new(PushEventKind::Delete, "x", "y", "z")), 0);
    }

    #[tokio::test]
    async fn test_notification_buckets_are_disjoint() {
        let db = Database::open(None).await.unwrap();
        db.insert_notification(NotificationNamespace::Personal, "u1", "u2", "r1", "a").unwrap();
        db.insert_notification(NotificationNamespace::Community, "u1", "u2", "r2", "b").unwrap();
        db.insert_notification(NotificationNamespace::Personal, "u9", "u2", "r3", "c").unwrap();

        let personal = db
            .fetch_notification_page(NotificationNamespace::Personal, "u1", None, 10)
            .unwrap();
        assert_eq!(personal.items.len(), 1);
        assert_eq!(personal.items[0].resource_id, "r1");
    }

    #[tokio::test]
    async fn test_notification_read_and_delete() {
        let db = Database::open(None).await.unwrap();
        let n = db
            .insert_notification(NotificationNamespace::Community, "u1", "u2", "r1", "hi")
            .unwrap();

        assert!(matches!(
            db.mark_notification_read(&n.id, "u2"),
            Err(Error::NotRecipient(_))
        ));
        assert!(db.mark_notification_read(&n.id, "u1").unwrap());
        assert!(!db.mark_notification_read(&n.id, "u1").unwrap());
        assert!(db.get_notification(&n.id).unwrap().unwrap().is_read);

        assert!(db.delete_notification(&n.id).unwrap());
        assert!(!db.delete_notification(&n.id).unwrap());
        assert!(matches!(db.mark_notification_read(&n.id, "u1"), Err(Error::NotFound(_))));
    }
}
