//! # Messaging Module
//!
//! Encrypted one-to-one conversations.
//!
//! ## Send Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SENDING A MESSAGE                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Input: "Hello Bob!"                                                   │
//! │                                                                         │
//! │  1. Validate                                                           │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  non-empty, ≤ 64 KiB, sender and receiver are participants │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  2. Encrypt with the shared message key                                │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  base64(nonce[12] || AES-256-GCM(plaintext) || tag[16])    │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  3. Persist ciphertext only                                            │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  messages row + conversation preview pointer               │       │
//! │  │  → push event "create" on conversations/{id}/messages      │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Plaintext never reaches storage. Rendering decrypts per message and
//! caches the result; a blob that fails to decrypt renders as a
//! placeholder without affecting its siblings.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::crypto::{DisplayContent, MessageCipher};
use crate::error::{Error, Result};
use crate::feed::FeedItem;
use crate::storage::Database;

/// Maximum plaintext size (64KB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Rendered messages kept before the least recently used is evicted
pub const RENDER_CACHE_CAPACITY: usize = 1024;

/// A stored message
///
/// `content` is always the ciphertext blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID, assigned by storage
    pub id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Who sent it
    pub sender_id: String,
    /// Who it is for
    pub receiver_id: String,
    /// Ciphertext blob (base64)
    pub content: String,
    /// Set once by the receiver; never reset
    pub is_read: bool,
    /// Participants who have hidden this message from their view
    #[serde(rename = "isDeleted", default)]
    pub deleted_for: BTreeSet<String>,
    /// Unix timestamp (milliseconds)
    pub created_at: i64,
}

impl Message {
    /// Whether `participant` still sees this message
    pub fn is_visible_to(&self, participant: &str) -> bool {
        !self.deleted_for.contains(participant)
    }

    /// Check if this message is from `user_id`
    pub fn is_outgoing(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }
}

impl FeedItem for Message {
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

    /// Only the other participant's messages count
    fn is_unread_for(&self, viewer_id: &str) -> bool {
        !self.is_read && self.sender_id != viewer_id
    }
}

/// A conversation between exactly two participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Deterministic ID derived from the participant pair
    pub id: String,
    /// Sorted participant pair joined by `|`
    pub participants_key: String,
    /// Sorted participant pair
    pub participants: [String; 2],
    /// Most recent message, for list previews
    pub last_message_id: Option<String>,
    /// Timestamp of the most recent message
    pub last_message_at: Option<i64>,
    /// When the conversation was created
    pub created_at: i64,
}

impl Conversation {
    /// A new conversation between `a` and `b`, in either order
    pub fn new(a: &str, b: &str) -> Self {
        let (first, second) = sorted_pair(a, b);
        Self {
            id: Self::generate_id(a, b),
            participants_key: Self::participants_key(a, b),
            participants: [first.to_string(), second.to_string()],
            last_message_id: None,
            last_message_at: None,
            created_at: crate::time::now_timestamp_millis(),
        }
    }

    /// Canonical key for an unordered participant pair
    pub fn participants_key(a: &str, b: &str) -> String {
        let (first, second) = sorted_pair(a, b);
        format!("{}|{}", first, second)
    }

    /// Generate a deterministic conversation ID from two participant ids
    ///
    /// Both parties derive the same ID.
    pub fn generate_id(a: &str, b: &str) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(Self::participants_key(a, b).as_bytes());

        let hash = hasher.finalize();
        hex::encode(&hash[..16]) // Use first 16 bytes (32 hex chars)
    }

    /// Whether `user_id` is one of the two participants
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The participant that isn't `user_id`
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        match &self.participants {
            [a, b] if a == user_id => Some(b.as_str()),
            [a, b] if b == user_id => Some(a.as_str()),
            _ => None,
        }
    }
}

fn sorted_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Messaging service: encrypt on send, decrypt on render
pub struct MessagingService {
    /// Shared message cipher
    cipher: MessageCipher,
    /// Database for persistence
    database: Arc<Database>,
    /// Rendered content by message id
    rendered: Arc<Mutex<LruCache<String, DisplayContent>>>,
}

impl MessagingService {
    /// Create a new messaging service
    pub fn new(cipher: MessageCipher, database: Arc<Database>) -> Self {
        Self::with_render_capacity(cipher, database, RENDER_CACHE_CAPACITY)
    }

    /// Create a service whose render cache holds at most `capacity` entries
    pub fn with_render_capacity(
        cipher: MessageCipher,
        database: Arc<Database>,
        capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cipher,
            database,
            rendered: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Get or create the single conversation for an unordered pair
    pub fn get_or_create_conversation(&self, a: &str, b: &str) -> Result<Conversation> {
        if a.is_empty() || b.is_empty() || a == b {
            return Err(Error::InvalidMessageContent(
                "A conversation needs two distinct participants".into(),
            ));
        }
        self.database.upsert_conversation(&Conversation::new(a, b))
    }

    /// Conversations `user_id` takes part in, most recently active first
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        self.database.get_conversations_for(user_id)
    }

    /// Encrypt and store a text message
    pub fn send_text(
        &self,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        text: &str,
    ) -> Result<Message> {
        if text.is_empty() {
            return Err(Error::InvalidMessageContent("Message is empty".into()));
        }
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(Error::InvalidMessageContent(format!(
                "Message too large: {} bytes (max {})",
                text.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        let conversation = self
            .database
            .get_conversation(conversation_id)?
            .ok_or_else(|| Error::NotFound(format!("conversation {}", conversation_id)))?;

        for user in [sender_id, receiver_id] {
            if !conversation.has_participant(user) {
                return Err(Error::NotParticipant(format!(
                    "{} is not in conversation {}",
                    user, conversation_id
                )));
            }
        }
        if sender_id == receiver_id {
            return Err(Error::InvalidMessageContent(
                "Sender and receiver must differ".into(),
            ));
        }

        let ciphertext = self.cipher.encrypt(text)?;
        let message =
            self.database
                .insert_message(conversation_id, sender_id, receiver_id, &ciphertext)?;

        tracing::info!(
            conversation = conversation_id,
            message_id = %message.id,
            "Message sent"
        );
        Ok(message)
    }

    /// Hide a message from one participant's view
    ///
    /// The other participant keeps seeing it.
    pub fn delete_for(&self, message_id: &str, participant_id: &str) -> Result<()> {
        self.database.soft_delete_message(message_id, participant_id)?;
        self.rendered.lock().pop(message_id);
        Ok(())
    }

    /// Plaintext for display, decrypted once per message id
    ///
    /// Recent renders are cached up to the service's capacity.
    pub fn render(&self, message: &Message) -> DisplayContent {
        if let Some(content) = self.rendered.lock().get(&message.id) {
            return content.clone();
        }

        let content = self.cipher.decrypt_for_display(&message.content);
        self.rendered
            .lock()
            .put(message.id.clone(), content.clone());
        content
    }

    /// Number of cached renders
    pub fn rendered_count(&self) -> usize {
        self.rendered.lock().len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
