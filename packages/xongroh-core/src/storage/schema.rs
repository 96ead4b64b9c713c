//! # Database Schema
//!
//! SQL schema definitions for the Xongroh database.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────┐    ┌─────────────────┐    ┌───────────────────┐   │
//! │  │  conversations   │    │    messages     │    │ message_deletions │   │
//! │  ├──────────────────┤    ├─────────────────┤    ├───────────────────┤   │
//! │  │ id               │◄───│ conversation_id │◄───│ message_id        │   │
//! │  │ participants_key │    │ id              │    │ participant_id    │   │
//! │  │ participant_a    │    │ sender_id       │    │ deleted_at        │   │
//! │  │ participant_b    │    │ receiver_id     │    └───────────────────┘   │
//! │  │ last_message_id  │    │ content (blob)  │                            │
//! │  │ last_message_at  │    │ is_read         │    ┌───────────────────┐   │
//! │  │ created_at       │    │ created_at      │    │  notifications    │   │
//! │  └──────────────────┘    └─────────────────┘    ├───────────────────┤   │
//! │                                                 │ id, namespace     │   │
//! │                                                 │ receiver_id       │   │
//! │                                                 │ sender_id         │   │
//! │                                                 │ resource_id       │   │
//! │                                                 │ message, is_read  │   │
//! │                                                 │ created_at        │   │
//! │                                                 └───────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Conversations table
-- One row per unordered participant pair
CREATE TABLE IF NOT EXISTS conversations (
    -- hex(sha256(participants_key)[..16])
    id TEXT PRIMARY KEY,
    -- Sorted participant ids joined by '|'
    participants_key TEXT NOT NULL UNIQUE,
    participant_a TEXT NOT NULL,
    participant_b TEXT NOT NULL,
    -- Preview pointer to the newest message
    last_message_id TEXT,
    last_message_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_a ON conversations(participant_a);
CREATE INDEX IF NOT EXISTS idx_conversations_b ON conversations(participant_b);

-- Messages table
-- Content is the ciphertext blob, never plaintext
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    sender_id TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    -- base64(nonce || ciphertext || tag)
    content TEXT NOT NULL,
    -- Only ever goes 0 -> 1
    is_read INTEGER NOT NULL DEFAULT 0,
    -- Unix ms; with id forms the pagination key
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_keyset
    ON messages(conversation_id, created_at DESC, id DESC);

-- Per-participant soft deletes (append-only)
CREATE TABLE IF NOT EXISTS message_deletions (
    message_id TEXT NOT NULL REFERENCES messages(id),
    participant_id TEXT NOT NULL,
    deleted_at INTEGER NOT NULL,
    PRIMARY KEY (message_id, participant_id)
);

-- Notifications table
-- 'personal' and 'community' buckets are paginated independently
CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    namespace TEXT NOT NULL CHECK (namespace IN ('personal', 'community')),
    receiver_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    message TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_keyset
    ON notifications(namespace, receiver_id, created_at DESC, id DESC);
"#;
