//! # Error Handling
//!
//! Error types shared by every module of Xongroh Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Core Errors                                                       │
//! │  │   └── InvalidConfig         - Configuration value out of range      │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── InvalidKeyLength      - Key is not 256 bits (fatal at init)   │
//! │  │   ├── InvalidKeyEncoding    - Key is not valid base64               │
//! │  │   ├── EncryptionFailed      - AEAD encryption failed                │
//! │  │   └── DecryptionFailed      - Bad base64, short blob, bad tag, ...  │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── DatabaseError         - SQLite failure                        │
//! │  │   ├── NotFound              - Unknown record id                     │
//! │  │   └── NotParticipant        - Caller is not part of conversation    │
//! │  │                                                                      │
//! │  ├── Feed Errors                                                       │
//! │  │   ├── FetchFailed           - Page fetch failed (recoverable)       │
//! │  │   ├── Timeout               - Fetch or mutation timed out           │
//! │  │   ├── SubscriptionFailed    - Push channel could not be opened      │
//! │  │   ├── MarkReadFailed        - Read mutation failed (swallowed)      │
//! │  │   ├── FeedBlocked           - Pagination blocked by earlier failure │
//! │  │   ├── FeedTornDown          - Feed already unsubscribed             │
//! │  │   ├── InvalidCursor         - Cursor token could not be decoded     │
//! │  │   └── InvalidPushEvent      - Push payload failed validation        │
//! │  │                                                                      │
//! │  └── Message Errors                                                    │
//! │      └── InvalidMessageContent - Empty or oversized plaintext          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//!
//! Crypto failures are per message: a renderer turns a `DecryptionFailed`
//! into a placeholder and keeps going with the sibling messages. Fetch
//! failures land on the feed that issued them and never on other feeds.
//! `MarkReadFailed` exists so the failure can be logged with a code; the
//! feed never returns it to callers.

use thiserror::Error;

/// Result type alias for Xongroh Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Xongroh Core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Core Errors (100-199)
    // ========================================================================

    /// A configuration value is missing or out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// The decoded key is not exactly 256 bits
    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The key is not valid base64
    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The user is not a participant of the conversation
    #[error("{0} is not a participant of this conversation")]
    NotParticipant(String),

    /// Only the receiver may mark an item read
    #[error("Not the recipient: {0}")]
    NotRecipient(String),

    // ========================================================================
    // Feed Errors (500-599)
    // ========================================================================

    /// A page fetch failed
    #[error("Failed to fetch page: {0}")]
    FetchFailed(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Subscribing to a push channel failed
    #[error("Failed to subscribe to {0}")]
    SubscriptionFailed(String),

    /// Marking an item read failed
    #[error("Failed to mark {0} as read")]
    MarkReadFailed(String),

    /// Pagination is blocked until the previous failure is retried
    #[error("Feed is blocked by a failed fetch; call retry() first")]
    FeedBlocked,

    /// The feed was torn down and accepts no further transitions
    #[error("Feed has been torn down")]
    FeedTornDown,

    /// The feed has no active scope
    #[error("Feed has not been started")]
    FeedNotStarted,

    /// A cursor token could not be decoded
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// A push payload is missing required fields
    #[error("Invalid push event: {0}")]
    InvalidPushEvent(String),

    // ========================================================================
    // Message Errors (700-799)
    // ========================================================================

    /// Invalid message content
    #[error("Invalid message content: {0}")]
    InvalidMessageContent(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Core / configuration
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Feed and realtime
    /// - 700-799: Messages
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Core (100-199)
            Error::InvalidConfig(_) => 100,

            // Crypto (300-399)
            Error::InvalidKeyLength(_) => 300,
            Error::InvalidKeyEncoding(_) => 301,
            Error::EncryptionFailed(_) => 302,
            Error::DecryptionFailed(_) => 303,

            // Storage (400-499)
            Error::DatabaseError(_) => 400,
            Error::NotFound(_) => 401,
            Error::NotParticipant(_) => 402,
            Error::NotRecipient(_) => 403,

            // Feed (500-599)
            Error::FetchFailed(_) => 500,
            Error::Timeout(_) => 501,
            Error::SubscriptionFailed(_) => 502,
            Error::MarkReadFailed(_) => 503,
            Error::FeedBlocked => 504,
            Error::FeedTornDown => 505,
            Error::FeedNotStarted => 506,
            Error::InvalidCursor(_) => 507,
            Error::InvalidPushEvent(_) => 508,

            // Messages (700-799)
            Error::InvalidMessageContent(_) => 700,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be resolved by an explicit retry (scroll,
    /// remount, `LiveFeed::retry`). Nothing in the core retries on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::FetchFailed(_)
                | Error::Timeout(_)
                | Error::SubscriptionFailed(_)
                | Error::FeedBlocked
                | Error::DatabaseError(_)
        )
    }

    /// Check if this error is fatal at startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidKeyLength(_) | Error::InvalidKeyEncoding(_) | Error::InvalidConfig(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::DecryptionFailed(format!("Malformed base64: {}", err))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidConfig("x".into()).code(), 100);
        assert_eq!(Error::InvalidKeyLength(16).code(), 300);
        assert_eq!(Error::DecryptionFailed("x".into()).code(), 303);
        assert_eq!(Error::DatabaseError("x".into()).code(), 400);
        assert_eq!(Error::FetchFailed("x".into()).code(), 500);
        assert_eq!(Error::InvalidMessageContent("x".into()).code(), 700);
        assert_eq!(Error::Internal("x".into()).code(), 900);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::FetchFailed("offline".into()).is_recoverable());
        assert!(Error::Timeout("fetch".into()).is_recoverable());
        assert!(!Error::DecryptionFailed("bad tag".into()).is_recoverable());
        assert!(!Error::FeedTornDown.is_recoverable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(Error::InvalidKeyLength(16).is_fatal());
        assert!(!Error::MarkReadFailed("m1".into()).is_fatal());
    }

    #[test]
    fn test_key_length_message_mentions_size() {
        let msg = Error::InvalidKeyLength(16).to_string();
        assert!(msg.contains("32"));
        assert!(msg.contains("16"));
    }
}
