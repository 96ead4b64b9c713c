//! # Encryption Module
//!
//! AES-256-GCM encryption of single chat messages under a pre-shared key.
//!
//! ## Blob Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CIPHERTEXT BLOB                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  base64( nonce || ciphertext || tag )                                  │
//! │                                                                         │
//! │  ┌──────────────┬──────────────────────────────┬────────────────┐      │
//! │  │ nonce (12 B) │ ciphertext (len(plaintext))  │ GCM tag (16 B) │      │
//! │  └──────────────┴──────────────────────────────┴────────────────┘      │
//! │                                                                         │
//! │  - Standard alphabet, padded                                           │
//! │  - No separator: the nonce length is fixed                             │
//! │  - No associated data                                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! This layout is the only bit-exact contract of the messaging core. Stored
//! messages written by earlier clients must keep decrypting, so it never
//! changes.
//!
//! ## Security Properties
//!
//! | Property | Guarantee |
//! |----------|-----------|
//! | Confidentiality | Only holders of the shared key can read the message |
//! | Integrity | Any modified byte fails tag verification |
//! | Nonce uniqueness | Fresh 96-bit random nonce per message |
//! | Constant-time verify | Delegated to `aes-gcm` |

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce as AesNonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use std::sync::Arc;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Text rendered in place of a message that failed to decrypt
pub const DECRYPT_FAILED_PLACEHOLDER: &str = "failed to decrypt";

/// A nonce (number used once) for AES-GCM encryption
///
/// **Never reuse a nonce with the same key.** Random 96-bit nonces stay
/// safe up to roughly 2^32 messages per key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a cryptographically random nonce
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// The pre-shared AES-256-GCM message key
///
/// Loaded once at startup and shared read-only. Zeroized when dropped and
/// never printed by `Debug`.
#[derive(ZeroizeOnDrop)]
pub struct MessageKey([u8; KEY_SIZE]);

impl MessageKey {
    /// Import a base64-encoded key
    ///
    /// Fails with `InvalidKeyLength` unless the decoded key is exactly
    /// 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|e| Error::InvalidKeyEncoding(e.to_string()))?,
        );

        if decoded.len() != KEY_SIZE {
            return Err(Error::InvalidKeyLength(decoded.len()));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random key (for provisioning)
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Export as base64 (for provisioning tools only)
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageKey(<redacted>)")
    }
}

/// Encrypt a plaintext message into a ciphertext blob
///
/// Every call draws a new random nonce, so encrypting the same text twice
/// yields different blobs.
///
/// ## Example
///
/// ```
/// use xongroh_core::crypto::{encrypt_message, decrypt_message, MessageKey};
///
/// let key = MessageKey::generate();
/// let blob = encrypt_message("hello world", &key).unwrap();
/// assert_eq!(decrypt_message(&blob, &key).unwrap(), "hello world");
/// ```
pub fn encrypt_message(plaintext: &str, key: &MessageKey) -> Result<String> {
    let nonce = Nonce::random();

    let ciphertext = key
        .cipher()
        .encrypt(AesNonce::from_slice(nonce.as_bytes()), plaintext.as_bytes())
        .map_err(|e| Error::EncryptionFailed(e.to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(nonce.as_bytes());
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(blob))
}

/// Decrypt a ciphertext blob produced by [`encrypt_message`]
///
/// ## Errors
///
/// Returns `DecryptionFailed` if:
/// - The blob is not valid base64
/// - The decoded blob is shorter than the nonce
/// - The authentication tag does not verify (tampered data or wrong key)
/// - The plaintext is not valid UTF-8
pub fn decrypt_message(blob: &str, key: &MessageKey) -> Result<String> {
    let bytes = BASE64.decode(blob.trim())?;

    if bytes.len() < NONCE_SIZE {
        return Err(Error::DecryptionFailed(format!(
            "Blob too short: {} bytes (nonce alone is {})",
            bytes.len(),
            NONCE_SIZE
        )));
    }

    let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);

    let plaintext = key
        .cipher()
        .decrypt(AesNonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::DecryptionFailed("authentication tag mismatch".into()))?;

    String::from_utf8(plaintext)
        .map_err(|_| Error::DecryptionFailed("plaintext is not valid UTF-8".into()))
}

/// Content ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayContent {
    /// Successfully decrypted text
    Text(String),
    /// Decryption failed; render the placeholder
    DecryptFailed,
}

impl DisplayContent {
    /// Text to render
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::DecryptFailed => DECRYPT_FAILED_PLACEHOLDER,
        }
    }

    /// Whether decryption failed
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::DecryptFailed)
    }
}

/// Decrypt for rendering, degrading to a placeholder on failure
///
/// The failure is isolated to this one blob.
pub fn decrypt_for_display(blob: &str, key: &MessageKey) -> DisplayContent {
    match decrypt_message(blob, key) {
        Ok(text) => DisplayContent::Text(text),
        Err(e) => {
            tracing::warn!(error = %e, "Message could not be decrypted");
            DisplayContent::DecryptFailed
        }
    }
}

/// Cheaply cloneable cipher bound to the process-wide key
///
/// Components receive this instead of reaching for a global.
#[derive(Clone, Debug)]
pub struct MessageCipher {
    key: Arc<MessageKey>,
}

impl MessageCipher {
    /// Wrap an imported key
    pub fn new(key: MessageKey) -> Self {
        Self { key: Arc::new(key) }
    }

    /// Import a base64 key and wrap it
    pub fn from_base64(encoded: &str) -> Result<Self> {
        MessageKey::from_base64(encoded).map(Self::new)
    }

    /// See [`encrypt_message`]
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        encrypt_message(plaintext, &self.key)
    }

    /// See [`decrypt_message`]
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        decrypt_message(blob, &self.key)
    }

    /// See [`decrypt_for_display`]
    pub fn decrypt_for_display(&self, blob: &str) -> DisplayContent {
        decrypt_for_display(blob, &self.key)
    }
}

// ============================================================================
// TESTS
// ============================================================================
