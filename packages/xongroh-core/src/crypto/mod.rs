//! # Cryptography Module
//!
//! Message-level encryption for Xongroh chats.
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose | Why Chosen |
//! |-----------|---------|------------|
//! | AES-256-GCM | Message encryption | AEAD, matches previously stored blobs |
//! | OsRng | Nonces and key generation | OS CSPRNG |
//! | Base64 (standard, padded) | Blob encoding | Text-safe storage column |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: `MessageKey` is zeroized when dropped
//! 2. **Constant-Time Verify**: Tag comparison is done inside `aes-gcm`
//! 3. **No Nonce Reuse**: A fresh random nonce for every message
//! 4. **No Key Logging**: `MessageKey` has a redacted `Debug` impl

mod encryption;

pub use encryption::{
    decrypt_for_display, decrypt_message, encrypt_message, DisplayContent, MessageCipher,
    MessageKey, Nonce, DECRYPT_FAILED_PLACEHOLDER, KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
