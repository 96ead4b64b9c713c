//! # Storage Module
//!
//! Local persistence standing in for the hosted document store.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SQLite Database (bundled)                                      │   │
//! │  │  ─────────────────────────                                       │   │
//! │  │                                                                 │   │
//! │  │  Tables:                                                       │   │
//! │  │  • conversations - One row per participant pair                │   │
//! │  │  • messages - Ciphertext blobs, read flag                      │   │
//! │  │  • message_deletions - Per-participant soft deletes            │   │
//! │  │  • notifications - Personal and community buckets              │   │
//! │  │                                                                 │   │
//! │  │  Reads: keyset pages (created_at DESC, id DESC)                │   │
//! │  │  Writes: publish create/update/delete on the PushHub           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Database` also implements [`FeedStore`](crate::feed::FeedStore) for
//! messages and notifications, so feeds read straight from it.

mod database;
mod feed_store;
pub mod schema;

pub use database::Database;
