//! # Feed Module
//!
//! Live, paginated, per-scope views over messages and notifications.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            LIVE FEED                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   FeedStore::fetch_page(scope, cursor) ──► pages: Vec<Page<T>>          │
//! │                                               │                         │
//! │   PushChannel::subscribe(scope.channel_path)  │  items() / unread_count │
//! │        │                                      ▼                         │
//! │        └── matching event ──► refetch window ──► replace pages by id    │
//! │                                                                         │
//! │   on_item_visible(id) ──► FeedStore::mark_read(id) (fire and forget)    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cursors are keyset positions `(created_at, id)`, so items inserted ahead
//! of a cursor never shift page boundaries.

mod cursor;
mod reconciler;
mod scope;
mod store;

pub use cursor::{Cursor, Page};
pub use reconciler::{
    FeedConfig, FeedSnapshot, FeedState, LiveFeed, MarkReadOutcome, DEFAULT_FETCH_TIMEOUT,
    DEFAULT_MARK_READ_TIMEOUT, DEFAULT_PAGE_SIZE,
};
pub use scope::{conversation_channel, notification_channel, Scope};
pub use store::{FeedItem, FeedStore, PageQuery};
