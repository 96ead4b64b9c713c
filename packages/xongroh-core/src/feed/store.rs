//! Seams between a feed and its backing store.

use async_trait::async_trait;

use super::cursor::{Cursor, Page};
use super::scope::Scope;
use crate::error::Result;

/// An item a feed can hold
pub trait FeedItem: Clone + Send + Sync + 'static {
    /// Unique id
    fn id(&self) -> &str;

    /// Creation timestamp (Unix ms)
    fn created_at(&self) -> i64;

    /// Read flag as stored
    fn is_read(&self) -> bool;

    /// Flip the local read flag (false → true only)
    fn set_read(&mut self);

    /// Whether this item counts as unread for `viewer_id`
    ///
    /// Also decides whether becoming visible should mark it read.
    fn is_unread_for(&self, viewer_id: &str) -> bool {
        let _ = viewer_id;
        !self.is_read()
    }

    /// Cursor positioned at this item
    fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at(), self.id())
    }
}

/// Parameters of one page fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// Scope to read
    pub scope: Scope,
    /// Who is reading (soft-deleted items are hidden per viewer)
    pub viewer_id: String,
    /// Start after this position; `None` for the newest page
    pub cursor: Option<Cursor>,
    /// Maximum number of items
    pub limit: usize,
}

/// Paginated reads and the read mutation for one item type
#[async_trait]
pub trait FeedStore<T: FeedItem>: Send + Sync {
    /// Fetch one page, newest first
    async fn fetch_page(&self, query: &PageQuery) -> Result<Page<T>>;

    /// Mark an item read on behalf of `reader_id`
    ///
    /// Must be idempotent: marking an already-read item succeeds. Readers
    /// other than the item's receiver are rejected.
    async fn mark_read(&self, item_id: &str, reader_id: &str) -> Result<()>;
}
