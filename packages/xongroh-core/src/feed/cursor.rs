//! Keyset pagination cursors.
//!
//! Feeds are ordered newest first by `(created_at DESC, id DESC)`. A cursor
//! is the key of the last item on a page; the next page holds the items
//! strictly after it in that order. Inserting newer items never moves an
//! existing cursor, so pages never overlap or skip.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL, Engine as _};
use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Position in a newest-first feed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor {
    /// Creation timestamp (Unix ms) of the last item on the page
    pub created_at: i64,
    /// Id of the last item on the page (tiebreak)
    pub id: String,
}

impl Cursor {
    /// Create a cursor at the given key
    pub fn new(created_at: i64, id: impl Into<String>) -> Self {
        Self {
            created_at,
            id: id.into(),
        }
    }

    /// Whether an item with this key belongs after the cursor
    pub fn admits(&self, created_at: i64, id: &str) -> bool {
        (created_at, id) < (self.created_at, self.id.as_str())
    }

    /// Opaque token for handing to callers
    pub fn encode(&self) -> String {
        BASE64_URL.encode(format!("{}:{}", self.created_at, self.id))
    }

    /// Parse a token produced by [`Cursor::encode`]
    pub fn decode(token: &str) -> Result<Self> {
        let raw = BASE64_URL
            .decode(token)
            .map_err(|e| Error::InvalidCursor(e.to_string()))?;
        let raw = String::from_utf8(raw).map_err(|e| Error::InvalidCursor(e.to_string()))?;

        let (ts, id) = raw
            .split_once(':')
            .ok_or_else(|| Error::InvalidCursor("missing separator".into()))?;
        let created_at = ts
            .parse::<i64>()
            .map_err(|e| Error::InvalidCursor(e.to_string()))?;
        if id.is_empty() {
            return Err(Error::InvalidCursor("empty id".into()));
        }

        Ok(Self::new(created_at, id))
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.created_at, &self.id).cmp(&(other.created_at, &other.id))
    }
}

/// One page of a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items, newest first
    pub items: Vec<T>,
    /// Where the next page starts, if there is one
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    /// A page with no items and no successor
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    /// Whether another page follows
    pub fn has_next(&self) -> bool {
        self.next_cursor.is_some()
    }
}
