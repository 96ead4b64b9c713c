//! # Push Events
//!
//! Change notifications delivered by the realtime channel. An event only
//! says *that* an item in a scope changed; feeds refetch to learn *how*.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What happened to the item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushEventKind {
    /// A new item was created
    Create,
    /// An existing item changed (read flag, soft delete, ...)
    Update,
    /// An item was removed
    Delete,
}

impl PushEventKind {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Scope-identifying part of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    /// Conversation id or notification receiver id
    pub scope_id: String,
    /// The item that changed
    pub item_id: String,
}

/// An event received on a push channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Event type
    #[serde(rename = "type")]
    pub kind: PushEventKind,
    /// Channel path the event was published on
    pub channel: String,
    /// Event payload
    pub payload: PushPayload,
}

impl PushEvent {
    /// Build an event
    pub fn new(
        kind: PushEventKind,
        channel: impl Into<String>,
        scope_id: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            channel: channel.into(),
            payload: PushPayload {
                scope_id: scope_id.into(),
                item_id: item_id.into(),
            },
        }
    }

    /// The scope id carried by the payload
    pub fn scope_id(&self) -> &str {
        &self.payload.scope_id
    }

    /// The changed item's id
    pub fn item_id(&self) -> &str {
        &self.payload.item_id
    }

    /// Parse and validate an event from its JSON form
    ///
    /// Missing fields and empty identifiers are rejected here so nothing
    /// downstream has to re-check them.
    pub fn from_json(json: &str) -> Result<Self> {
        let event: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidPushEvent(e.to_string()))?;

        if event.channel.is_empty() {
            return Err(Error::InvalidPushEvent("empty channel".into()));
        }
        if event.payload.scope_id.is_empty() {
            return Err(Error::InvalidPushEvent("empty scopeId".into()));
        }
        if event.payload.item_id.is_empty() {
            return Err(Error::InvalidPushEvent("empty itemId".into()));
        }

        Ok(event)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }
}
