//! [`FeedStore`] implementations backed by [`Database`].

use async_trait::async_trait;

use super::Database;
use crate::error::{Error, Result};
use crate::feed::{FeedStore, Page, PageQuery, Scope};
use crate::messaging::Message;
use crate::notifications::Notification;

#[async_trait]
impl FeedStore<Message> for Database {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Page<Message>> {
        match &query.scope {
            Scope::Conversation(conversation_id) => self.fetch_message_page(
                conversation_id,
                &query.viewer_id,
                query.cursor.as_ref(),
                query.limit,
            ),
            other => Err(Error::FetchFailed(format!("{} does not hold messages", other))),
        }
    }

    async fn mark_read(&self, item_id: &str, reader_id: &str) -> Result<()> {
        self.mark_message_read(item_id, reader_id).map(|_| ())
    }
}

#[async_trait]
impl FeedStore<Notification> for Database {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Page<Notification>> {
        let Some(namespace) = query.scope.namespace() else {
            return Err(Error::FetchFailed(format!(
                "{} does not hold notifications",
                query.scope
            )));
        };
        self.fetch_notification_page(
            namespace,
            query.scope.id(),
            query.cursor.as_ref(),
            query.limit,
        )
    }

    async fn mark_read(&self, item_id: &str, reader_id: &str) -> Result<()> {
        self.mark_notification_read(item_id, reader_id).map(|_| ())
    }
}
