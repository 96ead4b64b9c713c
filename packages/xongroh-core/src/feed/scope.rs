//! Feed scopes and their push channel paths.

use std::fmt;

use crate::notifications::NotificationNamespace;
use crate::realtime::PushEvent;

/// What a feed tracks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Messages of one conversation
    Conversation(String),
    /// A user's personal notifications
    PersonalNotifications(String),
    /// A user's community notifications
    CommunityNotifications(String),
}

impl Scope {
    /// Scope for a notification namespace
    pub fn notifications(namespace: NotificationNamespace, receiver_id: impl Into<String>) -> Self {
        match namespace {
            NotificationNamespace::Personal => Self::PersonalNotifications(receiver_id.into()),
            NotificationNamespace::Community => Self::CommunityNotifications(receiver_id.into()),
        }
    }

    /// The scope id (conversation id or receiver id)
    pub fn id(&self) -> &str {
        match self {
            Self::Conversation(id)
            | Self::PersonalNotifications(id)
            | Self::CommunityNotifications(id) => id,
        }
    }

    /// The notification namespace, for notification scopes
    pub fn namespace(&self) -> Option<NotificationNamespace> {
        match self {
            Self::Conversation(_) => None,
            Self::PersonalNotifications(_) => Some(NotificationNamespace::Personal),
            Self::CommunityNotifications(_) => Some(NotificationNamespace::Community),
        }
    }

    /// Push channel path carrying this scope's events
    pub fn channel_path(&self) -> String {
        match self {
            Self::Conversation(id) => conversation_channel(id),
            Self::PersonalNotifications(id) => {
                notification_channel(NotificationNamespace::Personal, id)
            }
            Self::CommunityNotifications(id) => {
                notification_channel(NotificationNamespace::Community, id)
            }
        }
    }

    /// Whether an event belongs to this scope
    ///
    /// Both the channel and the payload's scope id must match.
    pub fn matches(&self, event: &PushEvent) -> bool {
        event.scope_id() == self.id() && event.channel == self.channel_path()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.channel_path())
    }
}

/// Channel path for a conversation's messages
pub fn conversation_channel(conversation_id: &str) -> String {
    format!("conversations/{}/messages", conversation_id)
}

/// Channel path for a receiver's notifications in a namespace
pub fn notification_channel(namespace: NotificationNamespace, receiver_id: &str) -> String {
    match namespace {
        NotificationNamespace::Personal => format!("users/{}/notifications", receiver_id),
        NotificationNamespace::Community => format!("users/{}/community-notifications", receiver_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::PushEventKind;

    #[test]
    fn test_channel_paths_are_distinct() {
        let personal = Scope::PersonalNotifications("u1".into());
        let community = Scope::CommunityNotifications("u1".into());

        assert_eq!(personal.id(), community.id());
        assert_ne!(personal.channel_path(), community.channel_path());
    }

    #[test]
    fn test_matches_requires_scope_id_and_channel() {
        let scope = Scope::Conversation("c1".into());

        let own = PushEvent::new(PushEventKind::Create, conversation_channel("c1"), "c1", "m1");
        let other = PushEvent::new(PushEventKind::Create, conversation_channel("c2"), "c2", "m1");
        let mislabeled = PushEvent::new(PushEventKind::Create, conversation_channel("c1"), "c2", "m1");

        assert!(scope.matches(&own));
        assert!(!scope.matches(&other));
        assert!(!scope.matches(&mislabeled));
    }

    #[test]
    fn test_namespace_roundtrip() {
        let scope = Scope::notifications(NotificationNamespace::Community, "u7");
        assert_eq!(scope, Scope::CommunityNotifications("u7".into()));
        assert_eq!(scope.namespace(), Some(NotificationNamespace::Community));
        assert_eq!(Scope::Conversation("c".into()).namespace(), None);
    }
}
