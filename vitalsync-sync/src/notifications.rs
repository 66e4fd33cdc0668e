//! Side channel for conditions the UI should surface without failing a
//! subscription, such as a datastore rejecting a listener.

use chrono::Utc;
use tokio::sync::broadcast;
use vitalsync_core::{ResourceKind, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// What a notification reports, independent of its wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    General,
    /// The datastore refused a listener for the named resource.
    PermissionDenied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub level: NotificationLevel,
    pub message: String,
    pub resource: Option<ResourceKind>,
    pub user_id: Option<UserId>,
    pub created_at: Timestamp,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::General,
            level,
            message: message.into(),
            resource: None,
            user_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_resource(mut self, resource: ResourceKind, user_id: &UserId) -> Self {
        self.resource = Some(resource);
        self.user_id = Some(user_id.clone());
        self
    }

    pub fn permission_denied(resource: ResourceKind, user_id: &UserId) -> Self {
        let mut notification = Self::new(
            NotificationLevel::Warning,
            format!("Permission denied for {resource}. Check the datastore access rules."),
        )
        .for_resource(resource, user_id);
        notification.kind = NotificationKind::PermissionDenied;
        notification
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind == NotificationKind::PermissionDenied
    }
}

/// Broadcasts notifications to every current receiver.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to current receivers. Returns how many received it.
    pub fn publish(&self, notification: Notification) -> usize {
        self.sender.send(notification).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_receivers() {
        let notifier = Notifier::new(4);
        let mut receiver = notifier.subscribe();

        let sent = notifier.publish(Notification::permission_denied(
            ResourceKind::Reminders,
            &UserId::from("u1"),
        ));
        assert_eq!(sent, 1);

        let received = receiver.recv().await.unwrap();
        assert!(received.is_permission_denied());
        assert_eq!(received.resource, Some(ResourceKind::Reminders));
        assert_eq!(received.user_id, Some(UserId::from("u1")));
        assert!(received.message.contains("reminders"));
    }

    #[test]
    fn test_permission_denied_is_decided_by_kind() {
        let lookalike = Notification::new(
            NotificationLevel::Warning,
            "Permission denied by the user for camera access",
        );
        assert_eq!(lookalike.kind, NotificationKind::General);
        assert!(!lookalike.is_permission_denied());

        let mut reworded =
            Notification::permission_denied(ResourceKind::Profile, &UserId::from("u1"));
        reworded.message = "Access to your profile was refused".to_string();
        assert!(reworded.is_permission_denied());
    }

    #[test]
    fn test_publish_without_receivers_is_dropped() {
        let notifier = Notifier::default();
        assert_eq!(
            notifier.publish(Notification::new(NotificationLevel::Info, "hello")),
            0
        );
    }
}
