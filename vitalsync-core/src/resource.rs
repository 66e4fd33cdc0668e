//! Resource classes managed by the sync layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A resource class as seen by the cache and the subscription registry.
///
/// Saved and favorite messages share one remote collection but are cached and
/// subscribed as two separate views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Profile,
    Reminders,
    GlucoseReadings,
    SavedMessages,
    FavoriteMessages,
    Predictions,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Profile,
        ResourceKind::Reminders,
        ResourceKind::GlucoseReadings,
        ResourceKind::SavedMessages,
        ResourceKind::FavoriteMessages,
        ResourceKind::Predictions,
    ];

    /// Resource name used when deriving the per-user cache key.
    pub fn cache_name(self) -> &'static str {
        match self {
            ResourceKind::Profile => "profile",
            ResourceKind::Reminders => "reminders",
            ResourceKind::GlucoseReadings => "glucoseReadings",
            ResourceKind::SavedMessages => "savedMessages",
            ResourceKind::FavoriteMessages => "favoriteMessages",
            ResourceKind::Predictions => "predictions",
        }
    }

    /// Topic under which live listeners for this resource are registered.
    pub fn topic(self) -> &'static str {
        self.cache_name()
    }

    /// Top-level path segment of the remote collection holding this resource.
    pub fn collection_root(self) -> &'static str {
        match self {
            ResourceKind::Profile => "users",
            ResourceKind::Reminders => "reminders",
            ResourceKind::GlucoseReadings => "glucoseReadings",
            ResourceKind::SavedMessages | ResourceKind::FavoriteMessages => "savedMessages",
            ResourceKind::Predictions => "predictions",
        }
    }

    /// Whether the resource is a single record rather than a list.
    pub fn is_singleton(self) -> bool {
        matches!(self, ResourceKind::Profile)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cache_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_cache_names_are_distinct() {
        let names: HashSet<_> = ResourceKind::ALL.iter().map(|k| k.cache_name()).collect();
        assert_eq!(names.len(), ResourceKind::ALL.len());
    }

    #[test]
    fn test_message_views_share_a_collection() {
        assert_eq!(
            ResourceKind::SavedMessages.collection_root(),
            ResourceKind::FavoriteMessages.collection_root()
        );
        assert_ne!(
            ResourceKind::SavedMessages.cache_name(),
            ResourceKind::FavoriteMessages.cache_name()
        );
    }

    #[test]
    fn test_only_profile_is_singleton() {
        let singletons: Vec<_> = ResourceKind::ALL
            .iter()
            .filter(|k| k.is_singleton())
            .collect();
        assert_eq!(singletons, vec![&ResourceKind::Profile]);
        assert_eq!(ResourceKind::Profile.collection_root(), "users");
    }
}
