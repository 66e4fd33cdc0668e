//! User-scoped cache keys.
//!
//! A `UserScopedKey` can only be built from a user id and a resource name, so
//! no cache operation can address an entry without naming its owner.

use vitalsync_core::{ResourceKind, UserId};

/// Prefix marking the start of an encoded key.
const PREFIX: char = 'u';

/// A cache key scoped to a single user.
///
/// # Encoding
///
/// `u<len>:<user_id>/<resource>` where `<len>` is the byte length of the user
/// id. The length prefix keeps the encoding injective even when user ids or
/// resource names contain `/` or `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserScopedKey {
    inner: UserKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UserKeyInner {
    user_id: UserId,
    resource: String,
}

impl UserScopedKey {
    pub fn new(user_id: &UserId, resource: impl Into<String>) -> Self {
        Self {
            inner: UserKeyInner {
                user_id: user_id.clone(),
                resource: resource.into(),
            },
        }
    }

    /// Key for one of the resource classes the sync layer manages.
    pub fn for_resource(user_id: &UserId, kind: ResourceKind) -> Self {
        Self::new(user_id, kind.cache_name())
    }

    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    pub fn belongs_to(&self, user_id: &UserId) -> bool {
        &self.inner.user_id == user_id
    }

    pub fn encode(&self) -> String {
        let user = self.inner.user_id.as_str();
        format!("{PREFIX}{}:{user}/{}", user.len(), self.inner.resource)
    }

}

/// Derive the cache key for a user's resource.
pub fn user_cache_key(user_id: &UserId, resource: &str) -> UserScopedKey {
    UserScopedKey::new(user_id, resource)
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_encoding_is_injective(
            user_a in "[a-z/:]{0,8}",
            res_a in "[a-z/:]{0,8}",
            user_b in "[a-z/:]{0,8}",
            res_b in "[a-z/:]{0,8}",
        ) {
            let a = user_cache_key(&UserId::from(user_a.as_str()), &res_a);
            let b = user_cache_key(&UserId::from(user_b.as_str()), &res_b);
            let same_input = user_a == user_b && res_a == res_b;
            prop_assert_eq!(a.encode() == b.encode(), same_input);
        }

        #[test]
        fn prop_key_is_deterministic(user in "[a-zA-Z0-9]{1,16}", resource in "[a-zA-Z]{1,16}") {
            let user = UserId::from(user.as_str());
            prop_assert_eq!(user_cache_key(&user, &resource), user_cache_key(&user, &resource));
        }
    }
}
