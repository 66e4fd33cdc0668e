//! Current-user lookup.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;
use vitalsync_core::UserId;

/// Answers "who is signed in right now".
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;
}

/// Identity held in memory for the lifetime of a session. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    current: Arc<RwLock<Option<UserId>>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: impl Into<UserId>) -> Self {
        let identity = Self::new();
        identity.sign_in(user_id);
        identity
    }

    pub fn sign_in(&self, user_id: impl Into<UserId>) {
        let user_id = user_id.into();
        info!(user_id = %user_id, "session started");
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id);
    }

    /// Clear the session, returning the user that was signed in.
    pub fn sign_out(&self) -> Option<UserId> {
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(user_id) = &previous {
            info!(user_id = %user_id, "session ended");
        }
        previous
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
