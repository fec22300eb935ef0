//! Owner resolution.

use std::sync::RwLock;

use tasksync_common::{Error, OwnerId, Result};

/// Source of the currently signed-in principal.
pub trait Authenticator: Send + Sync {
    /// The signed-in owner, or `None` when signed out.
    fn current_owner(&self) -> Option<OwnerId>;

    /// The signed-in owner.
    ///
    /// # Errors
    /// - `NotAuthenticated` when signed out
    fn require_owner(&self) -> Result<OwnerId> {
        self.current_owner().ok_or(Error::NotAuthenticated)
    }
}

/// Authenticator holding a fixed owner that can be swapped at runtime.
#[derive(Debug, Default)]
pub struct StaticAuth {
    owner: RwLock<Option<OwnerId>>,
}

impl StaticAuth {
    /// Start signed in as `owner`.
    pub fn signed_in(owner: OwnerId) -> Self {
        Self {
            owner: RwLock::new(Some(owner)),
        }
    }

    /// Start signed out.
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, owner: OwnerId) {
        *self.owner.write().unwrap_or_else(|p| p.into_inner()) = Some(owner);
    }

    pub fn sign_out(&self) {
        *self.owner.write().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

impl Authenticator for StaticAuth {
    fn current_owner(&self) -> Option<OwnerId> {
        self.owner.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_and_out() {
        let auth = StaticAuth::signed_out();
        assert!(matches!(auth.require_owner(), Err(Error::NotAuthenticated)));

        let owner = OwnerId::new("alice").unwrap();
        auth.sign_in(owner.clone());
        assert_eq!(auth.require_owner().unwrap(), owner);

        auth.sign_out();
        assert!(auth.current_owner().is_none());
    }
}
