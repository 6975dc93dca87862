//! Caller identity resolved by the authentication layer.

use std::collections::BTreeSet;

use serde::Serialize;

/// Who is making the request.
///
/// Every request starts out anonymous. The authentication layer replaces this
/// with [`Identity::User`] once a bearer token has been validated. Handlers
/// that need a real user do their own authorization check.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Identity {
    #[default]
    Anonymous,
    User(User),
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Self::User(user) => Some(user),
            Self::Anonymous => None,
        }
    }
}

/// A verified user and the permission codes granted to them
/// (e.g. `movies:read`, `movies:write`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub activated: bool,
    pub permissions: BTreeSet<String>,
}

impl User {
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        Self { id, email: email.into(), activated: true, permissions: BTreeSet::new() }
    }

    pub fn with_permission(mut self, code: impl Into<String>) -> Self {
        self.permissions.insert(code.into());
        self
    }

    pub fn has_permission(&self, code: &str) -> bool {
        self.permissions.contains(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_identity_is_anonymous() {
        let identity = Identity::default();
        assert!(identity.is_anonymous());
        assert!(identity.user().is_none());
    }

    #[test]
    fn permissions_are_exact_codes() {
        let user = User::new(7, "alice@example.com").with_permission("movies:read");
        assert!(user.has_permission("movies:read"));
        assert!(!user.has_permission("movies:write"));
        assert!(!user.has_permission("movies"));
    }
}
