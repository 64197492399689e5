//! Per-request authentication context.

use std::collections::BTreeSet;
use std::fmt;

/// Identity established for a single request. Built fresh for every call.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub subject: String,
    pub scopes: BTreeSet<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub session_id: Option<String>,
    token: String,
}

impl AuthContext {
    pub fn new(subject: impl Into<String>, scopes: BTreeSet<String>, token: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            scopes,
            name: None,
            email: None,
            session_id: None,
            token: token.into(),
        }
    }

    /// The raw bearer token, for handlers that call downstream APIs on the user's behalf.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("subject", &self.subject)
            .field("scopes", &self.scopes)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("session_id", &self.session_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let ctx = AuthContext::new("user-1", BTreeSet::new(), "secret.jwt.value");
        let rendered = format!("{ctx:?}");
        assert!(rendered.contains("user-1"));
        assert!(!rendered.contains("secret.jwt.value"));
        assert_eq!(ctx.token(), "secret.jwt.value");
    }
}
