//! Session adapter (§4.8).
//!
//! A narrow trait gate in the same register as
//! [`ConnectionData`](crate::ConnectionData) — storage a connection (or, here,
//! a request) carries alongside the protocol state without the server itself
//! understanding its shape — generalized to per-request authentication state
//! rather than per-connection scratch data.

use std::time::Duration;

/// Opaque per-request session state a virtual host's middleware chain may
/// attach to an [`HttpEntity`](crate::middleware::HttpEntity).
pub trait Session: Send + Sync {
    /// Whether this session carries authenticated state at all (as opposed
    /// to an anonymous placeholder).
    fn is_set(&self) -> bool;

    /// A short tag identifying the concrete session kind, for logging
    /// (`"oauth2"`, `"api-key"`, ...).
    fn session_type(&self) -> &'static str;
}

/// An OAuth2-flavored session, the one concrete shape this crate ships.
#[derive(Debug, Clone)]
pub struct OAuth2Session {
    pub max_token_lifetime: Duration,
    pub app_id: String,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub r#type: String,
}

impl OAuth2Session {
    /// Checks whether the session grants `permission` under its `r#type`.
    ///
    /// Composes `"{type}:{permission}"` and does a case-insensitive
    /// substring test against the scope list — a session with scope
    /// `"user:read-write"` satisfies `has_scope("read")` as well as
    /// `has_scope("read-write")`, matching the spec's stated matching rule.
    pub fn has_scope(&self, permission: &str) -> bool {
        let needle = format!("{}:{}", self.r#type, permission).to_ascii_lowercase();

        self.scopes
            .iter()
            .any(|scope| scope.to_ascii_lowercase().contains(&needle))
    }
}

impl Session for OAuth2Session {
    fn is_set(&self) -> bool {
        !self.app_id.is_empty()
    }

    fn session_type(&self) -> &'static str {
        "oauth2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(scopes: &[&str]) -> OAuth2Session {
        OAuth2Session {
            max_token_lifetime: Duration::from_secs(3600),
            app_id: "app-1".to_string(),
            refresh_token: None,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            r#type: "user".to_string(),
        }
    }

    #[test]
    fn has_scope_matches_composed_permission() {
        let s = session(&["user:read-write"]);
        assert!(s.has_scope("read"));
        assert!(s.has_scope("read-write"));
        assert!(!s.has_scope("admin"));
    }

    #[test]
    fn has_scope_is_case_insensitive() {
        let s = session(&["USER:READ"]);
        assert!(s.has_scope("read"));
    }

    #[test]
    fn is_set_reflects_app_id() {
        let mut s = session(&[]);
        assert!(s.is_set());
        s.app_id.clear();
        assert!(!s.is_set());
    }
}
