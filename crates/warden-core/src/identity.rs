//! Identity types and the capability interfaces consumed by the
//! surrounding stack.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Credentials plus opaque request metadata for one authentication attempt.
#[derive(Clone)]
pub struct AuthenticationContext {
    pub username: String,
    /// Blank or absent secrets are rejected before any directory round-trip.
    pub secret: Option<String>,
    /// Originating-request metadata, passed through untouched.
    pub metadata: HashMap<String, String>,
}

impl AuthenticationContext {
    pub fn new(username: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            username: username.into(),
            secret,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The secret, if it is usable for a bind: present and not blank.
    pub fn usable_secret(&self) -> Option<&str> {
        self.secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and(self.secret.as_deref())
    }
}

impl fmt::Debug for AuthenticationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationContext")
            .field("username", &self.username)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Outcome of a federated authentication attempt. Failure is a value, never
/// an error: callers must be able to tell "not authorized" from "broken".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResult {
    pub success: bool,
    /// Key of the server that accepted the credentials; present only on
    /// success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_key: Option<String>,
}

impl AuthenticationResult {
    pub fn success(server_key: impl Into<String>) -> Self {
        Self {
            success: true,
            server_key: Some(server_key.into()),
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            server_key: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// Profile attributes resolved for a user. Missing directory attributes map
/// to empty strings, never to an absent field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetails {
    pub real_name: String,
    pub email: String,
}

#[async_trait]
pub trait Authenticate: Send + Sync {
    async fn authenticate(&self, context: &AuthenticationContext) -> AuthenticationResult;
}

#[async_trait]
pub trait ResolveGroups: Send + Sync {
    /// Group names for `username` on the server identified by `server_key`.
    /// An unknown user yields an empty set.
    async fn groups(&self, server_key: &str, username: &str) -> Result<BTreeSet<String>>;
}

#[async_trait]
pub trait FetchUserDetails: Send + Sync {
    /// Profile details for `username`, or `None` when the user is unknown.
    async fn user_details(&self, username: &str) -> Result<Option<UserDetails>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_secrets_are_not_usable() {
        assert!(AuthenticationContext::new("tester", None).usable_secret().is_none());
        assert!(AuthenticationContext::new("tester", Some(String::new()))
            .usable_secret()
            .is_none());
        assert!(AuthenticationContext::new("tester", Some("   ".into()))
            .usable_secret()
            .is_none());
    }

    #[test]
    fn usable_secret_is_returned_verbatim() {
        let context = AuthenticationContext::new("tester", Some(" hunter2 ".into()));
        // Trimming decides usability only; the bind sees the original bytes.
        assert_eq!(context.usable_secret(), Some(" hunter2 "));
    }

    #[test]
    fn debug_redacts_the_secret() {
        let context = AuthenticationContext::new("tester", Some("hunter2".into()));
        let rendered = format!("{context:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("tester"));
    }

    #[test]
    fn result_constructors() {
        let ok = AuthenticationResult::success("beta");
        assert!(ok.is_success());
        assert_eq!(ok.server_key.as_deref(), Some("beta"));

        let failed = AuthenticationResult::failure();
        assert!(!failed.is_success());
        assert_eq!(failed.server_key, None);
    }

    #[test]
    fn result_serializes_with_camel_case_key() {
        let ok = AuthenticationResult::success("default");
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["serverKey"], "default");

        let failed = serde_json::to_value(AuthenticationResult::failure()).unwrap();
        assert!(failed.get("serverKey").is_none());
    }

    #[test]
    fn user_details_default_to_empty_strings() {
        let details = UserDetails::default();
        assert_eq!(details.real_name, "");
        assert_eq!(details.email, "");
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["realName"], "");
        assert_eq!(json["email"], "");
    }

    #[test]
    fn metadata_passes_through() {
        let context =
            AuthenticationContext::new("tester", Some("pw".into())).with_metadata("remoteAddr", "10.0.0.1");
        assert_eq!(context.metadata.get("remoteAddr").map(String::as_str), Some("10.0.0.1"));
    }
}
