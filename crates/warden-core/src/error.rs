//! Error types for Warden

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("{0}")]
    Configuration(String),

    // Directory connectivity
    #[error("Unable to open LDAP connection: {0}")]
    Connection(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Failed to close LDAP connection: {0}")]
    Close(String),

    // Search errors
    #[error("Non unique result for {0}")]
    NonUniqueResult(String),

    #[error("Search failed for {spec}: {detail}")]
    Search { spec: String, detail: String },

    // Authentication bridge
    #[error("Unsupported callback: {0}")]
    UnsupportedCallback(String),

    // Autodiscovery
    #[error("DNS lookup failed: {0}")]
    Dns(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub fn connection(detail: impl std::fmt::Display) -> Self {
        Error::Connection(detail.to_string())
    }

    pub fn non_unique(spec: impl std::fmt::Display) -> Self {
        Error::NonUniqueResult(spec.to_string())
    }

    pub fn search(spec: impl std::fmt::Display, detail: impl std::fmt::Display) -> Self {
        Error::Search {
            spec: spec.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn unsupported_callback(kind: impl Into<String>) -> Self {
        Error::UnsupportedCallback(kind.into())
    }

    /// Stable machine-readable identifier for diagnostics output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Connection(_) => "connection",
            Error::InvalidCredentials => "invalid-credentials",
            Error::Close(_) => "close",
            Error::NonUniqueResult(_) | Error::Search { .. } => "search",
            Error::UnsupportedCallback(_) => "unsupported-callback",
            Error::Dns(_) => "dns",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }

    /// True for failures that mean "directory unreachable" rather than
    /// "request invalid"; startup probing treats these as fatal, per-call
    /// paths fold them into a negative result.
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_carries_fixed_prefix() {
        let err = Error::connection("refused by ldap://ldap.example.org:389");
        assert_eq!(
            err.to_string(),
            "Unable to open LDAP connection: refused by ldap://ldap.example.org:389"
        );
        assert!(err.is_connection());
    }

    #[test]
    fn non_unique_error_names_the_search() {
        let err = Error::non_unique("SearchSpec{baseDn=dc=example,dc=org}");
        assert_eq!(
            err.to_string(),
            "Non unique result for SearchSpec{baseDn=dc=example,dc=org}"
        );
        assert_eq!(err.kind(), "search");
    }

    #[test]
    fn configuration_error_is_verbatim() {
        let err = Error::configuration("The property 'ldap.url' is empty while it is mandatory");
        assert_eq!(
            err.to_string(),
            "The property 'ldap.url' is empty while it is mandatory"
        );
        assert!(err.is_configuration());
        assert!(!err.is_connection());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::InvalidCredentials.kind(), "invalid-credentials");
        assert_eq!(Error::Dns("timeout".into()).kind(), "dns");
        assert_eq!(Error::Close("broken pipe".into()).kind(), "close");
        assert_eq!(
            Error::search("SearchSpec{}", "boom").kind(),
            "search"
        );
        assert_eq!(
            Error::unsupported_callback("language").kind(),
            "unsupported-callback"
        );
    }

    #[test]
    fn search_error_includes_spec_and_detail() {
        let err = Error::search("SearchSpec{baseDn=dc=x}", "server down");
        assert_eq!(
            err.to_string(),
            "Search failed for SearchSpec{baseDn=dc=x}: server down"
        );
    }
}
