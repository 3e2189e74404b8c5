//! LDAP connections and bind methods.
//!
//! A [`ServerDescriptor`] carries everything needed to reach one directory:
//! the candidate URLs, the bind method with its credentials, and the
//! StartTLS and timeout choices. [`ContextFactory`] turns a descriptor into
//! live sessions, either bound with the configured service credentials or
//! bound as the person being authenticated. When no candidate URL answers,
//! the failure surfaces as [`Error::Connection`].

use std::fmt;
use std::time::Duration;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;
use warden_core::{Error, Result};

// ============================================================================
// Bind methods
// ============================================================================

/// How a session proves itself to the directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMethod {
    Anonymous,
    #[default]
    Simple,
    CramMd5,
    DigestMd5,
    Gssapi,
}

impl AuthMethod {
    /// Parse a configured method name, case-insensitively. The property
    /// name only feeds the error message.
    pub fn parse(value: &str, property: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anonymous" => Ok(AuthMethod::Anonymous),
            "simple" => Ok(AuthMethod::Simple),
            "cram-md5" => Ok(AuthMethod::CramMd5),
            "digest-md5" => Ok(AuthMethod::DigestMd5),
            "gssapi" => Ok(AuthMethod::Gssapi),
            _ => Err(Error::configuration(format!(
                "Unknown authentication method '{value}' for the property '{property}'"
            ))),
        }
    }

    /// True for SASL mechanisms, which bind with the bare login instead of
    /// a resolved DN.
    pub fn is_sasl(self) -> bool {
        matches!(
            self,
            AuthMethod::CramMd5 | AuthMethod::DigestMd5 | AuthMethod::Gssapi
        )
    }

    /// True for mechanisms that answer a server challenge instead of
    /// shipping the secret in the bind request.
    pub fn is_challenge_response(self) -> bool {
        matches!(self, AuthMethod::CramMd5 | AuthMethod::DigestMd5)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMethod::Anonymous => "anonymous",
            AuthMethod::Simple => "simple",
            AuthMethod::CramMd5 => "CRAM-MD5",
            AuthMethod::DigestMd5 => "DIGEST-MD5",
            AuthMethod::Gssapi => "GSSAPI",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Server descriptor
// ============================================================================

/// Everything needed to reach and bind against one directory server.
#[derive(Clone)]
pub struct ServerDescriptor {
    pub key: String,
    /// Candidate URLs, tried in order until one connects.
    pub urls: Vec<String>,
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
    pub auth_method: AuthMethod,
    pub realm: Option<String>,
    pub start_tls: bool,
    pub connect_timeout: Option<Duration>,
}

impl fmt::Debug for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerDescriptor")
            .field("key", &self.key)
            .field("urls", &self.urls)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &self.bind_password.as_ref().map(|_| "***"))
            .field("auth_method", &self.auth_method)
            .field("realm", &self.realm)
            .field("start_tls", &self.start_tls)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServerDescriptor{{key={}, urls=[{}], authentication={}, bindDn={}, realm={}, startTls={}}}",
            self.key,
            self.urls.join(", "),
            self.auth_method,
            self.bind_dn.as_deref().unwrap_or("-"),
            self.realm.as_deref().unwrap_or("-"),
            self.start_tls
        )
    }
}

/// What the root DSE of a reachable server reported.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub url: String,
    pub vendor_name: Option<String>,
    pub vendor_version: Option<String>,
    pub naming_contexts: Vec<String>,
}

// ============================================================================
// Context factory
// ============================================================================

/// Opens connections against one server on demand. Every session is fresh;
/// nothing is pooled or kept alive between calls.
#[derive(Debug, Clone)]
pub struct ContextFactory {
    descriptor: ServerDescriptor,
}

impl ContextFactory {
    pub fn new(descriptor: ServerDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    fn conn_settings(&self) -> LdapConnSettings {
        let mut settings = LdapConnSettings::new();
        if let Some(timeout) = self.descriptor.connect_timeout {
            settings = settings.set_conn_timeout(timeout);
        }
        if self.descriptor.start_tls {
            settings = settings.set_starttls(true);
        }
        settings
    }

    /// Connect to the first candidate URL that answers, without binding.
    async fn connect(&self) -> Result<(Ldap, Url)> {
        let mut last_error: Option<String> = None;
        for candidate in &self.descriptor.urls {
            let url = match Url::parse(candidate) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = %candidate, error = %e, "skipping malformed LDAP URL");
                    last_error = Some(format!("{candidate}: {e}"));
                    continue;
                }
            };
            match LdapConnAsync::with_settings(self.conn_settings(), candidate).await {
                Ok((conn, ldap)) => {
                    // Drive the connection until the Ldap handles drop it.
                    tokio::spawn(async move {
                        if let Err(e) = conn.drive().await {
                            warn!(error = %e, "LDAP connection driver exited");
                        }
                    });
                    debug!(server = %self.descriptor.key, url = %candidate, "connected");
                    return Ok((ldap, url));
                }
                Err(e) => {
                    warn!(server = %self.descriptor.key, url = %candidate, error = %e,
                        "connection attempt failed");
                    last_error = Some(format!("{candidate}: {e}"));
                }
            }
        }
        Err(Error::connection(last_error.unwrap_or_else(|| {
            format!("no URL configured for server '{}'", self.descriptor.key)
        })))
    }

    /// Connect and bind with the configured service credentials.
    async fn service_session(&self) -> Result<(Ldap, Url)> {
        let (mut ldap, url) = self.connect().await?;
        match self.descriptor.auth_method {
            // Without a bind DN the service session stays anonymous, which
            // plenty of read-only directories allow.
            AuthMethod::Anonymous => {}
            AuthMethod::Simple => {
                if let Some(bind_dn) = &self.descriptor.bind_dn {
                    let password = self.descriptor.bind_password.as_deref().unwrap_or("");
                    match ldap.simple_bind(bind_dn, password).await {
                        Ok(result) if result.rc == 0 => {
                            debug!(server = %self.descriptor.key, url = %url, bind_dn = %bind_dn,
                                "service bind succeeded");
                        }
                        Ok(result) => {
                            let _ = ldap.unbind().await;
                            return Err(Error::connection(format!(
                                "service bind as '{}' rejected with result code {}",
                                bind_dn, result.rc
                            )));
                        }
                        Err(e) => {
                            let _ = ldap.unbind().await;
                            return Err(Error::connection(e));
                        }
                    }
                }
            }
            method @ (AuthMethod::CramMd5 | AuthMethod::DigestMd5) => {
                let _ = ldap.unbind().await;
                return Err(Error::connection(format!(
                    "{method} binds are not supported by this client, use simple or GSSAPI \
                     authentication"
                )));
            }
            AuthMethod::Gssapi => {
                #[cfg(feature = "gssapi")]
                {
                    let host = url.host_str().unwrap_or_default().to_string();
                    match ldap.sasl_gssapi_bind(&host).await {
                        Ok(result) if result.rc == 0 => {}
                        Ok(result) => {
                            let _ = ldap.unbind().await;
                            return Err(Error::connection(format!(
                                "GSSAPI service bind rejected with result code {}",
                                result.rc
                            )));
                        }
                        Err(e) => {
                            let _ = ldap.unbind().await;
                            return Err(Error::connection(e));
                        }
                    }
                }
                #[cfg(not(feature = "gssapi"))]
                {
                    let _ = ldap.unbind().await;
                    return Err(Error::connection(
                        "GSSAPI authentication requires the gssapi feature",
                    ));
                }
            }
        }
        Ok((ldap, url))
    }

    /// A session bound with the configured service credentials. The search
    /// engine opens one of these per query.
    pub async fn open_service(&self) -> Result<Ldap> {
        self.service_session().await.map(|(ldap, _)| ldap)
    }

    /// A session bound as the user being authenticated. A rejected bind is
    /// [`Error::InvalidCredentials`]; an unreachable server keeps its
    /// connection-error identity so callers can tell the two apart.
    ///
    /// For simple methods the principal is the resolved DN; SASL mechanisms
    /// take the bare login.
    pub async fn open_user(&self, principal: &str, secret: &str) -> Result<Ldap> {
        let (mut ldap, url) = self.connect().await?;
        debug!(server = %self.descriptor.key, url = %url, principal = %principal,
            method = %self.descriptor.auth_method, "authenticating user");
        match self.descriptor.auth_method {
            // Anonymous only applies to the service session; people always
            // bind with their own DN and password.
            AuthMethod::Anonymous | AuthMethod::Simple => {
                match ldap.simple_bind(principal, secret).await {
                    Ok(result) if result.rc == 0 => {}
                    Ok(result) => {
                        // rc 49 invalid credentials, rc 53 account disabled
                        debug!(server = %self.descriptor.key, rc = result.rc,
                            "user bind rejected");
                        let _ = ldap.unbind().await;
                        return Err(Error::InvalidCredentials);
                    }
                    Err(e) => {
                        let _ = ldap.unbind().await;
                        return Err(Error::connection(e));
                    }
                }
            }
            method @ (AuthMethod::CramMd5 | AuthMethod::DigestMd5) => {
                let _ = ldap.unbind().await;
                return Err(Error::connection(format!(
                    "{method} binds are not supported by this client, use simple or GSSAPI \
                     authentication"
                )));
            }
            AuthMethod::Gssapi => {
                #[cfg(feature = "gssapi")]
                {
                    // Kerberos single sign-on: the ticket cache vouches for
                    // the principal, the supplied secret stays unused.
                    let host = url.host_str().unwrap_or_default().to_string();
                    match ldap.sasl_gssapi_bind(&host).await {
                        Ok(result) if result.rc == 0 => {}
                        Ok(result) => {
                            debug!(server = %self.descriptor.key, rc = result.rc,
                                "GSSAPI bind rejected");
                            let _ = ldap.unbind().await;
                            return Err(Error::InvalidCredentials);
                        }
                        Err(e) => {
                            let _ = ldap.unbind().await;
                            return Err(Error::connection(e));
                        }
                    }
                }
                #[cfg(not(feature = "gssapi"))]
                {
                    let _ = ldap.unbind().await;
                    return Err(Error::connection(
                        "GSSAPI authentication requires the gssapi feature",
                    ));
                }
            }
        }
        Ok(ldap)
    }

    /// Open and close a service session, proving the server is reachable
    /// and the service credentials still work.
    pub async fn probe(&self) -> Result<()> {
        let ldap = self.open_service().await?;
        self.close(ldap).await;
        Ok(())
    }

    /// Query the root DSE of a reachable server. With `strict_close` the
    /// closing unbind must succeed too, turning a half-broken connection
    /// into a visible [`Error::Close`].
    pub async fn server_info(&self, strict_close: bool) -> Result<ServerInfo> {
        let (mut ldap, url) = self.service_session().await?;
        let outcome = ldap
            .search(
                "",
                Scope::Base,
                "(objectClass=*)",
                vec!["vendorName", "vendorVersion", "namingContexts"],
            )
            .await
            .and_then(|result| result.success());
        let entries = match outcome {
            Ok((entries, _)) => entries,
            Err(e) => {
                let _ = ldap.unbind().await;
                return Err(Error::search("root DSE", e));
            }
        };

        let mut info = ServerInfo {
            url: url.to_string(),
            vendor_name: None,
            vendor_version: None,
            naming_contexts: Vec::new(),
        };
        if let Some(entry) = entries.into_iter().next() {
            let entry = SearchEntry::construct(entry);
            info.vendor_name = entry.attrs.get("vendorName").and_then(|v| v.first()).cloned();
            info.vendor_version = entry
                .attrs
                .get("vendorVersion")
                .and_then(|v| v.first())
                .cloned();
            info.naming_contexts = entry.attrs.get("namingContexts").cloned().unwrap_or_default();
        }

        if strict_close {
            self.close_strict(ldap).await?;
        } else {
            self.close(ldap).await;
        }
        Ok(info)
    }

    /// Release a session, swallowing unbind noise.
    pub async fn close(&self, mut ldap: Ldap) {
        if let Err(e) = ldap.unbind().await {
            debug!(server = %self.descriptor.key, error = %e, "unbind failed");
        }
    }

    /// Release a session, reporting an unbind failure instead of hiding it.
    pub async fn close_strict(&self, mut ldap: Ldap) -> Result<()> {
        ldap.unbind()
            .await
            .map_err(|e| Error::Close(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(urls: Vec<String>) -> ServerDescriptor {
        ServerDescriptor {
            key: "default".to_string(),
            urls,
            bind_dn: None,
            bind_password: None,
            auth_method: AuthMethod::Anonymous,
            realm: None,
            start_tls: false,
            connect_timeout: Some(Duration::from_secs(1)),
        }
    }

    #[test]
    fn parses_every_method_case_insensitively() {
        let prop = "ldap.authentication";
        assert_eq!(AuthMethod::parse("anonymous", prop).unwrap(), AuthMethod::Anonymous);
        assert_eq!(AuthMethod::parse("Simple", prop).unwrap(), AuthMethod::Simple);
        assert_eq!(AuthMethod::parse("CRAM-MD5", prop).unwrap(), AuthMethod::CramMd5);
        assert_eq!(AuthMethod::parse("digest-md5", prop).unwrap(), AuthMethod::DigestMd5);
        assert_eq!(AuthMethod::parse("GSSAPI", prop).unwrap(), AuthMethod::Gssapi);
    }

    #[test]
    fn unknown_method_names_the_property() {
        let err = AuthMethod::parse("kerberos", "ldap.example.authentication").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown authentication method 'kerberos' for the property \
             'ldap.example.authentication'"
        );
    }

    #[test]
    fn method_defaults_to_simple() {
        assert_eq!(AuthMethod::default(), AuthMethod::Simple);
    }

    #[test]
    fn sasl_and_challenge_response_classification() {
        assert!(!AuthMethod::Anonymous.is_sasl());
        assert!(!AuthMethod::Simple.is_sasl());
        assert!(AuthMethod::CramMd5.is_sasl());
        assert!(AuthMethod::DigestMd5.is_sasl());
        assert!(AuthMethod::Gssapi.is_sasl());

        assert!(AuthMethod::CramMd5.is_challenge_response());
        assert!(AuthMethod::DigestMd5.is_challenge_response());
        assert!(!AuthMethod::Gssapi.is_challenge_response());
    }

    #[test]
    fn method_display_uses_canonical_names() {
        assert_eq!(AuthMethod::Anonymous.to_string(), "anonymous");
        assert_eq!(AuthMethod::Simple.to_string(), "simple");
        assert_eq!(AuthMethod::CramMd5.to_string(), "CRAM-MD5");
        assert_eq!(AuthMethod::DigestMd5.to_string(), "DIGEST-MD5");
        assert_eq!(AuthMethod::Gssapi.to_string(), "GSSAPI");
    }

    #[test]
    fn descriptor_debug_redacts_the_password() {
        let mut d = descriptor(vec!["ldap://ldap.example.org:389".to_string()]);
        d.bind_dn = Some("cn=service,dc=example,dc=org".to_string());
        d.bind_password = Some("s3cr3t".to_string());
        let rendered = format!("{d:?}");
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("***"));
        assert!(rendered.contains("cn=service,dc=example,dc=org"));
    }

    #[test]
    fn descriptor_display_names_the_method() {
        let mut d = descriptor(vec!["ldap://ldap.example.org:389".to_string()]);
        d.auth_method = AuthMethod::Simple;
        let rendered = d.to_string();
        assert!(rendered.contains("key=default"));
        assert!(rendered.contains("authentication=simple"));
        assert!(rendered.contains("urls=[ldap://ldap.example.org:389]"));
    }

    #[tokio::test]
    async fn unreachable_server_yields_a_connection_error() {
        // Nothing listens on port 1; the connect fails immediately.
        let factory = ContextFactory::new(descriptor(vec!["ldap://127.0.0.1:1".to_string()]));
        let err = factory.open_service().await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn malformed_url_is_reported_not_panicked() {
        let factory = ContextFactory::new(descriptor(vec!["not a url".to_string()]));
        let err = factory.open_service().await.unwrap_err();
        assert!(err.is_connection());
        assert!(err.to_string().contains("not a url"));
    }
}
