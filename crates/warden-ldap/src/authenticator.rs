//! Credential verification across the federation.
//!
//! Servers are tried in declaration order and the first accepting bind
//! wins; its key is recorded in the result so later group lookups stay on
//! the same server. Every failure mode, including an unreachable server,
//! folds into a negative result. Callers watching for outages get their
//! signal from the warning log and from startup probing, not from
//! authentication outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use warden_core::{Authenticate, AuthenticationContext, AuthenticationResult, Error, Result};

use crate::search::SearchSpec;
use crate::settings::ResolvedServer;

pub struct Authenticator {
    servers: Arc<Vec<ResolvedServer>>,
}

#[derive(Clone)]
enum BindOutcome {
    Success,
    UserNotFound,
    Rejected,
    Unavailable(String),
}

/// One directory a credential pair can be tried against.
#[async_trait]
trait BindTarget {
    fn key(&self) -> &str;
    async fn bind(&self, username: &str, secret: &str) -> BindOutcome;
}

impl Authenticator {
    pub fn new(servers: Arc<Vec<ResolvedServer>>) -> Self {
        Self { servers }
    }

    pub async fn authenticate(&self, context: &AuthenticationContext) -> AuthenticationResult {
        let Some(secret) = context.usable_secret() else {
            debug!(user = %context.username, "blank secret, failing without a directory round-trip");
            return AuthenticationResult::failure();
        };
        bind_in_order(self.servers.as_slice(), &context.username, secret).await
    }
}

/// Walk the federation in declaration order. The first accepting server
/// ends the walk; every other outcome moves on to the next server.
async fn bind_in_order<T>(targets: &[T], username: &str, secret: &str) -> AuthenticationResult
where
    T: BindTarget + Sync,
{
    for target in targets {
        match target.bind(username, secret).await {
            BindOutcome::Success => {
                info!(user = %username, server = %target.key(), "authentication succeeded");
                return AuthenticationResult::success(target.key().to_string());
            }
            BindOutcome::UserNotFound => {
                debug!(user = %username, server = %target.key(), "user not found");
            }
            BindOutcome::Rejected => {
                debug!(user = %username, server = %target.key(), "credentials rejected");
            }
            BindOutcome::Unavailable(detail) => {
                warn!(user = %username, server = %target.key(), error = %detail,
                    "server unavailable during authentication");
            }
        }
    }
    AuthenticationResult::failure()
}

#[async_trait]
impl BindTarget for ResolvedServer {
    fn key(&self) -> &str {
        &self.key
    }

    async fn bind(&self, username: &str, secret: &str) -> BindOutcome {
        // SASL mechanisms identify the user by bare login; simple binds
        // need the DN, resolved through a service-side search first.
        let principal = if self.factory.descriptor().auth_method.is_sasl() {
            username.to_string()
        } else {
            match user_dn(self, username).await {
                Ok(Some(dn)) => dn,
                Ok(None) => return BindOutcome::UserNotFound,
                Err(e) => return BindOutcome::Unavailable(e.to_string()),
            }
        };

        match self.factory.open_user(&principal, secret).await {
            Ok(ldap) => {
                self.factory.close(ldap).await;
                BindOutcome::Success
            }
            Err(Error::InvalidCredentials) => BindOutcome::Rejected,
            Err(e) => BindOutcome::Unavailable(e.to_string()),
        }
    }
}

async fn user_dn(server: &ResolvedServer, username: &str) -> Result<Option<String>> {
    let mapping = &server.user_mapping;
    let spec = SearchSpec::new(&mapping.base_dn)
        .request(&mapping.request)
        .parameters(mapping.search_parameters(username))
        .returns(["dn"]);
    let entry = spec.find_unique(&server.factory).await?;
    Ok(entry.map(|entry| entry.dn))
}

#[async_trait]
impl Authenticate for Authenticator {
    async fn authenticate(&self, context: &AuthenticationContext) -> AuthenticationResult {
        Authenticator::authenticate(self, context).await
    }
}
