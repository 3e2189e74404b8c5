//! Composition root and lifecycle.
//!
//! [`Realm::start`] resolves the full topology from settings and probes
//! each server once. A failed probe is reported but does not withhold the
//! capability providers; later calls carry their own diagnostics and a
//! server may well be back by then. A configuration error, by contrast,
//! leaves the realm unstarted since no topology exists to serve from.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info};
use warden_core::{Error, Result, Settings};

use crate::authenticator::Authenticator;
use crate::groups::GroupsProvider;
use crate::settings::{ResolvedServer, SettingsManager};
use crate::users::UsersProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealmState {
    Uninitialized,
    /// Every configured server answered its startup probe.
    Started,
    /// At least one probe failed; the providers exist regardless.
    Degraded,
    Stopped,
}

impl fmt::Display for RealmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RealmState::Uninitialized => f.write_str("uninitialized"),
            RealmState::Started => f.write_str("started"),
            RealmState::Degraded => f.write_str("degraded"),
            RealmState::Stopped => f.write_str("stopped"),
        }
    }
}

pub struct Realm {
    settings: SettingsManager,
    servers: Option<Arc<Vec<ResolvedServer>>>,
    state: RealmState,
}

impl Realm {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: SettingsManager::new(settings),
            servers: None,
            state: RealmState::Uninitialized,
        }
    }

    pub fn name(&self) -> &'static str {
        "LDAP"
    }

    pub fn state(&self) -> RealmState {
        self.state
    }

    /// Resolve the topology and probe every server once. The providers are
    /// registered before probing, so a connection error here degrades the
    /// realm instead of disabling it.
    pub async fn start(&mut self) -> Result<()> {
        let servers = Arc::new(self.settings.topology().await?);
        self.servers = Some(servers.clone());

        let mut first_failure: Option<Error> = None;
        for server in servers.iter() {
            match server.factory.probe().await {
                Ok(()) => info!(server = %server.key, "LDAP server reachable"),
                Err(e) => {
                    error!(server = %server.key, error = %e, "connectivity probe failed");
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }
        match first_failure {
            None => {
                self.state = RealmState::Started;
                info!(servers = servers.len(), "LDAP realm started");
                Ok(())
            }
            Some(e) => {
                self.state = RealmState::Degraded;
                Err(e)
            }
        }
    }

    /// Nothing is held between calls, so stopping only forgets the
    /// topology.
    pub fn stop(&mut self) {
        self.servers = None;
        self.state = RealmState::Stopped;
        info!("LDAP realm stopped");
    }

    pub fn authenticator(&self) -> Option<Authenticator> {
        self.servers
            .as_ref()
            .map(|servers| Authenticator::new(servers.clone()))
    }

    pub fn groups_provider(&self) -> Option<GroupsProvider> {
        self.servers
            .as_ref()
            .map(|servers| GroupsProvider::new(servers.clone()))
    }

    pub fn users_provider(&self) -> Option<UsersProvider> {
        self.servers
            .as_ref()
            .map(|servers| UsersProvider::new(servers.clone()))
    }
}
