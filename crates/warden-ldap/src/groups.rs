//! Group membership resolution.
//!
//! Lookups are pinned to one server by key, normally the key recorded in a
//! successful authentication, so a login resolved on `ad1` never picks up
//! groups from `ad2`. Posix and member-listing group schemes answer the
//! same compiled request; a set keeps the union free of duplicates.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};
use warden_core::{Error, ResolveGroups, Result};

use crate::mapping::GroupMappingTemplate;
use crate::search::{Entry, SearchSpec};
use crate::settings::ResolvedServer;

pub struct GroupsProvider {
    servers: Arc<Vec<ResolvedServer>>,
}

impl GroupsProvider {
    pub fn new(servers: Arc<Vec<ResolvedServer>>) -> Self {
        Self { servers }
    }

    /// Names of the groups holding `username` on the server registered
    /// under `server_key`. A user absent from the directory has no groups;
    /// a server without a group mapping answers the same way.
    pub async fn groups(&self, server_key: &str, username: &str) -> Result<BTreeSet<String>> {
        let Some(server) = self.servers.iter().find(|server| server.key == server_key) else {
            return Err(Error::configuration(format!(
                "Unknown LDAP server key '{server_key}'"
            )));
        };
        let Some(mapping) = &server.group_mapping else {
            debug!(server = %server.key, "no group mapping configured");
            return Ok(BTreeSet::new());
        };
        match self.resolve(server, mapping, username).await {
            Ok(groups) => Ok(groups),
            Err(e) => {
                error!(user = %username, server = %server.key, error = %e,
                    "unable to retrieve groups for user");
                Err(e)
            }
        }
    }

    async fn resolve(
        &self,
        server: &ResolvedServer,
        mapping: &GroupMappingTemplate,
        username: &str,
    ) -> Result<BTreeSet<String>> {
        let user_mapping = &server.user_mapping;
        let user_spec = SearchSpec::new(&user_mapping.base_dn)
            .request(&user_mapping.request)
            .parameters(user_mapping.search_parameters(username))
            .returns(mapping.required_user_attributes.clone());
        let Some(user) = user_spec.find_unique(&server.factory).await? else {
            debug!(user = %username, server = %server.key, "user not found, no groups");
            return Ok(BTreeSet::new());
        };

        let spec = SearchSpec::new(&mapping.base_dn)
            .request(&mapping.request)
            .parameters(group_parameters(&user, mapping))
            .returns([mapping.id_attribute.clone()]);
        let mut cursor = spec.find(&server.factory).await?;
        let mut groups = BTreeSet::new();
        while let Some(entry) = cursor.next().await? {
            if let Some(name) = entry.first(&mapping.id_attribute) {
                groups.insert(name.to_string());
            }
        }
        debug!(user = %username, server = %server.key, count = groups.len(),
            "groups resolved");
        Ok(groups)
    }
}

/// One parameter per required user attribute, in template order. A value
/// the user entry lacks becomes an empty string rather than aborting the
/// lookup.
fn group_parameters(user: &Entry, mapping: &GroupMappingTemplate) -> Vec<String> {
    mapping
        .required_user_attributes
        .iter()
        .map(|attribute| match user.value_of(attribute) {
            Some(value) => value.to_string(),
            None => {
                debug!(attribute = %attribute, dn = %user.dn,
                    "user entry lacks attribute, substituting an empty value");
                String::new()
            }
        })
        .collect()
}

#[async_trait]
impl ResolveGroups for GroupsProvider {
    async fn groups(&self, server_key: &str, username: &str) -> Result<BTreeSet<String>> {
        GroupsProvider::groups(self, server_key, username).await
    }
}
