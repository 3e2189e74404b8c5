//! User detail lookup.
//!
//! Unlike authentication there is no server key to pin to, so every server
//! is consulted in declaration order and the first one knowing the login
//! answers. A login nobody knows is an absence, not an error.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};
use warden_core::{FetchUserDetails, Result, UserDetails};

use crate::mapping::UserMappingTemplate;
use crate::search::{Entry, SearchSpec};
use crate::settings::ResolvedServer;

pub struct UsersProvider {
    servers: Arc<Vec<ResolvedServer>>,
}

impl UsersProvider {
    pub fn new(servers: Arc<Vec<ResolvedServer>>) -> Self {
        Self { servers }
    }

    /// Real name and email of `username`, from the first server holding an
    /// entry for it.
    pub async fn user_details(&self, username: &str) -> Result<Option<UserDetails>> {
        for server in self.servers.iter() {
            match self.details_on(server, username).await {
                Ok(Some(details)) => {
                    debug!(user = %username, server = %server.key, "user details resolved");
                    return Ok(Some(details));
                }
                Ok(None) => {
                    debug!(user = %username, server = %server.key, "user not found");
                }
                Err(e) => {
                    error!(user = %username, server = %server.key, error = %e,
                        "unable to retrieve details for user");
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    async fn details_on(
        &self,
        server: &ResolvedServer,
        username: &str,
    ) -> Result<Option<UserDetails>> {
        let mapping = &server.user_mapping;
        let spec = SearchSpec::new(&mapping.base_dn)
            .request(&mapping.request)
            .parameters(mapping.search_parameters(username))
            .returns([
                mapping.real_name_attribute.clone(),
                mapping.email_attribute.clone(),
            ]);
        let entry = spec.find_unique(&server.factory).await?;
        Ok(entry.map(|entry| details_from_entry(&entry, mapping)))
    }
}

/// An attribute the entry lacks maps to an empty string, so a user without
/// an email address still surfaces with a blank one.
fn details_from_entry(entry: &Entry, mapping: &UserMappingTemplate) -> UserDetails {
    UserDetails {
        real_name: entry
            .first(&mapping.real_name_attribute)
            .unwrap_or_default()
            .to_string(),
        email: entry
            .first(&mapping.email_attribute)
            .unwrap_or_default()
            .to_string(),
    }
}

#[async_trait]
impl FetchUserDetails for UsersProvider {
    async fn user_details(&self, username: &str) -> Result<Option<UserDetails>> {
        UsersProvider::user_details(self, username).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn mapping() -> UserMappingTemplate {
        UserMappingTemplate {
            base_dn: "dc=example,dc=org".to_string(),
            request: "(&(objectClass=inetOrgPerson)(uid={0}))".to_string(),
            required_attributes: vec!["uid".to_string()],
            real_name_attribute: "cn".to_string(),
            email_attribute: "mail".to_string(),
        }
    }

    #[test]
    fn details_pick_the_mapped_attributes() {
        let mut attributes = HashMap::new();
        attributes.insert("cn".to_string(), vec!["Tester One".to_string()]);
        attributes.insert("mail".to_string(), vec!["tester@example.org".to_string()]);
        let entry = Entry {
            dn: "uid=tester,ou=people,dc=example,dc=org".to_string(),
            attributes,
        };
        let details = details_from_entry(&entry, &mapping());
        assert_eq!(details.real_name, "Tester One");
        assert_eq!(details.email, "tester@example.org");
    }

    #[test]
    fn missing_attributes_become_empty_strings() {
        let entry = Entry {
            dn: "uid=tester,ou=people,dc=example,dc=org".to_string(),
            attributes: HashMap::new(),
        };
        let details = details_from_entry(&entry, &mapping());
        assert_eq!(details.real_name, "");
        assert_eq!(details.email, "");
    }

    #[tokio::test]
    async fn empty_federation_knows_nobody() {
        let provider = UsersProvider::new(Arc::new(Vec::new()));
        assert_eq!(provider.user_details("tester").await.unwrap(), None);
    }
}
