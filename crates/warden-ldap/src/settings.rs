//! Per-server topology from raw configuration.
//!
//! Configuration comes in two mutually exclusive shapes. A single server
//! uses bare `ldap.*` properties and is treated as a federation of one,
//! keyed `default`. A federation declares `ldap.servers = "a,b"` and
//! prefixes every property with its server key (`ldap.a.url`, …).
//! Validation is lazy: building a [`SettingsManager`] never fails, errors
//! surface when a topology is first requested. When a server's URL or base
//! DN is missing, the deprecated DNS fallback kicks in and a warning names
//! the property to set, once per property.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};
use warden_core::{Error, Result, Settings};

use crate::autodiscovery::{self, Autodiscovery, SrvRecord};
use crate::connection::{AuthMethod, ContextFactory, ServerDescriptor};
use crate::mapping::{
    compile_template, GroupMappingTemplate, UserMappingTemplate, DEFAULT_EMAIL_ATTRIBUTE,
    DEFAULT_GROUP_ID_ATTRIBUTE, DEFAULT_GROUP_REQUEST, DEFAULT_REAL_NAME_ATTRIBUTE,
    DEFAULT_USER_REQUEST,
};

/// Key of the implicit server in single-server configurations.
pub const DEFAULT_SERVER_KEY: &str = "default";

// ============================================================================
// Server keys
// ============================================================================

/// One declared server and how its properties are spelled.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServerKey {
    key: String,
    /// Federated servers prefix every property with their key.
    prefixed: bool,
}

impl ServerKey {
    fn prop(&self, suffix: &str) -> String {
        if self.prefixed {
            format!("ldap.{}.{}", self.key, suffix)
        } else {
            format!("ldap.{suffix}")
        }
    }
}

fn split_urls(value: &str) -> Vec<String> {
    value
        .split([',', ' '])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Settings manager
// ============================================================================

/// Parses raw settings into per-server descriptors and mapping templates.
pub struct SettingsManager {
    settings: Settings,
    /// Properties a deprecation warning was already emitted for.
    warned: Mutex<HashSet<String>>,
}

impl SettingsManager {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_federated(&self) -> bool {
        self.settings.get("ldap.servers").is_some()
    }

    fn server_keys(&self) -> Result<Vec<ServerKey>> {
        let Some(list) = self.settings.get("ldap.servers") else {
            return Ok(vec![ServerKey {
                key: DEFAULT_SERVER_KEY.to_string(),
                prefixed: false,
            }]);
        };
        if self.settings.get("ldap.url").is_some() {
            return Err(Error::configuration(
                "The properties 'ldap.servers' and 'ldap.url' cannot be combined; prefix every \
                 LDAP property with one of the declared server keys",
            ));
        }
        let mut keys: Vec<ServerKey> = Vec::new();
        for key in list.split(',').map(str::trim).filter(|key| !key.is_empty()) {
            if keys.iter().any(|existing| existing.key == key) {
                return Err(Error::configuration(format!(
                    "Duplicate server key '{key}' in the property 'ldap.servers'"
                )));
            }
            keys.push(ServerKey {
                key: key.to_string(),
                prefixed: true,
            });
        }
        if keys.is_empty() {
            return Err(Error::configuration(
                "The property 'ldap.servers' is empty while it is mandatory",
            ));
        }
        Ok(keys)
    }

    /// Domain for the deprecated DNS fallback: the realm hint when present,
    /// the local host's domain otherwise.
    fn discovery_domain(&self, server: &ServerKey) -> Option<String> {
        self.settings
            .get(&server.prop("realm"))
            .map(str::to_string)
            .or_else(autodiscovery::local_domain)
    }

    async fn server_urls(&self, server: &ServerKey) -> Result<Vec<String>> {
        let url_prop = server.prop("url");
        if let Some(value) = self.settings.get(&url_prop) {
            let urls = split_urls(value);
            if urls.is_empty() {
                return Err(Error::configuration(format!(
                    "The property '{url_prop}' is empty while it is mandatory"
                )));
            }
            return Ok(urls);
        }

        let Some(domain) = self.discovery_domain(server) else {
            return Err(Error::configuration(format!(
                "The property '{url_prop}' is empty while it is mandatory"
            )));
        };
        self.warn_once(
            &url_prop,
            format!(
                "The property '{url_prop}' is not set; discovering servers for domain \
                 '{domain}' through DNS SRV records. Set '{url_prop}' to silence this warning."
            ),
        );
        let records = Autodiscovery::new()?.ldap_servers(&domain).await?;
        let mut seen: HashSet<SrvRecord> = HashSet::new();
        let mut urls = Vec::new();
        for record in records {
            // Records arrive sorted and identity is URL-only, so a server
            // advertised twice keeps its best-ranked position.
            if seen.insert(record.clone()) {
                urls.push(record.url);
            }
        }
        if urls.is_empty() {
            return Err(Error::configuration(format!(
                "LDAP server autodiscovery for domain '{domain}' returned no servers; set the \
                 property '{url_prop}'"
            )));
        }
        info!(server = %server.key, domain = %domain, count = urls.len(),
            "LDAP servers discovered through DNS");
        Ok(urls)
    }

    async fn build_descriptor(&self, server: &ServerKey) -> Result<ServerDescriptor> {
        let urls = self.server_urls(server).await?;

        let auth_prop = server.prop("authentication");
        let auth_method = match self.settings.get(&auth_prop) {
            Some(value) => AuthMethod::parse(value, &auth_prop)?,
            None => AuthMethod::default(),
        };

        let tls_prop = server.prop("StartTLS");
        let start_tls = match self.settings.get(&tls_prop) {
            Some(value) => value.to_ascii_lowercase().parse::<bool>().map_err(|_| {
                Error::configuration(format!(
                    "The property '{tls_prop}' must be true or false, got '{value}'"
                ))
            })?,
            None => false,
        };

        let timeout_prop = server.prop("connectTimeout");
        let connect_timeout = match self.settings.get(&timeout_prop) {
            Some(value) => {
                let seconds = value.parse::<u64>().map_err(|_| {
                    Error::configuration(format!(
                        "The property '{timeout_prop}' must be a number of seconds, got '{value}'"
                    ))
                })?;
                Some(Duration::from_secs(seconds))
            }
            None => None,
        };

        Ok(ServerDescriptor {
            key: server.key.clone(),
            urls,
            bind_dn: self.settings.get(&server.prop("bindDn")).map(str::to_string),
            bind_password: self
                .settings
                .get(&server.prop("bindPassword"))
                .map(str::to_string),
            auth_method,
            realm: self.settings.get(&server.prop("realm")).map(str::to_string),
            start_tls,
            connect_timeout,
        })
    }

    fn user_mapping(&self, server: &ServerKey) -> Result<UserMappingTemplate> {
        let base_prop = server.prop("user.baseDn");
        let base_dn = match self.settings.get(&base_prop) {
            Some(base) => base.to_string(),
            None => {
                let Some(domain) = self.discovery_domain(server) else {
                    return Err(Error::configuration(format!(
                        "The property '{base_prop}' is empty while it is mandatory"
                    )));
                };
                self.warn_once(
                    &base_prop,
                    format!(
                        "The property '{base_prop}' is not set; deriving the user base DN from \
                         domain '{domain}'. Set '{base_prop}' to silence this warning."
                    ),
                );
                autodiscovery::domain_dn(&domain)
            }
        };
        let request = self
            .settings
            .get(&server.prop("user.request"))
            .unwrap_or(DEFAULT_USER_REQUEST);
        let compiled = compile_template(request);
        Ok(UserMappingTemplate {
            base_dn,
            request: compiled.request,
            required_attributes: compiled.attributes,
            real_name_attribute: self
                .settings
                .get(&server.prop("user.realNameAttribute"))
                .unwrap_or(DEFAULT_REAL_NAME_ATTRIBUTE)
                .to_string(),
            email_attribute: self
                .settings
                .get(&server.prop("user.emailAttribute"))
                .unwrap_or(DEFAULT_EMAIL_ATTRIBUTE)
                .to_string(),
        })
    }

    /// A server maps groups only when a group base DN exists, explicitly or
    /// derived from the realm hint.
    fn group_mapping(&self, server: &ServerKey) -> Option<GroupMappingTemplate> {
        let base_prop = server.prop("group.baseDn");
        let base_dn = match self.settings.get(&base_prop) {
            Some(base) => base.to_string(),
            None => {
                let realm = self.settings.get(&server.prop("realm"))?;
                self.warn_once(
                    &base_prop,
                    format!(
                        "The property '{base_prop}' is not set; deriving the group base DN from \
                         realm '{realm}'. Set '{base_prop}' to silence this warning."
                    ),
                );
                autodiscovery::domain_dn(realm)
            }
        };
        let request = self
            .settings
            .get(&server.prop("group.request"))
            .unwrap_or(DEFAULT_GROUP_REQUEST);
        let compiled = compile_template(request);
        Some(GroupMappingTemplate {
            base_dn,
            id_attribute: self
                .settings
                .get(&server.prop("group.idAttribute"))
                .unwrap_or(DEFAULT_GROUP_ID_ATTRIBUTE)
                .to_string(),
            request: compiled.request,
            required_user_attributes: compiled.attributes,
        })
    }

    /// One context factory per declared server, in declaration order.
    pub async fn resolve(&self) -> Result<Vec<(String, ContextFactory)>> {
        let mut factories = Vec::new();
        for server in self.server_keys()? {
            let descriptor = self.build_descriptor(&server).await?;
            factories.push((server.key.clone(), ContextFactory::new(descriptor)));
        }
        Ok(factories)
    }

    /// One user mapping per declared server, in declaration order.
    pub fn user_mappings(&self) -> Result<Vec<(String, UserMappingTemplate)>> {
        let mut mappings = Vec::new();
        for server in self.server_keys()? {
            mappings.push((server.key.clone(), self.user_mapping(&server)?));
        }
        Ok(mappings)
    }

    /// Group mappings for the servers that have one, in declaration order.
    pub fn group_mappings(&self) -> Result<Vec<(String, GroupMappingTemplate)>> {
        let mut mappings = Vec::new();
        for server in self.server_keys()? {
            if let Some(mapping) = self.group_mapping(&server) {
                mappings.push((server.key.clone(), mapping));
            }
        }
        Ok(mappings)
    }

    /// The full topology: factory plus mappings per server, in declaration
    /// order. This is what the capability providers are built from.
    pub async fn topology(&self) -> Result<Vec<ResolvedServer>> {
        let mut servers = Vec::new();
        for server in self.server_keys()? {
            let descriptor = self.build_descriptor(&server).await?;
            let user_mapping = self.user_mapping(&server)?;
            let group_mapping = self.group_mapping(&server);
            info!(server = %server.key, base_dn = %user_mapping.base_dn,
                groups = group_mapping.is_some(), "LDAP server resolved");
            servers.push(ResolvedServer {
                key: server.key.clone(),
                factory: ContextFactory::new(descriptor),
                user_mapping,
                group_mapping,
            });
        }
        Ok(servers)
    }

    /// Emit a warning once per property. Returns whether this call was the
    /// one that emitted it.
    fn warn_once(&self, property: &str, message: String) -> bool {
        let mut warned = self.warned.lock();
        if warned.insert(property.to_string()) {
            warn!("{}", message);
            true
        } else {
            false
        }
    }
}

// ============================================================================
// Resolved topology
// ============================================================================

/// One fully resolved server: connection factory plus mapping templates.
#[derive(Debug, Clone)]
pub struct ResolvedServer {
    pub key: String,
    pub factory: ContextFactory,
    pub user_mapping: UserMappingTemplate,
    pub group_mapping: Option<GroupMappingTemplate>,
}
