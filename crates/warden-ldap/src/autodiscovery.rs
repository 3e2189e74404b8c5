//! DNS-based LDAP server discovery.
//!
//! Active Directory and most ceremonial LDAP deployments publish their
//! servers as `_ldap._tcp.<domain>` SRV records. When no server URL is
//! configured explicitly, the domain (from `ldap.realm` or the local host
//! name) is queried and every advertised server becomes a candidate,
//! ordered by SRV priority and weight.

use hickory_resolver::{
    Resolver, TokioResolver, name_server::TokioConnectionProvider, system_conf::read_system_conf,
};
use tracing::{debug, warn};
use warden_core::{Error, Result};

/// One `_ldap._tcp` SRV record, reduced to a connectable URL.
///
/// Identity is the URL alone; priority and weight only order candidates,
/// so the same server advertised twice collapses to one record.
#[derive(Debug, Clone)]
pub struct SrvRecord {
    pub url: String,
    pub priority: u16,
    pub weight: u16,
}

impl SrvRecord {
    /// Ascending sort key per RFC 2782: lowest priority first, then weight.
    pub fn sort_key(&self) -> (u16, u16) {
        (self.priority, self.weight)
    }
}

impl PartialEq for SrvRecord {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for SrvRecord {}

impl std::hash::Hash for SrvRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// DNS domain of a fully qualified host name, i.e. everything after the
/// first label. `None` when the name carries no domain part.
pub fn domain_of(hostname: &str) -> Option<String> {
    match hostname.split_once('.') {
        Some((_, domain)) if !domain.is_empty() => Some(domain.to_string()),
        _ => None,
    }
}

/// DNS domain of the local host, when it has one.
pub fn local_domain() -> Option<String> {
    let hostname = match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        Err(e) => {
            warn!(error = %e, "failed to read local host name");
            return None;
        }
    };
    domain_of(&hostname)
}

/// Distinguished name of a DNS domain: `example.org` becomes
/// `dc=example,dc=org`.
pub fn domain_dn(domain: &str) -> String {
    domain
        .split('.')
        .filter(|label| !label.is_empty())
        .map(|label| format!("dc={label}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn record_from_parts(target: &str, port: u16, priority: u16, weight: u16) -> SrvRecord {
    let host = target.strip_suffix('.').unwrap_or(target);
    SrvRecord {
        url: format!("ldap://{host}:{port}"),
        priority,
        weight,
    }
}

/// Looks up LDAP servers advertised in DNS.
#[derive(Clone)]
pub struct Autodiscovery {
    resolver: TokioResolver,
}

impl Autodiscovery {
    /// Build a resolver from the system DNS configuration, falling back to
    /// the library defaults when it cannot be read.
    pub fn new() -> Result<Self> {
        let resolver = match read_system_conf() {
            Ok((config, opts)) => {
                Resolver::builder_with_config(config, TokioConnectionProvider::default())
                    .with_options(opts)
                    .build()
            }
            Err(e) => {
                warn!(error = %e, "failed to read system DNS config, using defaults");
                Resolver::builder_tokio()
                    .map_err(|e| Error::Dns(e.to_string()))?
                    .build()
            }
        };
        Ok(Self { resolver })
    }

    /// Use a prepared resolver. Useful for tests with mock DNS responses.
    pub fn with_resolver(resolver: TokioResolver) -> Self {
        Self { resolver }
    }

    /// Query `_ldap._tcp.<domain>` and return every advertised server,
    /// sorted ascending by priority then weight.
    pub async fn ldap_servers(&self, domain: &str) -> Result<Vec<SrvRecord>> {
        let name = format!("_ldap._tcp.{domain}");
        debug!(name = %name, "querying SRV records");
        let response = self
            .resolver
            .srv_lookup(name)
            .await
            .map_err(|e| Error::Dns(e.to_string()))?;

        let mut records: Vec<SrvRecord> = response
            .iter()
            .map(|srv| {
                record_from_parts(
                    &srv.target().to_utf8(),
                    srv.port(),
                    srv.priority(),
                    srv.weight(),
                )
            })
            .collect();
        records.sort_by_key(SrvRecord::sort_key);
        debug!(domain = %domain, count = records.len(), "discovered LDAP servers");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn domain_strips_the_host_label() {
        assert_eq!(domain_of("jenkins.example.org"), Some("example.org".to_string()));
        assert_eq!(domain_of("ldap.corp.example.org"), Some("corp.example.org".to_string()));
    }

    #[test]
    fn bare_host_has_no_domain() {
        assert_eq!(domain_of("localhost"), None);
        assert_eq!(domain_of("host."), None);
        assert_eq!(domain_of(""), None);
    }

    #[test]
    fn domain_dn_maps_labels_to_dc_components() {
        assert_eq!(domain_dn("example.org"), "dc=example,dc=org");
        assert_eq!(domain_dn("corp.example.org"), "dc=corp,dc=example,dc=org");
        assert_eq!(domain_dn("org"), "dc=org");
    }

    #[test]
    fn domain_dn_ignores_a_trailing_dot() {
        assert_eq!(domain_dn("example.org."), "dc=example,dc=org");
    }

    #[test]
    fn record_url_drops_the_trailing_dot() {
        let record = record_from_parts("ldap1.example.org.", 389, 0, 10);
        assert_eq!(record.url, "ldap://ldap1.example.org:389");
        assert_eq!(record.priority, 0);
        assert_eq!(record.weight, 10);
    }

    #[test]
    fn records_sort_by_priority_then_weight() {
        // Sorting must stay stable even when every record points at the
        // same server, since equality ignores priority and weight.
        let mut records = vec![
            record_from_parts("ldap1.example.org.", 389, 10, 40),
            record_from_parts("ldap1.example.org.", 389, 0, 10),
            record_from_parts("ldap1.example.org.", 389, 0, 60),
            record_from_parts("ldap1.example.org.", 389, 0, 30),
            record_from_parts("ldap1.example.org.", 389, 10, 60),
        ];
        records.sort_by_key(SrvRecord::sort_key);
        let ranks: Vec<(u16, u16)> = records.iter().map(SrvRecord::sort_key).collect();
        assert_eq!(ranks, vec![(0, 10), (0, 30), (0, 60), (10, 40), (10, 60)]);
    }

    #[test]
    fn identity_is_the_url_alone() {
        let first = record_from_parts("ldap1.example.org.", 389, 0, 10);
        let second = record_from_parts("ldap1.example.org.", 389, 5, 0);
        assert_eq!(first, second);

        let mut seen = HashSet::new();
        assert!(seen.insert(first));
        assert!(!seen.insert(second));
        assert_eq!(seen.len(), 1);
    }
}
