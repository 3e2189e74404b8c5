//! Raw configuration for the identity stack.
//!
//! Settings are a flat map of dotted property keys (`ldap.user.baseDn`) to
//! string values, the surface the federation core consumes. Loaders accept
//! TOML files, whose nested tables flatten into dotted keys, and raw
//! `key=value` pairs. Blank values are treated as absent on read.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct Settings {
    entries: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build settings from `(key, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { entries }
    }

    /// Parse a TOML document, flattening nested tables into dotted keys.
    /// Arrays of scalars collapse into comma-separated values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(text)
            .map_err(|e: toml::de::Error| Error::configuration(format!("Invalid TOML configuration: {e}")))?;
        let mut entries = BTreeMap::new();
        if let toml::Value::Table(table) = value {
            for (key, value) in table {
                flatten(&key, &value, &mut entries)?;
            }
        }
        Ok(Self { entries })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), entries = settings.len(), "Loaded settings");
        Ok(settings)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Trimmed value for `key`; blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn flatten(key: &str, value: &toml::Value, out: &mut BTreeMap<String, String>) -> Result<()> {
    match value {
        toml::Value::Table(table) => {
            for (child, value) in table {
                flatten(&format!("{key}.{child}"), value, out)?;
            }
        }
        toml::Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match scalar(item) {
                    Some(part) => parts.push(part),
                    None => {
                        return Err(Error::configuration(format!(
                            "Unsupported TOML structure at '{key}': arrays may only hold scalar values"
                        )))
                    }
                }
            }
            out.insert(key.to_string(), parts.join(","));
        }
        other => match scalar(other) {
            Some(text) => {
                out.insert(key.to_string(), text);
            }
            None => {
                return Err(Error::configuration(format!(
                    "Unsupported TOML structure at '{key}'"
                )))
            }
        },
    }
    Ok(())
}

fn scalar(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_round_trip() {
        let settings = Settings::from_pairs([("ldap.url", "ldap://localhost:389")]);
        assert_eq!(settings.get("ldap.url"), Some("ldap://localhost:389"));
        assert_eq!(settings.get("ldap.realm"), None);
        assert_eq!(settings.len(), 1);
    }

    #[test]
    fn blank_values_read_as_absent() {
        let mut settings = Settings::new();
        settings.set("ldap.url", "   ");
        settings.set("ldap.realm", "");
        settings.set("ldap.bindDn", "  cn=admin,dc=example,dc=org ");
        assert_eq!(settings.get("ldap.url"), None);
        assert_eq!(settings.get("ldap.realm"), None);
        assert_eq!(settings.get("ldap.bindDn"), Some("cn=admin,dc=example,dc=org"));
    }

    #[test]
    fn toml_tables_flatten_to_dotted_keys() {
        let settings = Settings::from_toml_str(
            r#"
            [ldap]
            url = "ldap://ldap.example.org:389"
            bindDn = "cn=service,dc=example,dc=org"

            [ldap.user]
            baseDn = "ou=people,dc=example,dc=org"
            realNameAttribute = "displayName"
            "#,
        )
        .unwrap();
        assert_eq!(settings.get("ldap.url"), Some("ldap://ldap.example.org:389"));
        assert_eq!(settings.get("ldap.bindDn"), Some("cn=service,dc=example,dc=org"));
        assert_eq!(
            settings.get("ldap.user.baseDn"),
            Some("ou=people,dc=example,dc=org")
        );
        assert_eq!(settings.get("ldap.user.realNameAttribute"), Some("displayName"));
    }

    #[test]
    fn toml_scalars_and_arrays_stringify() {
        let settings = Settings::from_toml_str(
            r#"
            [ldap]
            servers = ["alpha", "beta"]
            StartTLS = true
            connectTimeout = 5
            "#,
        )
        .unwrap();
        assert_eq!(settings.get("ldap.servers"), Some("alpha,beta"));
        assert_eq!(settings.get("ldap.StartTLS"), Some("true"));
        assert_eq!(settings.get("ldap.connectTimeout"), Some("5"));
    }

    #[test]
    fn nested_server_tables_keep_their_key() {
        let settings = Settings::from_toml_str(
            r#"
            [ldap]
            servers = "alpha,beta"

            [ldap.alpha]
            url = "ldap://alpha.example.org"

            [ldap.beta]
            url = "ldap://beta.example.org"
            "#,
        )
        .unwrap();
        assert_eq!(settings.get("ldap.alpha.url"), Some("ldap://alpha.example.org"));
        assert_eq!(settings.get("ldap.beta.url"), Some("ldap://beta.example.org"));
    }

    #[test]
    fn invalid_toml_is_a_configuration_error() {
        let err = Settings::from_toml_str("ldap = {").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Invalid TOML configuration"));
    }

    #[test]
    fn array_of_tables_is_rejected() {
        let err = Settings::from_toml_str(
            r#"
            [[ldap.servers]]
            url = "ldap://alpha.example.org"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ldap.servers"));
    }

    #[test]
    fn set_overrides_existing_value() {
        let mut settings = Settings::from_pairs([("ldap.url", "ldap://old")]);
        settings.set("ldap.url", "ldap://new");
        assert_eq!(settings.get("ldap.url"), Some("ldap://new"));
    }
}
