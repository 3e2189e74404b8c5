//! Directory search engine.
//!
//! A [`SearchSpec`] describes one search: base DN, scope, a positional
//! filter template with its parameters, and the attributes to return.
//! Executing it opens a dedicated service connection and yields entries
//! through a lazy, non-restartable [`EntryCursor`]. The connection is
//! released as soon as the stream is exhausted, fails or is closed, so a
//! caller can never leak a directory connection by walking a cursor to its
//! end.

use std::collections::HashMap;
use std::fmt;

use ldap3::{Ldap, Scope, SearchEntry, SearchStream};
use tracing::debug;
use warden_core::{Error, Result};

use crate::connection::ContextFactory;
use crate::mapping::format_request;

/// How deep a search descends below its base DN.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchScope {
    /// The base entry itself.
    Object,
    /// Direct children of the base entry.
    OneLevel,
    /// The whole subtree under the base entry.
    #[default]
    Subtree,
}

impl SearchScope {
    fn to_ldap3(self) -> Scope {
        match self {
            SearchScope::Object => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchScope::Object => f.write_str("object"),
            SearchScope::OneLevel => f.write_str("onelevel"),
            SearchScope::Subtree => f.write_str("subtree"),
        }
    }
}

/// One directory entry, reduced to its DN and textual attributes.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl Entry {
    fn from_search_entry(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attributes: entry.attrs,
        }
    }

    fn values(&self, attribute: &str) -> Option<&Vec<String>> {
        // Directory attribute names are case-insensitive; servers answer
        // with whatever case their schema declares.
        self.attributes.get(attribute).or_else(|| {
            self.attributes
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
                .map(|(_, values)| values)
        })
    }

    /// First value of an attribute, matched case-insensitively.
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Like [`Entry::first`], except the pseudo-attribute `dn` resolves to
    /// the entry's distinguished name.
    pub fn value_of(&self, attribute: &str) -> Option<&str> {
        if attribute.eq_ignore_ascii_case("dn") {
            return Some(&self.dn);
        }
        self.first(attribute)
    }
}

/// A parameterized directory search. Scope defaults to subtree and the
/// request to `(objectClass=*)`.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    base_dn: String,
    scope: SearchScope,
    request: String,
    parameters: Vec<String>,
    attributes: Vec<String>,
}

impl SearchSpec {
    pub fn new(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope: SearchScope::default(),
            request: "(objectClass=*)".to_string(),
            parameters: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Positional filter template, `{0}`, `{1}`, … standing for parameters.
    pub fn request(mut self, request: impl Into<String>) -> Self {
        self.request = request.into();
        self
    }

    pub fn parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = parameters.into_iter().map(Into::into).collect();
        self
    }

    /// Attributes to return with each entry.
    pub fn returns<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    fn filter(&self) -> String {
        format_request(&self.request, &self.parameters)
    }

    /// Execute the search on a fresh service connection.
    pub async fn find(&self, factory: &ContextFactory) -> Result<EntryCursor> {
        let mut ldap = factory.open_service().await?;
        let filter = self.filter();
        debug!(search = %self, "executing directory search");
        match ldap
            .streaming_search(
                &self.base_dn,
                self.scope.to_ldap3(),
                &filter,
                self.attributes.clone(),
            )
            .await
        {
            Ok(stream) => Ok(EntryCursor {
                ldap,
                stream,
                spec: self.to_string(),
                state: CursorState::Open,
            }),
            Err(e) => {
                let _ = ldap.unbind().await;
                Err(Error::search(self, e))
            }
        }
    }

    /// Execute the search expecting at most one match. More than one match
    /// fails with [`Error::NonUniqueResult`] naming this search.
    pub async fn find_unique(&self, factory: &ContextFactory) -> Result<Option<Entry>> {
        let mut cursor = self.find(factory).await?;
        let first = match cursor.next().await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if cursor.next().await?.is_some() {
            cursor.close().await;
            return Err(Error::non_unique(self));
        }
        Ok(Some(first))
    }
}

impl fmt::Display for SearchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SearchSpec{{baseDn={}, scope={}, request={}, parameters=[{}], attributes=[{}]}}",
            self.base_dn,
            self.scope,
            self.request,
            self.parameters.join(", "),
            self.attributes.join(", ")
        )
    }
}

enum CursorState {
    Open,
    Drained,
    Closed,
}

/// Lazy stream of search results over a dedicated connection.
///
/// The cursor cannot be restarted. Dropping it without reading to the end
/// tears the connection down without a polite unbind; [`EntryCursor::close`]
/// is the orderly way to stop early.
pub struct EntryCursor {
    ldap: Ldap,
    stream: SearchStream<'static, String, Vec<String>>,
    spec: String,
    state: CursorState,
}

impl EntryCursor {
    /// Next matching entry, or `Ok(None)` once the stream is exhausted.
    /// Exhaustion and failure both release the connection.
    pub async fn next(&mut self) -> Result<Option<Entry>> {
        if !matches!(self.state, CursorState::Open) {
            return Ok(None);
        }
        match self.stream.next().await {
            Ok(Some(entry)) => Ok(Some(Entry::from_search_entry(SearchEntry::construct(entry)))),
            Ok(None) => {
                self.state = CursorState::Drained;
                let outcome = self.stream.finish().await.success();
                self.release().await;
                match outcome {
                    Ok(_) => Ok(None),
                    Err(e) => Err(Error::search(&self.spec, e)),
                }
            }
            Err(e) => {
                self.state = CursorState::Closed;
                self.release().await;
                Err(Error::search(&self.spec, e))
            }
        }
    }

    /// Abandon the search and release the connection early.
    pub async fn close(&mut self) {
        if matches!(self.state, CursorState::Open) {
            self.state = CursorState::Closed;
            let _ = self.stream.finish().await;
            self.release().await;
        }
    }

    async fn release(&mut self) {
        let _ = self.ldap.unbind().await;
        debug!(search = %self.spec, "search connection released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_every_component() {
        let spec = SearchSpec::new("ou=people,dc=example,dc=org")
            .request("(&(objectClass=inetOrgPerson)(uid={0}))")
            .parameters(["tester"])
            .returns(["cn", "mail"]);
        assert_eq!(
            spec.to_string(),
            "SearchSpec{baseDn=ou=people,dc=example,dc=org, scope=subtree, \
             request=(&(objectClass=inetOrgPerson)(uid={0})), parameters=[tester], \
             attributes=[cn, mail]}"
        );
    }

    #[test]
    fn scope_defaults_to_subtree() {
        assert_eq!(SearchScope::default(), SearchScope::Subtree);
        let spec = SearchSpec::new("dc=example,dc=org");
        assert!(spec.to_string().contains("scope=subtree"));
    }

    #[test]
    fn scope_names_are_lowercase() {
        assert_eq!(SearchScope::Object.to_string(), "object");
        assert_eq!(SearchScope::OneLevel.to_string(), "onelevel");
        assert_eq!(SearchScope::Subtree.to_string(), "subtree");
    }

    #[test]
    fn filter_substitutes_and_escapes_parameters() {
        let spec = SearchSpec::new("dc=example,dc=org")
            .request("(uid={0})")
            .parameters(["a*b"]);
        assert_eq!(spec.filter(), "(uid=a\\2ab)");
    }

    #[test]
    fn entry_lookup_is_case_insensitive() {
        let mut attributes = HashMap::new();
        attributes.insert("cn".to_string(), vec!["Tester One".to_string(), "T1".to_string()]);
        let entry = Entry {
            dn: "uid=tester,ou=people,dc=example,dc=org".to_string(),
            attributes,
        };
        assert_eq!(entry.first("cn"), Some("Tester One"));
        assert_eq!(entry.first("CN"), Some("Tester One"));
        assert_eq!(entry.first("mail"), None);
    }

    #[test]
    fn dn_pseudo_attribute_resolves_to_the_entry_dn() {
        let entry = Entry {
            dn: "uid=tester,ou=people,dc=example,dc=org".to_string(),
            attributes: HashMap::new(),
        };
        assert_eq!(
            entry.value_of("dn"),
            Some("uid=tester,ou=people,dc=example,dc=org")
        );
        assert_eq!(
            entry.value_of("DN"),
            Some("uid=tester,ou=people,dc=example,dc=org")
        );
        assert_eq!(entry.value_of("uid"), None);
    }
}
