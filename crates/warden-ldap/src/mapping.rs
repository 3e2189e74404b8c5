//! Filter-template compilation.
//!
//! Operators write search filters with named placeholders (`{uid}`, `{dn}`)
//! interleaved with ordinary filter syntax. Compilation turns them into
//! positional templates (`{0}`, `{1}`, …) plus the ordered list of attribute
//! names the placeholders referred to. At query time, values are substituted
//! by position and escaped per RFC 4515.

use std::fmt;

use ldap3::ldap_escape;

pub const DEFAULT_USER_REQUEST: &str = "(&(objectClass=inetOrgPerson)(uid={uid}))";
pub const DEFAULT_GROUP_REQUEST: &str = "(&(objectClass=groupOfUniqueNames)(uniqueMember={dn}))";
pub const DEFAULT_REAL_NAME_ATTRIBUTE: &str = "cn";
pub const DEFAULT_EMAIL_ATTRIBUTE: &str = "mail";
pub const DEFAULT_GROUP_ID_ATTRIBUTE: &str = "cn";

/// A positional filter template and the attribute names behind its
/// parameters, one entry per distinct placeholder in first-occurrence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    pub request: String,
    pub attributes: Vec<String>,
}

/// Compile a named-placeholder template into a positional one.
///
/// Repeated occurrences of the same placeholder reuse its index and do not
/// add a second attribute entry. Braces that do not delimit a placeholder
/// (unclosed, or empty `{}`) pass through untouched.
pub fn compile_template(template: &str) -> CompiledTemplate {
    let mut request = String::with_capacity(template.len());
    let mut attributes: Vec<String> = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        request.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['{', '}']) {
            Some(end) if after.as_bytes()[end] == b'}' && end > 0 => {
                let name = &after[..end];
                let index = match attributes.iter().position(|a| a == name) {
                    Some(index) => index,
                    None => {
                        attributes.push(name.to_string());
                        attributes.len() - 1
                    }
                };
                request.push('{');
                request.push_str(&index.to_string());
                request.push('}');
                rest = &after[end + 1..];
            }
            _ => {
                // Not a placeholder; keep the brace literally.
                request.push('{');
                rest = after;
            }
        }
    }
    request.push_str(rest);

    CompiledTemplate { request, attributes }
}

/// Substitute positional parameters into a compiled request, escaping each
/// value per RFC 4515.
///
/// Substitution is a single left-to-right pass; parameter values are emitted
/// verbatim and never re-scanned for tokens. Tokens without a matching
/// parameter pass through untouched.
pub fn format_request(request: &str, parameters: &[String]) -> String {
    let mut out = String::with_capacity(request.len());
    let mut rest = request;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['{', '}']) {
            Some(end) if after.as_bytes()[end] == b'}' && end > 0 => {
                let token = &after[..end];
                match token.parse::<usize>().ok().and_then(|i| parameters.get(i)) {
                    Some(value) => out.push_str(&ldap_escape(value.as_str())),
                    None => {
                        out.push('{');
                        out.push_str(token);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// How to find a user entry and which of its attributes carry the profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMappingTemplate {
    pub base_dn: String,
    /// Positional filter template.
    pub request: String,
    pub required_attributes: Vec<String>,
    pub real_name_attribute: String,
    pub email_attribute: String,
}

impl UserMappingTemplate {
    /// One parameter per required attribute. Every user placeholder stands
    /// for the login being looked up, whatever its attribute name.
    pub fn search_parameters(&self, username: &str) -> Vec<String> {
        self.required_attributes
            .iter()
            .map(|_| username.to_string())
            .collect()
    }
}

impl fmt::Display for UserMappingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UserMappingTemplate{{baseDn={}, request={}, realNameAttribute={}, emailAttribute={}}}",
            self.base_dn, self.request, self.real_name_attribute, self.email_attribute
        )
    }
}

/// How to find the groups holding a user entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMappingTemplate {
    pub base_dn: String,
    /// Attribute naming the group in results.
    pub id_attribute: String,
    /// Positional filter template.
    pub request: String,
    /// User attributes whose values feed the template's parameters; the
    /// pseudo-attribute `dn` resolves to the entry's distinguished name.
    pub required_user_attributes: Vec<String>,
}

impl fmt::Display for GroupMappingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GroupMappingTemplate{{baseDn={}, idAttribute={}, request={}, requiredUserAttributes=[{}]}}",
            self.base_dn,
            self.id_attribute,
            self.request,
            self.required_user_attributes.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_posix_group_filter() {
        let compiled = compile_template("(&(objectClass=posixGroup)(memberUid={uid}))");
        assert_eq!(compiled.request, "(&(objectClass=posixGroup)(memberUid={0}))");
        assert_eq!(compiled.attributes, vec!["uid"]);
    }

    #[test]
    fn combined_filter_orders_attributes_by_first_occurrence() {
        let compiled = compile_template(
            "(|(&(objectClass=posixGroup)(memberUid={uid}))(&(objectClass=groupOfUniqueNames)(uniqueMember={dn})))",
        );
        assert_eq!(
            compiled.request,
            "(|(&(objectClass=posixGroup)(memberUid={0}))(&(objectClass=groupOfUniqueNames)(uniqueMember={1})))"
        );
        assert_eq!(compiled.attributes, vec!["uid", "dn"]);
    }

    #[test]
    fn repeated_placeholder_reuses_index() {
        let compiled = compile_template("(|(member={dn})(owner={dn})(submitter={uid}))");
        assert_eq!(compiled.request, "(|(member={0})(owner={0})(submitter={1}))");
        assert_eq!(compiled.attributes, vec!["dn", "uid"]);
    }

    #[test]
    fn default_user_request_compiles_to_expected_positional_form() {
        let compiled = compile_template(DEFAULT_USER_REQUEST);
        assert_eq!(compiled.request, "(&(objectClass=inetOrgPerson)(uid={0}))");
        assert_eq!(compiled.attributes, vec!["uid"]);
    }

    #[test]
    fn default_group_request_requires_dn() {
        let compiled = compile_template(DEFAULT_GROUP_REQUEST);
        assert_eq!(
            compiled.request,
            "(&(objectClass=groupOfUniqueNames)(uniqueMember={0}))"
        );
        assert_eq!(compiled.attributes, vec!["dn"]);
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        let compiled = compile_template("(objectClass=inetOrgPerson)");
        assert_eq!(compiled.request, "(objectClass=inetOrgPerson)");
        assert!(compiled.attributes.is_empty());
    }

    #[test]
    fn stray_braces_pass_through() {
        let compiled = compile_template("(cn={)(sn={} {uid}");
        assert_eq!(compiled.request, "(cn={)(sn={} {0}");
        assert_eq!(compiled.attributes, vec!["uid"]);
    }

    #[test]
    fn format_request_substitutes_by_position() {
        let out = format_request("(&(memberUid={0})(uniqueMember={1}))", &[
            "tester".to_string(),
            "uid=tester,ou=people,dc=example,dc=org".to_string(),
        ]);
        assert_eq!(
            out,
            "(&(memberUid=tester)(uniqueMember=uid=tester,ou=people,dc=example,dc=org))"
        );
    }

    #[test]
    fn format_request_escapes_filter_metacharacters() {
        let out = format_request("(uid={0})", &["a*b(c)d\\e".to_string()]);
        assert_eq!(out, "(uid=a\\2ab\\28c\\29d\\5ce)");
    }

    #[test]
    fn format_request_fills_every_occurrence() {
        let out = format_request("(|(member={0})(owner={0}))", &["x".to_string()]);
        assert_eq!(out, "(|(member=x)(owner=x))");
    }

    #[test]
    fn format_request_never_rescans_substituted_values() {
        let out = format_request("(&(memberUid={0})(uniqueMember={1}))", &[
            "x{1}y".to_string(),
            "cn=admin,ou=groups,dc=example,dc=org".to_string(),
        ]);
        assert_eq!(
            out,
            "(&(memberUid=x{1}y)(uniqueMember=cn=admin,ou=groups,dc=example,dc=org))"
        );
    }

    #[test]
    fn format_request_reads_multi_digit_indexes_whole() {
        let parameters: Vec<String> = (0..11).map(|i| format!("v{i}")).collect();
        let out = format_request("(&(a={1})(b={10}))", &parameters);
        assert_eq!(out, "(&(a=v1)(b=v10))");
    }

    #[test]
    fn format_request_keeps_unknown_tokens_literal() {
        let out = format_request("(uid={0})(x={5})({name})", &["u".to_string()]);
        assert_eq!(out, "(uid=u)(x={5})({name})");
    }

    #[test]
    fn user_template_search_parameters_repeat_username() {
        let template = UserMappingTemplate {
            base_dn: "ou=people,dc=example,dc=org".to_string(),
            request: "(&(uid={0})(mail={1}))".to_string(),
            required_attributes: vec!["uid".to_string(), "mail".to_string()],
            real_name_attribute: DEFAULT_REAL_NAME_ATTRIBUTE.to_string(),
            email_attribute: DEFAULT_EMAIL_ATTRIBUTE.to_string(),
        };
        assert_eq!(template.search_parameters("tester"), vec!["tester", "tester"]);
    }

    #[test]
    fn display_forms_name_the_fields() {
        let template = GroupMappingTemplate {
            base_dn: "ou=groups,dc=example,dc=org".to_string(),
            id_attribute: "cn".to_string(),
            request: "(&(objectClass=posixGroup)(memberUid={0}))".to_string(),
            required_user_attributes: vec!["uid".to_string()],
        };
        let rendered = template.to_string();
        assert!(rendered.contains("baseDn=ou=groups,dc=example,dc=org"));
        assert!(rendered.contains("requiredUserAttributes=[uid]"));
    }
}
