//! Filter construction for Active Directory membership queries.

/// Every user account under the search base.
pub const DEFAULT_UNIVERSE_FILTER: &str = "(&(objectClass=user)(sAMAccountName=*))";

/// `LDAP_MATCHING_RULE_IN_CHAIN`: membership through nested groups counts.
const IN_CHAIN: &str = "1.2.840.113556.1.4.1941";

/// Escape a value for use inside a search filter (RFC 4515).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Escape an attribute value for use inside a DN (RFC 4514).
#[must_use]
pub fn escape_dn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '#' if i == 0 => escaped.push_str("\\#"),
            ' ' if i == 0 || i == last => escaped.push_str("\\ "),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Users that are members of group `cn=<group_cn>,<base_dn>`, directly or
/// through nested groups.
#[must_use]
pub fn nested_group_filter(group_cn: &str, base_dn: &str) -> String {
    let group_dn = format!("cn={},{base_dn}", escape_dn_value(group_cn));
    format!(
        "(&(objectClass=user)(sAMAccountName=*)(memberOf:{IN_CHAIN}:={}))",
        escape_filter_value(&group_dn)
    )
}
