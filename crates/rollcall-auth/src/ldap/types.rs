//! Active Directory types and configuration

use rollcall_core::config::LdapConfigSection;
use rollcall_core::types::fields;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// LDAP Configuration
// ============================================================================

/// Connection and schema settings for an Active Directory backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LdapConfig {
    /// LDAP server URL (ldap:// or ldaps://)
    pub server_url: String,

    /// Use STARTTLS for connection upgrade
    #[serde(default)]
    pub start_tls: bool,

    /// Bind DN for directory queries (service account)
    pub bind_dn: String,

    pub bind_password: String,

    /// Base DN for user searches and new user entries
    pub user_base_dn: String,

    /// Base DN for group lookups, defaults to the user base
    #[serde(default)]
    pub group_base_dn: Option<String>,

    /// Every user entry carries all of these object classes
    #[serde(default = "default_object_classes")]
    pub object_classes: Vec<String>,

    #[serde(default)]
    pub attribute_mappings: AttributeMappings,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Deepest filter nesting the translator accepts
    #[serde(default = "default_max_filter_depth")]
    pub max_filter_depth: usize,
}

fn default_object_classes() -> Vec<String> {
    vec!["user".to_string(), "person".to_string()]
}

fn default_timeout() -> u64 {
    10
}

fn default_max_filter_depth() -> usize {
    32
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            server_url: "ldap://localhost:389".to_string(),
            start_tls: false,
            bind_dn: String::new(),
            bind_password: String::new(),
            user_base_dn: String::new(),
            group_base_dn: None,
            object_classes: default_object_classes(),
            attribute_mappings: AttributeMappings::default(),
            timeout_seconds: default_timeout(),
            max_filter_depth: default_max_filter_depth(),
        }
    }
}

impl LdapConfig {
    pub fn group_base_dn(&self) -> &str {
        self.group_base_dn.as_deref().unwrap_or(&self.user_base_dn)
    }
}

impl From<&LdapConfigSection> for LdapConfig {
    fn from(section: &LdapConfigSection) -> Self {
        let mut attribute_mappings = AttributeMappings::default();
        for (field, attribute) in &section.attribute_overrides {
            attribute_mappings.set(field, attribute);
        }
        Self {
            server_url: section.server_url.clone(),
            start_tls: section.start_tls,
            bind_dn: section.bind_dn.clone(),
            bind_password: section.bind_password.clone(),
            user_base_dn: section.user_base_dn.clone(),
            group_base_dn: section.group_base_dn.clone(),
            timeout_seconds: section.timeout_seconds,
            object_classes: section.object_classes.clone(),
            attribute_mappings,
            ..Self::default()
        }
    }
}

// ============================================================================
// Attribute mappings
// ============================================================================

pub const OBJECT_GUID: &str = "objectGUID";
pub const UNICODE_PWD: &str = "unicodePwd";
pub const USER_ACCOUNT_CONTROL: &str = "userAccountControl";
pub const MEMBER: &str = "member";

/// userAccountControl of an enabled normal account
pub const NORMAL_ACCOUNT: &str = "512";

/// Field name to LDAP attribute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMappings(HashMap<String, String>);

impl Default for AttributeMappings {
    fn default() -> Self {
        Self::active_directory()
    }
}

impl AttributeMappings {
    /// Active Directory defaults
    pub fn active_directory() -> Self {
        let pairs = [
            (fields::ID, OBJECT_GUID),
            (fields::USER_NAME, "sAMAccountName"),
            (fields::EMAIL, "mail"),
            (fields::DISPLAY_NAME, "displayName"),
            (fields::FIRST_NAME, "givenName"),
            (fields::LAST_NAME, "sn"),
            (fields::PHONE, "telephoneNumber"),
            (fields::GROUPS, "memberOf"),
            (fields::CREATED_AT, "whenCreated"),
            (fields::MODIFIED_AT, "whenChanged"),
        ];
        Self(
            pairs
                .iter()
                .map(|(f, a)| (f.to_string(), a.to_string()))
                .collect(),
        )
    }

    pub fn set(&mut self, field: &str, attribute: &str) {
        let key = fields::canonical(field).unwrap_or(field).to_string();
        self.0.insert(key, attribute.to_string());
    }

    /// LDAP attribute for a field; unknown fields pass through unchanged.
    pub fn attribute_for<'a>(&'a self, field: &'a str) -> &'a str {
        let key = fields::canonical(field).unwrap_or(field);
        self.0.get(key).map(String::as_str).unwrap_or(field)
    }

    /// Mapped attribute for a known field, `None` when the field is unmapped.
    pub fn mapped(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Attributes to request when reading users
    pub fn user_attributes(&self) -> Vec<String> {
        fields::ALL
            .iter()
            .filter_map(|f| self.mapped(f))
            .map(String::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_lookup() {
        let mappings = AttributeMappings::default();
        assert_eq!(mappings.attribute_for("UserName"), "sAMAccountName");
        assert_eq!(mappings.attribute_for("email"), "mail");
        assert_eq!(mappings.attribute_for("department"), "department");
    }

    #[test]
    fn test_overrides_from_section() {
        let mut section = LdapConfigSection::default();
        section.user_base_dn = "OU=Staff,DC=corp,DC=local".into();
        section
            .attribute_overrides
            .insert("phone".into(), "mobile".into());
        let config = LdapConfig::from(&section);
        assert_eq!(config.attribute_mappings.attribute_for(fields::PHONE), "mobile");
        assert_eq!(config.group_base_dn(), "OU=Staff,DC=corp,DC=local");
        assert_eq!(config.object_classes, vec!["user", "person"]);
    }
}
