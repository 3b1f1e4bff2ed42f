//! LDAP Client implementation
//!
//! Every operation runs inside [`ActiveDirectoryBackend::with_search_handle`],
//! which opens a connection, binds the service account, runs the operation
//! and unbinds whether or not it succeeded. Password checks bind as the user
//! on a second, short-lived connection.

use async_trait::async_trait;
use ldap3::{
    dn_escape, ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry,
    SearchOptions, SearchResult,
};
use rollcall_core::types::{fields, FilterExpression, NewUser, User, UserKind};
use rollcall_core::utils::parse_generalized_time;
use rollcall_core::{BackendQuery, DirectoryBackend, Error, Result};
use rollcall_crypto::MAX_PASSWORD_LENGTH;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::filter::{decode_guid, encode_guid, FilterBuilder};
use super::sort::sort_control;
use super::types::*;

const RC_SUCCESS: u32 = 0;
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;
const RC_NO_SUCH_ATTRIBUTE: u32 = 16;
const RC_ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_INVALID_CREDENTIALS: u32 = 49;
const RC_ENTRY_ALREADY_EXISTS: u32 = 68;

const USER_OBJECT_CLASSES: [&str; 4] = ["top", "person", "organizationalPerson", "user"];

/// Active Directory user store
pub struct ActiveDirectoryBackend {
    config: LdapConfig,
}

impl ActiveDirectoryBackend {
    pub fn new(config: LdapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    fn filter_builder(&self) -> FilterBuilder<'_> {
        FilterBuilder::new(
            &self.config.attribute_mappings,
            &self.config.object_classes,
            self.config.max_filter_depth,
        )
    }

    /// Run `op` on a service-bound connection, unbinding afterwards on
    /// every path.
    pub async fn with_search_handle<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Ldap) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut ldap = self.connect().await?;
        let result = match self
            .bind(&mut ldap, &self.config.bind_dn, &self.config.bind_password)
            .await
        {
            Ok(()) => op(ldap.clone()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = ldap.unbind().await {
            debug!("LDAP unbind failed: {}", e);
        }
        result
    }

    /// Create LDAP connection with proper TLS settings
    async fn connect(&self) -> Result<Ldap> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(self.config.timeout_seconds))
            .set_starttls(self.config.start_tls);

        debug!("Connecting to LDAP server: {}", self.config.server_url);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.config.server_url)
            .await
            .map_err(|e| Error::backend(format!("Failed to connect to LDAP server: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!("LDAP connection driver error: {}", e);
            }
        });

        Ok(ldap)
    }

    async fn bind(&self, ldap: &mut Ldap, dn: &str, password: &str) -> Result<()> {
        let result = ldap
            .simple_bind(dn, password)
            .await
            .map_err(|e| Error::backend(format!("Bind failed for {}: {}", dn, e)))?;
        if result.rc != RC_SUCCESS {
            return Err(Error::backend(format!(
                "Bind failed for {} with code {}: {}",
                dn, result.rc, result.text
            )));
        }
        Ok(())
    }

    fn user_attributes(&self) -> Vec<String> {
        self.config.attribute_mappings.user_attributes()
    }

    /// Distinguished name of the user with the given objectGUID.
    async fn find_user_dn(&self, ldap: &mut Ldap, id: Uuid) -> Result<Option<String>> {
        let filter = format!("({}={})", self.guid_attribute(), encode_guid(&id));
        let SearchResult(entries, res) = ldap
            .search(&self.config.user_base_dn, Scope::Subtree, &filter, vec!["1.1"])
            .await
            .map_err(|e| Error::backend_with_filter(e.to_string(), filter.as_str()))?;
        if res.rc != RC_SUCCESS && res.rc != RC_NO_SUCH_OBJECT {
            return Err(Error::backend_with_filter(
                format!("User lookup failed with code {}: {}", res.rc, res.text),
                filter.as_str(),
            ));
        }
        Ok(entries
            .into_iter()
            .next()
            .map(|entry| SearchEntry::construct(entry).dn))
    }

    async fn find_group_dn(&self, ldap: &mut Ldap, group: &str) -> Result<Option<String>> {
        let filter = format!("(&(objectClass=group)(cn={}))", ldap_escape(group));
        let SearchResult(entries, res) = ldap
            .search(self.config.group_base_dn(), Scope::Subtree, &filter, vec!["1.1"])
            .await
            .map_err(|e| Error::backend_with_filter(e.to_string(), filter.as_str()))?;
        if res.rc != RC_SUCCESS && res.rc != RC_NO_SUCH_OBJECT {
            return Err(Error::backend_with_filter(
                format!("Group lookup failed with code {}: {}", res.rc, res.text),
                filter.as_str(),
            ));
        }
        Ok(entries
            .into_iter()
            .next()
            .map(|entry| SearchEntry::construct(entry).dn))
    }

    async fn read_user(&self, ldap: &mut Ldap, dn: &str) -> Result<Option<User>> {
        let attrs = self.user_attributes();
        let SearchResult(entries, res) = ldap
            .search(dn, Scope::Base, "(objectClass=*)", &attrs)
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
        if res.rc != RC_SUCCESS && res.rc != RC_NO_SUCH_OBJECT {
            return Err(Error::backend(format!(
                "Reading {} failed with code {}: {}",
                dn, res.rc, res.text
            )));
        }
        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .find_map(|entry| self.entry_to_user(entry)))
    }

    async fn replace_password(&self, ldap: &mut Ldap, dn: &str, password: &str) -> Result<u32> {
        let mods = vec![Mod::Replace(
            UNICODE_PWD.as_bytes().to_vec(),
            HashSet::from([encode_unicode_password(password)]),
        )];
        let result = ldap
            .modify(dn, mods)
            .await
            .map_err(|e| Error::backend(format!("Password change failed for {}: {}", dn, e)))?;
        Ok(result.rc)
    }

    async fn modify_membership(
        &self,
        id: Uuid,
        group: &str,
        add: bool,
    ) -> Result<bool> {
        self.with_search_handle(|mut ldap| async move {
            let Some(user_dn) = self.find_user_dn(&mut ldap, id).await? else {
                return Ok(false);
            };
            let Some(group_dn) = self.find_group_dn(&mut ldap, group).await? else {
                debug!("Group {} not found", group);
                return Ok(false);
            };
            let values = HashSet::from([user_dn]);
            let change = if add {
                Mod::Add(MEMBER.to_string(), values)
            } else {
                Mod::Delete(MEMBER.to_string(), values)
            };
            let result = ldap
                .modify(&group_dn, vec![change])
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            match result.rc {
                RC_SUCCESS => Ok(true),
                RC_ATTRIBUTE_OR_VALUE_EXISTS if add => Ok(true),
                RC_NO_SUCH_ATTRIBUTE | RC_NO_SUCH_OBJECT => Ok(false),
                rc => Err(Error::backend(format!(
                    "Membership change on {} failed with code {}: {}",
                    group_dn, rc, result.text
                ))),
            }
        })
        .await
    }

    fn guid_attribute(&self) -> &str {
        self.config.attribute_mappings.attribute_for(fields::ID)
    }

    fn attribute<'a>(&'a self, field: &'a str) -> &'a str {
        self.config.attribute_mappings.attribute_for(field)
    }

    /// Entries without a readable objectGUID or account name are skipped.
    fn entry_to_user(&self, entry: SearchEntry) -> Option<User> {
        let id = read_guid(&entry, self.guid_attribute())?;
        let text = |field: &str| first_value(&entry, self.attribute(field));
        let user_name = text(fields::USER_NAME)?;
        let timestamp = |field: &str| {
            text(field)
                .and_then(|v| parse_generalized_time(&v))
                .unwrap_or_default()
        };

        Some(User {
            id,
            user_name,
            email: text(fields::EMAIL),
            display_name: text(fields::DISPLAY_NAME),
            first_name: text(fields::FIRST_NAME),
            last_name: text(fields::LAST_NAME),
            phone: text(fields::PHONE),
            groups: values(&entry, self.attribute(fields::GROUPS))
                .iter()
                .map(|dn| rdn_value(dn))
                .collect(),
            password_hash: None,
            created_at: timestamp(fields::CREATED_AT),
            modified_at: timestamp(fields::MODIFIED_AT),
            kind: UserKind::Stored,
        })
    }

    fn profile_mods(&self, user: &User) -> Vec<Mod<String>> {
        let optional = [
            (fields::EMAIL, &user.email),
            (fields::DISPLAY_NAME, &user.display_name),
            (fields::FIRST_NAME, &user.first_name),
            (fields::LAST_NAME, &user.last_name),
            (fields::PHONE, &user.phone),
        ];
        let mut mods = vec![Mod::Replace(
            self.attribute(fields::USER_NAME).to_string(),
            HashSet::from([user.user_name.clone()]),
        )];
        for (field, value) in optional {
            // An empty value set deletes the attribute.
            let values: HashSet<String> = value.iter().cloned().collect();
            mods.push(Mod::Replace(self.attribute(field).to_string(), values));
        }
        mods
    }
}

#[async_trait]
impl DirectoryBackend for ActiveDirectoryBackend {
    fn name(&self) -> &str {
        "active-directory"
    }

    fn supports_native_sort(&self) -> bool {
        true
    }

    async fn find_no_cache(&self, query: BackendQuery<'_>) -> Result<Vec<User>> {
        let filter_text = self.filter_builder().search_filter(query.filter)?;
        let attrs = self.user_attributes();
        let control = query
            .sort
            .map(|criterion| sort_control(self.attribute(&criterion.field), criterion))
            .transpose()?;
        let size_limit = query.size_limit.map(|n| n.min(i32::MAX as u32) as i32);

        debug!(
            "Searching {} with filter {} (limit {:?})",
            self.config.user_base_dn, filter_text, size_limit
        );

        self.with_search_handle(|mut ldap| async move {
            if let Some(limit) = size_limit {
                ldap.with_search_options(SearchOptions::new().sizelimit(limit));
            }
            if let Some(control) = control {
                ldap.with_controls(vec![control]);
            }
            let SearchResult(entries, res) = ldap
                .search(&self.config.user_base_dn, Scope::Subtree, &filter_text, &attrs)
                .await
                .map_err(|e| Error::backend_with_filter(e.to_string(), filter_text.as_str()))?;
            if res.rc != RC_SUCCESS && res.rc != RC_SIZE_LIMIT_EXCEEDED {
                return Err(Error::backend_with_filter(
                    format!("Search failed with code {}: {}", res.rc, res.text),
                    filter_text.as_str(),
                ));
            }
            Ok(entries
                .into_iter()
                .map(SearchEntry::construct)
                .filter_map(|entry| self.entry_to_user(entry))
                .collect())
        })
        .await
    }

    async fn find_distinct_values(
        &self,
        field: &str,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<String>> {
        let filter_text = self.filter_builder().search_filter(filter)?;
        let attr = self.attribute(field).to_string();
        let is_groups = fields::is(field, fields::GROUPS);
        let is_id = fields::is(field, fields::ID);

        self.with_search_handle(|mut ldap| async move {
            let SearchResult(entries, res) = ldap
                .search(&self.config.user_base_dn, Scope::Subtree, &filter_text, vec![attr.as_str()])
                .await
                .map_err(|e| Error::backend_with_filter(e.to_string(), filter_text.as_str()))?;
            if res.rc != RC_SUCCESS && res.rc != RC_SIZE_LIMIT_EXCEEDED {
                return Err(Error::backend_with_filter(
                    format!("Search failed with code {}: {}", res.rc, res.text),
                    filter_text.as_str(),
                ));
            }
            let mut distinct = BTreeSet::new();
            for entry in entries.into_iter().map(SearchEntry::construct) {
                if is_id {
                    distinct.extend(read_guid(&entry, &attr).map(|id| id.to_string()));
                } else if is_groups {
                    distinct.extend(values(&entry, &attr).iter().map(|dn| rdn_value(dn)));
                } else {
                    distinct.extend(values(&entry, &attr).iter().cloned());
                }
            }
            Ok(distinct.into_iter().collect())
        })
        .await
    }

    async fn add_no_cache(&self, user: NewUser) -> Result<User> {
        user.validate()?;
        if let Some(password) = &user.password {
            check_password_length(password)?;
        }
        let dn = format!("CN={},{}", dn_escape(user.user_name.as_str()), self.config.user_base_dn);

        let mut attrs: Vec<(String, HashSet<String>)> = vec![
            (
                "objectClass".to_string(),
                USER_OBJECT_CLASSES.iter().map(|c| c.to_string()).collect(),
            ),
            (
                self.attribute(fields::USER_NAME).to_string(),
                HashSet::from([user.user_name.clone()]),
            ),
        ];
        let optional = [
            (fields::EMAIL, &user.email),
            (fields::DISPLAY_NAME, &user.display_name),
            (fields::FIRST_NAME, &user.first_name),
            (fields::LAST_NAME, &user.last_name),
            (fields::PHONE, &user.phone),
        ];
        for (field, value) in optional {
            if let Some(value) = value {
                attrs.push((self.attribute(field).to_string(), HashSet::from([value.clone()])));
            }
        }

        let created = self
            .with_search_handle(|mut ldap| async move {
                let result = ldap
                    .add(&dn, attrs)
                    .await
                    .map_err(|e| Error::backend(format!("Failed to create {}: {}", dn, e)))?;
                if result.rc == RC_ENTRY_ALREADY_EXISTS {
                    return Err(Error::InvalidArgument(format!(
                        "User '{}' already exists",
                        user.user_name
                    )));
                }
                if result.rc != RC_SUCCESS {
                    return Err(Error::backend(format!(
                        "Creating {} failed with code {}: {}",
                        dn, result.rc, result.text
                    )));
                }

                // Accounts stay disabled until they carry a password.
                if let Some(password) = &user.password {
                    let rc = self.replace_password(&mut ldap, &dn, password).await?;
                    if rc != RC_SUCCESS {
                        return Err(Error::backend(format!(
                            "Setting the initial password for {} failed with code {}",
                            dn, rc
                        )));
                    }
                    let enable = vec![Mod::Replace(
                        USER_ACCOUNT_CONTROL.to_string(),
                        HashSet::from([NORMAL_ACCOUNT.to_string()]),
                    )];
                    ldap.modify(&dn, enable)
                        .await
                        .map_err(|e| Error::backend(e.to_string()))?;
                }

                for group in &user.groups {
                    if let Some(group_dn) = self.find_group_dn(&mut ldap, group).await? {
                        let change = Mod::Add(MEMBER.to_string(), HashSet::from([dn.clone()]));
                        ldap.modify(&group_dn, vec![change])
                            .await
                            .map_err(|e| Error::backend(e.to_string()))?;
                    } else {
                        warn!("Group {} not found while creating {}", group, dn);
                    }
                }

                self.read_user(&mut ldap, &dn)
                    .await?
                    .ok_or_else(|| Error::backend(format!("Created entry {} could not be read back", dn)))
            })
            .await?;

        info!("Created directory user {}", created.user_name);
        Ok(created)
    }

    async fn update_no_cache(&self, user: &User) -> Result<()> {
        user.ensure_writable("update")?;
        let mods = self.profile_mods(user);
        let id = user.id;

        self.with_search_handle(|mut ldap| async move {
            let Some(dn) = self.find_user_dn(&mut ldap, id).await? else {
                return Err(Error::NotFound(format!("user {}", id)));
            };
            let result = ldap
                .modify(&dn, mods)
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            if result.rc != RC_SUCCESS {
                return Err(Error::backend(format!(
                    "Updating {} failed with code {}: {}",
                    dn, result.rc, result.text
                )));
            }
            Ok(())
        })
        .await
    }

    async fn remove_no_cache(&self, id: Uuid) -> Result<bool> {
        self.with_search_handle(|mut ldap| async move {
            let Some(dn) = self.find_user_dn(&mut ldap, id).await? else {
                return Ok(false);
            };
            let result = ldap
                .delete(&dn)
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            match result.rc {
                RC_SUCCESS => {
                    info!("Removed directory user {}", dn);
                    Ok(true)
                }
                RC_NO_SUCH_OBJECT => Ok(false),
                rc => Err(Error::backend(format!(
                    "Removing {} failed with code {}: {}",
                    dn, rc, result.text
                ))),
            }
        })
        .await
    }

    async fn set_password_no_cache(&self, id: Uuid, password: &str) -> Result<bool> {
        check_password_length(password)?;
        self.with_search_handle(|mut ldap| async move {
            let Some(dn) = self.find_user_dn(&mut ldap, id).await? else {
                return Ok(false);
            };
            match self.replace_password(&mut ldap, &dn, password).await? {
                RC_SUCCESS => Ok(true),
                RC_NO_SUCH_OBJECT => Ok(false),
                rc => Err(Error::backend(format!(
                    "Password change for {} rejected with code {}",
                    dn, rc
                ))),
            }
        })
        .await
    }

    async fn add_to_group_no_cache(&self, id: Uuid, group: &str) -> Result<bool> {
        self.modify_membership(id, group, true).await
    }

    async fn remove_from_group_no_cache(&self, id: Uuid, group: &str) -> Result<bool> {
        self.modify_membership(id, group, false).await
    }

    async fn verify_password_no_cache(&self, user: &User, password: &str) -> Result<bool> {
        // An empty password would be an unauthenticated bind, which succeeds.
        if password.is_empty() || password.chars().count() > MAX_PASSWORD_LENGTH {
            return Ok(false);
        }
        let id = user.id;
        let Some(dn) = self
            .with_search_handle(|mut ldap| async move { self.find_user_dn(&mut ldap, id).await })
            .await?
        else {
            return Ok(false);
        };

        let mut ldap = self.connect().await?;
        let result = ldap
            .simple_bind(&dn, password)
            .await
            .map_err(|e| Error::backend(format!("User bind failed: {}", e)));
        if let Err(e) = ldap.unbind().await {
            debug!("LDAP unbind failed: {}", e);
        }
        let result = result?;

        match result.rc {
            RC_SUCCESS => Ok(true),
            RC_INVALID_CREDENTIALS => Ok(false),
            rc => {
                // Disabled, locked or expired accounts.
                debug!("Bind as {} refused with code {}: {}", dn, rc, result.text);
                Ok(false)
            }
        }
    }
}

fn check_password_length(password: &str) -> Result<()> {
    if password.chars().count() > MAX_PASSWORD_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "Password exceeds {} characters",
            MAX_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// unicodePwd takes the quoted password in UTF-16LE.
fn encode_unicode_password(password: &str) -> Vec<u8> {
    format!("\"{}\"", password)
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

fn values<'e>(entry: &'e SearchEntry, attr: &str) -> &'e [String] {
    entry
        .attrs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attr))
        .map(|(_, values)| values.as_slice())
        .unwrap_or(&[])
}

fn first_value(entry: &SearchEntry, attr: &str) -> Option<String> {
    values(entry, attr).first().cloned()
}

/// objectGUID lands in `attrs` when its bytes happen to be valid UTF-8.
fn read_guid(entry: &SearchEntry, attr: &str) -> Option<Uuid> {
    let binary = entry
        .bin_attrs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attr))
        .and_then(|(_, values)| values.first())
        .map(|bytes| bytes.as_slice());
    let bytes = binary.or_else(|| values(entry, attr).first().map(|s| s.as_bytes()))?;
    decode_guid(bytes)
}

/// Value of the leading RDN, e.g. `Staff` for `CN=Staff,OU=Groups,DC=corp`.
fn rdn_value(dn: &str) -> String {
    let mut out = String::new();
    let mut escaped = false;
    for c in dn.chars() {
        match c {
            _ if escaped => {
                out.push(c);
                escaped = false;
            }
            '\\' => escaped = true,
            ',' => break,
            _ => out.push(c),
        }
    }
    match out.split_once('=') {
        Some((_, value)) => value.to_string(),
        None => out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn backend() -> ActiveDirectoryBackend {
        ActiveDirectoryBackend::new(LdapConfig {
            user_base_dn: "OU=Staff,DC=corp,DC=local".into(),
            ..LdapConfig::default()
        })
    }

    fn entry(id: Uuid) -> SearchEntry {
        let mut attrs = HashMap::new();
        attrs.insert("sAMAccountName".to_string(), vec!["alice".to_string()]);
        attrs.insert("mail".to_string(), vec!["alice@corp.local".to_string()]);
        attrs.insert(
            "memberOf".to_string(),
            vec![
                "CN=Staff,OU=Groups,DC=corp,DC=local".to_string(),
                "CN=R\\, D,OU=Groups,DC=corp,DC=local".to_string(),
            ],
        );
        attrs.insert("whenCreated".to_string(), vec!["20240102030405.0Z".to_string()]);
        let mut bin_attrs = HashMap::new();
        bin_attrs.insert("objectGUID".to_string(), vec![id.to_bytes_le().to_vec()]);
        SearchEntry {
            dn: "CN=alice,OU=Staff,DC=corp,DC=local".to_string(),
            attrs,
            bin_attrs,
        }
    }

    #[test]
    fn test_entry_to_user() {
        let id = Uuid::new_v4();
        let user = backend().entry_to_user(entry(id)).unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.user_name, "alice");
        assert_eq!(user.email.as_deref(), Some("alice@corp.local"));
        assert_eq!(user.groups, vec!["Staff", "R, D"]);
        assert_eq!(user.created_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert_eq!(user.kind, UserKind::Stored);
    }

    #[test]
    fn test_entry_without_guid_is_skipped() {
        let mut e = entry(Uuid::new_v4());
        e.bin_attrs.clear();
        assert!(backend().entry_to_user(e).is_none());
    }

    #[test]
    fn test_unicode_password_encoding() {
        assert_eq!(
            encode_unicode_password("ab"),
            vec![b'"', 0, b'a', 0, b'b', 0, b'"', 0]
        );
    }

    #[test]
    fn test_rdn_value() {
        assert_eq!(rdn_value("CN=Staff,DC=corp"), "Staff");
        assert_eq!(rdn_value("plain"), "plain");
    }

    #[test]
    fn test_profile_mods_clear_missing_attributes() {
        let mut user = User::new("alice");
        user.email = Some("a@x".into());
        let mods = backend().profile_mods(&user);
        assert_eq!(mods.len(), 6);
        let cleared = mods
            .iter()
            .filter(|m| matches!(m, Mod::Replace(_, values) if values.is_empty()))
            .count();
        assert_eq!(cleared, 4);
    }

    #[tokio::test]
    async fn test_read_only_user_update_rejected() {
        let mut user = User::new("config-admin");
        user.kind = UserKind::InMemory;
        let err = backend().update_no_cache(&user).await.unwrap_err();
        assert!(err.is_not_supported());
    }

    #[tokio::test]
    async fn test_empty_password_never_binds() {
        let user = User::new("alice");
        assert!(!backend().verify_password_no_cache(&user, "").await.unwrap());
    }

    #[tokio::test]
    async fn test_password_length_bound_shared_with_hasher() {
        let longest = "a".repeat(MAX_PASSWORD_LENGTH);
        let too_long = "a".repeat(MAX_PASSWORD_LENGTH + 1);
        assert!(check_password_length(&longest).is_ok());
        assert!(matches!(
            check_password_length(&too_long),
            Err(Error::InvalidArgument(_))
        ));
        assert!(rollcall_crypto::CredentialHasher::default()
            .encrypt(&too_long, None)
            .is_err());

        let user = User::new("alice");
        assert!(!backend().verify_password_no_cache(&user, &too_long).await.unwrap());
    }

    #[tokio::test]
    async fn test_untranslatable_filter_fails_before_connecting() {
        let filter = FilterExpression::Or(vec![]);
        let err = backend()
            .find_no_cache(BackendQuery::filtered(Some(&filter)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Filter(_)));
    }
}
