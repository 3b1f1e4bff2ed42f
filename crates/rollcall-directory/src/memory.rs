//! Read-only backend over statically configured users

use async_trait::async_trait;
use rollcall_core::config::MemoryUserConfig;
use rollcall_core::types::{FilterExpression, NewUser, SortCriteria, User, UserKind};
use rollcall_core::{BackendQuery, DirectoryBackend, Error, Result};
use rollcall_crypto::{sha256_concat, CredentialHasher};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;
use uuid::Uuid;

pub struct MemoryUserStore {
    users: Vec<User>,
    by_id: HashMap<Uuid, usize>,
    hasher: CredentialHasher,
}

/// Stable id for a configured user, so ids survive restarts.
pub fn memory_user_id(user_name: &str) -> Uuid {
    let name = user_name.to_lowercase();
    let digest = sha256_concat(&[b"rollcall-memory-user:".as_slice(), name.as_bytes()]);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

impl MemoryUserStore {
    pub fn new(configured: &[MemoryUserConfig], hasher: CredentialHasher) -> Result<Self> {
        let mut users = Vec::with_capacity(configured.len());
        let mut by_id = HashMap::new();
        for entry in configured {
            NewUser::new(entry.user_name.clone()).validate()?;
            let id = memory_user_id(&entry.user_name);
            if by_id.contains_key(&id) {
                return Err(Error::ConfigError(format!(
                    "memory user '{}' is configured twice",
                    entry.user_name
                )));
            }
            let mut user = User::new(entry.user_name.clone());
            user.id = id;
            user.kind = UserKind::InMemory;
            user.display_name = entry.display_name.clone();
            user.email = entry.email.clone();
            user.groups = entry.groups.clone();
            user.password_hash = Some(entry.password_hash.clone());
            by_id.insert(id, users.len());
            users.push(user);
        }
        debug!("Loaded {} configured users", users.len());
        Ok(Self {
            users,
            by_id,
            hasher,
        })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn owns(&self, id: Uuid) -> bool {
        self.by_id.contains_key(&id)
    }

    /// `Ok(false)` for foreign ids, `NotSupported` for our own.
    fn refuse_write(&self, id: Uuid, operation: &str) -> Result<bool> {
        if self.owns(id) {
            return Err(Error::NotSupported(format!(
                "{} on configured user {}",
                operation, id
            )));
        }
        Ok(false)
    }

    fn matching<'a>(
        &'a self,
        filter: Option<&'a FilterExpression>,
    ) -> impl Iterator<Item = &'a User> + 'a {
        self.users
            .iter()
            .filter(move |u| filter.map_or(true, |f| f.matches(u)))
    }
}

#[async_trait]
impl DirectoryBackend for MemoryUserStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn supports_native_sort(&self) -> bool {
        true
    }

    async fn find_no_cache(&self, query: BackendQuery<'_>) -> Result<Vec<User>> {
        let mut users: Vec<User> = self
            .matching(query.filter)
            .map(User::without_secret)
            .collect();
        if let Some(criterion) = query.sort {
            SortCriteria::from(vec![criterion.clone()]).sort_users(&mut users);
        }
        if let Some(limit) = query.size_limit {
            users.truncate(limit as usize);
        }
        Ok(users)
    }

    async fn find_distinct_values(
        &self,
        field: &str,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<String>> {
        let values: BTreeSet<String> = self
            .matching(filter)
            .flat_map(|u| u.field_values(field))
            .collect();
        Ok(values.into_iter().collect())
    }

    async fn add_no_cache(&self, user: NewUser) -> Result<User> {
        Err(Error::NotSupported(format!(
            "cannot add '{}' to the configured user list",
            user.user_name
        )))
    }

    async fn update_no_cache(&self, user: &User) -> Result<()> {
        Err(Error::NotSupported(format!(
            "cannot update configured user '{}'",
            user.user_name
        )))
    }

    async fn remove_no_cache(&self, id: Uuid) -> Result<bool> {
        self.refuse_write(id, "remove")
    }

    async fn set_password_no_cache(&self, id: Uuid, _password: &str) -> Result<bool> {
        self.refuse_write(id, "change password")
    }

    async fn add_to_group_no_cache(&self, id: Uuid, _group: &str) -> Result<bool> {
        self.refuse_write(id, "add to group")
    }

    async fn remove_from_group_no_cache(&self, id: Uuid, _group: &str) -> Result<bool> {
        self.refuse_write(id, "remove from group")
    }

    async fn verify_password_no_cache(&self, user: &User, password: &str) -> Result<bool> {
        let Some(index) = self.by_id.get(&user.id) else {
            return Ok(false);
        };
        let Some(encoded) = self.users[*index].password_hash.as_deref() else {
            return Ok(false);
        };
        Ok(self.hasher.verify(password, encoded))
    }
}
