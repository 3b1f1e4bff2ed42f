//! Several directories presented as one
//!
//! Finds fan out to every member and are merged, re-sorted and windowed
//! here. Writes on existing users go to whichever member owns them; new
//! users land in the primary member.

use async_trait::async_trait;
use rollcall_core::types::{FilterExpression, NewUser, User};
use rollcall_core::{Error, Result, MAX_BACKEND_INDEX};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;
use uuid::Uuid;

use crate::outcome::OperationOutcome;
use crate::traits::{sort_and_window, FindQuery, UserDirectory};

pub struct MixedDirectory {
    members: Vec<Box<dyn UserDirectory>>,
    primary: usize,
}

impl MixedDirectory {
    pub fn new(members: Vec<Box<dyn UserDirectory>>, primary: usize) -> Result<Self> {
        if primary >= members.len() {
            return Err(Error::InvalidArgument(format!(
                "primary member {} out of range for {} members",
                primary,
                members.len()
            )));
        }
        Ok(Self { members, primary })
    }

    pub fn members(&self) -> &[Box<dyn UserDirectory>] {
        &self.members
    }

    pub fn primary(&self) -> &dyn UserDirectory {
        self.members[self.primary].as_ref()
    }

    /// Index of the member that returns `id`.
    async fn owner_of(&mut self, id: Uuid) -> Result<Option<usize>> {
        for (index, member) in self.members.iter_mut().enumerate() {
            if member.find_by_id(id).await?.is_some() {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl UserDirectory for MixedDirectory {
    fn name(&self) -> &str {
        "mixed"
    }

    async fn find(&mut self, query: &FindQuery) -> Result<Vec<User>> {
        if query.start > MAX_BACKEND_INDEX {
            return Err(Error::InvalidArgument(format!(
                "start position {} exceeds {}",
                query.start, MAX_BACKEND_INDEX
            )));
        }
        if query.count == Some(0) {
            return Ok(Vec::new());
        }

        // Each member must return everything up to the end of the window;
        // the offset only makes sense on the merged order.
        let member_query = FindQuery {
            start: 0,
            count: query.count.map(|count| query.start.saturating_add(count)),
            ..query.clone()
        };
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for member in &mut self.members {
            let users = member.find(&member_query).await?;
            debug!("{} returned {} users", member.name(), users.len());
            merged.extend(users.into_iter().filter(|u| seen.insert(u.id)));
        }
        Ok(sort_and_window(merged, &query.sort, query.start, query.count))
    }

    async fn find_distinct_values(
        &mut self,
        field: &str,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<String>> {
        let mut values = BTreeSet::new();
        for member in &mut self.members {
            values.extend(member.find_distinct_values(field, filter).await?);
        }
        Ok(values.into_iter().collect())
    }

    async fn add(&mut self, user: NewUser) -> Result<User> {
        self.members[self.primary].add(user).await
    }

    async fn update(&mut self, user: &User) -> Result<()> {
        user.ensure_writable("update")?;
        match self.owner_of(user.id).await? {
            Some(index) => self.members[index].update(user).await,
            None => Err(Error::NotFound(format!("user {}", user.id))),
        }
    }

    async fn try_remove(&mut self, id: Uuid) -> Result<OperationOutcome> {
        let mut outcome = OperationOutcome::NotFound;
        for member in &mut self.members {
            outcome = outcome.merge(member.try_remove(id).await?);
        }
        Ok(outcome)
    }

    async fn try_change_password(&mut self, id: Uuid, password: &str) -> Result<OperationOutcome> {
        let mut outcome = OperationOutcome::NotFound;
        for member in &mut self.members {
            outcome = outcome.merge(member.try_change_password(id, password).await?);
        }
        Ok(outcome)
    }

    async fn try_add_to_group(&mut self, id: Uuid, group: &str) -> Result<OperationOutcome> {
        match self.owner_of(id).await? {
            Some(index) => self.members[index].try_add_to_group(id, group).await,
            None => Ok(OperationOutcome::NotFound),
        }
    }

    async fn try_remove_from_group(&mut self, id: Uuid, group: &str) -> Result<OperationOutcome> {
        let mut outcome = OperationOutcome::NotFound;
        for member in &mut self.members {
            outcome = outcome.merge(member.try_remove_from_group(id, group).await?);
        }
        Ok(outcome)
    }

    async fn verify_password(&mut self, user: &User, password: &str) -> Result<bool> {
        if user.is_anonymous() {
            return Ok(false);
        }
        match self.owner_of(user.id).await? {
            Some(index) => self.members[index].verify_password(user, password).await,
            None => Ok(false),
        }
    }

    fn clear_cache(&mut self) {
        for member in &mut self.members {
            member.clear_cache();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Directory;
    use crate::memory::MemoryUserStore;
    use crate::test_utils::{seeded_backend, TestBackend};
    use rollcall_core::config::MemoryUserConfig;
    use rollcall_core::types::{fields, SortCriteria, SortDirection};
    use rollcall_crypto::CredentialHasher;

    fn memory_member() -> Directory<MemoryUserStore> {
        let hasher = CredentialHasher::new(10).unwrap();
        let configured: Vec<MemoryUserConfig> = ["alice", "zed"]
            .iter()
            .map(|name| MemoryUserConfig {
                user_name: name.to_string(),
                password_hash: hasher.encrypt(&format!("{}-pass", name), None).unwrap(),
                display_name: None,
                email: None,
                groups: Vec::new(),
            })
            .collect();
        Directory::new(MemoryUserStore::new(&configured, hasher).unwrap())
    }

    fn mixed(backend: &TestBackend) -> MixedDirectory {
        MixedDirectory::new(
            vec![
                Box::new(Directory::new(backend.clone())),
                Box::new(memory_member()),
            ],
            0,
        )
        .unwrap()
    }

    fn names(users: &[User]) -> Vec<String> {
        users.iter().map(|u| u.user_name.clone()).collect()
    }

    #[test]
    fn test_primary_must_exist() {
        assert!(MixedDirectory::new(Vec::new(), 0).is_err());
    }

    #[tokio::test]
    async fn test_find_merges_sorts_and_windows() {
        let backend = seeded_backend(10, true);
        let mut dir = mixed(&backend);
        let by_name = SortCriteria::by(fields::USER_NAME, SortDirection::Ascending);

        let all = dir.find(&FindQuery::all().sorted_by(by_name.clone())).await.unwrap();
        assert_eq!(all.len(), 12);
        assert_eq!(all[0].user_name, "alice");
        assert_eq!(all[11].user_name, "zed");

        let page = dir
            .find(&FindQuery::all().sorted_by(by_name).window(1, Some(3)))
            .await
            .unwrap();
        assert_eq!(names(&page), vec!["user00", "user01", "user02"]);
        // Members are asked for the whole prefix, not the offset page
        assert_eq!(backend.last_size_limit(), Some(4));
    }

    #[tokio::test]
    async fn test_add_goes_to_primary() {
        let backend = seeded_backend(2, true);
        let mut dir = mixed(&backend);
        let created = dir.add(NewUser::new("newbie").with_password("pw")).await.unwrap();
        assert!(backend.user_named("newbie").is_some());
        assert!(dir.verify_password(&created, "pw").await.unwrap());
    }

    #[tokio::test]
    async fn test_writes_route_to_owner() {
        let backend = seeded_backend(3, true);
        let mut dir = mixed(&backend);

        let mut user = dir.find_by_user_name("user01").await.unwrap().unwrap();
        user.display_name = Some("Renamed".into());
        dir.update(&user).await.unwrap();
        assert_eq!(
            backend.user_named("user01").unwrap().display_name.as_deref(),
            Some("Renamed")
        );

        assert!(dir.add_to_group(user.id, "staff").await.unwrap());
        assert!(backend.user_named("user01").unwrap().is_member_of("staff"));

        let unknown = User::new("ghost");
        assert!(matches!(dir.update(&unknown).await, Err(Error::NotFound(_))));
        assert!(!dir.add_to_group(unknown.id, "staff").await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_password_routes_to_owner() {
        let backend = seeded_backend(3, true);
        let mut dir = mixed(&backend);

        let alice = dir.find_by_user_name("alice").await.unwrap().unwrap();
        assert!(dir.verify_password(&alice, "alice-pass").await.unwrap());
        assert!(!dir.verify_password(&alice, "secret0").await.unwrap());

        let user00 = dir.find_by_user_name("user00").await.unwrap().unwrap();
        assert!(dir.verify_password(&user00, "secret0").await.unwrap());
        assert!(!dir.verify_password(&User::anonymous(), "").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_of_configured_user_not_supported() {
        let backend = seeded_backend(1, true);
        let mut dir = mixed(&backend);
        let zed = dir.find_by_user_name("zed").await.unwrap().unwrap();
        assert!(dir.try_remove(zed.id).await.unwrap_err().is_not_supported());

        let user00 = dir.find_by_user_name("user00").await.unwrap().unwrap();
        assert!(dir.remove(user00.id).await.unwrap());
        assert!(backend.user_named("user00").is_none());
    }

    #[tokio::test]
    async fn test_clear_cache_cascades() {
        let backend = seeded_backend(1, true);
        let mut dir = mixed(&backend);
        let missing = Uuid::new_v4();

        assert!(dir.find_by_id(missing).await.unwrap().is_none());
        let after_first = backend.calls();
        assert!(dir.find_by_id(missing).await.unwrap().is_none());
        assert_eq!(backend.calls(), after_first);

        dir.clear_cache();
        assert!(dir.find_by_id(missing).await.unwrap().is_none());
        assert_eq!(backend.calls(), after_first + 1);
    }

    #[tokio::test]
    async fn test_distinct_values_united() {
        let backend = seeded_backend(3, true);
        let mut dir = mixed(&backend);
        let values = dir.find_distinct_values(fields::USER_NAME, None).await.unwrap();
        assert_eq!(values, vec!["alice", "user00", "user01", "user02", "zed"]);
    }
}
