//! Cached directory over a single backend
//!
//! `Directory` owns the cache and the find orchestration: id-only filters
//! go through the cache, oversized filters and sort/limit combinations the
//! backend cannot serve are split into bounded parts whose merged results
//! are sorted and windowed locally.

use async_trait::async_trait;
use rollcall_core::config::DirectoryConfig;
use rollcall_core::types::{Connective, FilterExpression, NewUser, SortCriteria, User};
use rollcall_core::utils::clamp_to_backend_index;
use rollcall_core::{
    BackendQuery, DirectoryBackend, Error, Result, DEFAULT_MAX_CHAIN_LENGTH, MAX_BACKEND_INDEX,
};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;
use uuid::Uuid;

use crate::cache::{CacheLookup, DirectoryUserCache};
use crate::outcome::OperationOutcome;
use crate::traits::{sort_and_window, window, FindQuery, UserDirectory};

pub struct Directory<B> {
    backend: B,
    cache: DirectoryUserCache,
    max_chain_length: usize,
}

impl<B: DirectoryBackend> Directory<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            cache: DirectoryUserCache::new(),
            max_chain_length: DEFAULT_MAX_CHAIN_LENGTH,
        }
    }

    pub fn with_config(backend: B, config: &DirectoryConfig) -> Self {
        Self::new(backend).with_max_chain_length(config.max_chain_length)
    }

    pub fn with_max_chain_length(mut self, max_chain_length: usize) -> Self {
        self.max_chain_length = max_chain_length.max(1);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cache(&self) -> &DirectoryUserCache {
        &self.cache
    }

    /// Whether a find must be split and merged locally.
    fn needs_split(&self, filter: Option<&FilterExpression>, sort: &SortCriteria, bounded: bool) -> bool {
        let too_long = filter.is_some_and(|f| f.chain_len() > self.max_chain_length);
        let unsortable = bounded
            && (sort.len() > 1 || (sort.len() == 1 && !self.backend.supports_native_sort()));
        too_long || unsortable
    }

    /// Every user matching `filter`, unsorted, splitting when the chain is
    /// too long for one backend call.
    async fn fetch_all(&self, filter: Option<&FilterExpression>) -> Result<Vec<User>> {
        let Some(filter) = filter else {
            return self.backend.find_no_cache(BackendQuery::all()).await;
        };
        let split = filter.split(self.max_chain_length);
        if split.parts.len() > 1 {
            debug!(
                "Splitting filter of {} links into {} parts on {}",
                filter.chain_len(),
                split.parts.len(),
                self.backend.name()
            );
        }

        let mut merged: Option<Vec<User>> = None;
        for part in &split.parts {
            let users = self
                .backend
                .find_no_cache(BackendQuery::filtered(Some(part)))
                .await?;
            merged = Some(match (merged, split.connective) {
                (None, _) => users,
                (Some(acc), Some(Connective::And)) => intersect(acc, &users),
                (Some(acc), _) => union(acc, users),
            });
        }
        Ok(merged.map(dedupe).unwrap_or_default())
    }

    async fn find_uncached(&self, query: &FindQuery) -> Result<Vec<User>> {
        let filter = query.filter.as_ref();

        if self.needs_split(filter, &query.sort, query.count.is_some()) {
            let users = self.fetch_all(filter).await?;
            return Ok(sort_and_window(users, &query.sort, query.start, query.count));
        }

        let size_limit = query
            .count
            .map(|count| clamp_to_backend_index(query.start.saturating_add(count)));
        let native_sort = if query.sort.len() == 1 && self.backend.supports_native_sort() {
            query.sort.first()
        } else {
            None
        };
        let mut users = self
            .backend
            .find_no_cache(BackendQuery {
                filter,
                sort: native_sort,
                size_limit,
            })
            .await?;
        if native_sort.is_none() && !query.sort.is_empty() {
            query.sort.sort_users(&mut users);
        }
        // The backend only caps the row count; the offset is applied here.
        Ok(window(users, query.start, query.count))
    }

    async fn find_by_ids(&mut self, ids: &[Uuid], query: &FindQuery) -> Result<Vec<User>> {
        match self.cache.lookup(ids) {
            CacheLookup::Hit(users) => {
                debug!("Cache hit for {} ids on {}", ids.len(), self.backend.name());
                return Ok(sort_and_window(users, &query.sort, query.start, query.count));
            }
            CacheLookup::NotExisting => {
                debug!("Negative cache hit for {} ids on {}", ids.len(), self.backend.name());
                return Ok(Vec::new());
            }
            CacheLookup::Miss => {
                debug!("Cache miss for {} ids on {}", ids.len(), self.backend.name());
            }
        }

        // Canonical ids, whatever spelling the caller used
        let Some(filter) = FilterExpression::any_id(ids.iter().copied()) else {
            return Ok(Vec::new());
        };
        let users = self.fetch_all(Some(&filter)).await?;
        let returned: HashSet<Uuid> = users.iter().map(|u| u.id).collect();
        for id in ids.iter().filter(|id| !returned.contains(id)) {
            self.cache.register_not_existing(*id);
        }
        self.cache.extend(users.iter().cloned());
        Ok(sort_and_window(users, &query.sort, query.start, query.count))
    }
}

fn dedupe(users: Vec<User>) -> Vec<User> {
    let mut seen = HashSet::new();
    users.into_iter().filter(|u| seen.insert(u.id)).collect()
}

fn union(mut acc: Vec<User>, more: Vec<User>) -> Vec<User> {
    acc.extend(more);
    acc
}

fn intersect(acc: Vec<User>, other: &[User]) -> Vec<User> {
    let keep: HashSet<Uuid> = other.iter().map(|u| u.id).collect();
    acc.into_iter().filter(|u| keep.contains(&u.id)).collect()
}

#[async_trait]
impl<B: DirectoryBackend> UserDirectory for Directory<B> {
    fn name(&self) -> &str {
        self.backend.name()
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

        if let Some(filter) = &query.filter {
            if let Some(ids) = filter.id_only_values() {
                return self.find_by_ids(&ids, query).await;
            }
        }

        let users = self.find_uncached(query).await?;
        if query.preload {
            self.cache.extend(users.iter().cloned());
        }
        Ok(users)
    }

    async fn find_distinct_values(
        &mut self,
        field: &str,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<String>> {
        let Some(filter) = filter else {
            return self.backend.find_distinct_values(field, None).await;
        };
        let split = filter.split(self.max_chain_length);
        if split.parts.len() == 1 {
            return self.backend.find_distinct_values(field, Some(filter)).await;
        }
        if split.connective == Some(Connective::And) {
            // Intersections need whole users; values alone cannot be intersected.
            let mut values = BTreeSet::new();
            for user in self.fetch_all(Some(filter)).await? {
                values.extend(user.field_values(field));
            }
            return Ok(values.into_iter().collect());
        }
        let mut values = BTreeSet::new();
        for part in &split.parts {
            values.extend(self.backend.find_distinct_values(field, Some(part)).await?);
        }
        Ok(values.into_iter().collect())
    }

    async fn add(&mut self, user: NewUser) -> Result<User> {
        user.validate()?;
        let created = self.backend.add_no_cache(user).await?;
        self.cache.insert(created.without_secret());
        Ok(created)
    }

    async fn update(&mut self, user: &User) -> Result<()> {
        user.ensure_writable("update")?;
        self.backend.update_no_cache(user).await?;
        // The backend may stamp fields of its own, so cache what it stored
        let id_filter = FilterExpression::id_equals(user.id);
        let stored = self
            .backend
            .find_no_cache(BackendQuery::filtered(Some(&id_filter)))
            .await?;
        match stored.into_iter().next() {
            Some(stored) => self.cache.insert(stored.without_secret()),
            None => self.cache.evict(&user.id),
        }
        Ok(())
    }

    async fn try_remove(&mut self, id: Uuid) -> Result<OperationOutcome> {
        let outcome = OperationOutcome::from_result("remove", self.backend.remove_no_cache(id).await)?;
        match outcome {
            OperationOutcome::Failed(_) => self.cache.evict(&id),
            _ => self.cache.register_not_existing(id),
        }
        Ok(outcome)
    }

    async fn try_change_password(&mut self, id: Uuid, password: &str) -> Result<OperationOutcome> {
        OperationOutcome::from_result(
            "change password",
            self.backend.set_password_no_cache(id, password).await,
        )
    }

    async fn try_add_to_group(&mut self, id: Uuid, group: &str) -> Result<OperationOutcome> {
        let result = self.backend.add_to_group_no_cache(id, group).await;
        self.cache.evict(&id);
        OperationOutcome::from_result("add to group", result)
    }

    async fn try_remove_from_group(&mut self, id: Uuid, group: &str) -> Result<OperationOutcome> {
        let result = self.backend.remove_from_group_no_cache(id, group).await;
        self.cache.evict(&id);
        OperationOutcome::from_result("remove from group", result)
    }

    async fn verify_password(&mut self, user: &User, password: &str) -> Result<bool> {
        if user.is_anonymous() {
            return Ok(false);
        }
        self.backend.verify_password_no_cache(user, password).await
    }

    fn clear_cache(&mut self) {
        self.cache.clear();
    }
}
