//! Per-directory user cache
//!
//! Holds resolved users and ids known not to exist. An id is never in both
//! sets. Entries do not expire; the cache is only ever cleared as a whole.

use rollcall_core::types::User;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Every id is either cached or known missing; holds the cached users
    Hit(Vec<User>),
    /// Every id is registered as not existing
    NotExisting,
    /// At least one id is unknown
    Miss,
}

#[derive(Debug, Default)]
pub struct DirectoryUserCache {
    users: HashMap<Uuid, User>,
    not_existing: HashSet<Uuid>,
}

impl DirectoryUserCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.not_existing.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<&User> {
        self.users.get(id)
    }

    pub fn insert(&mut self, user: User) {
        self.not_existing.remove(&user.id);
        self.users.insert(user.id, user);
    }

    pub fn extend<I: IntoIterator<Item = User>>(&mut self, users: I) {
        for user in users {
            self.insert(user);
        }
    }

    pub fn register_not_existing(&mut self, id: Uuid) {
        self.users.remove(&id);
        self.not_existing.insert(id);
    }

    pub fn is_registered_as_not_existing(&self, id: &Uuid) -> bool {
        self.not_existing.contains(id)
    }

    pub fn are_registered_as_not_existing(&self, ids: &[Uuid]) -> bool {
        !ids.is_empty() && ids.iter().all(|id| self.not_existing.contains(id))
    }

    /// Forget anything known about `id`.
    pub fn evict(&mut self, id: &Uuid) {
        self.users.remove(id);
        self.not_existing.remove(id);
    }

    /// A partial hit is a miss: the backend is asked for every id again.
    pub fn lookup(&self, ids: &[Uuid]) -> CacheLookup {
        if self.are_registered_as_not_existing(ids) {
            return CacheLookup::NotExisting;
        }
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            match self.users.get(id) {
                Some(user) => found.push(user.clone()),
                None if self.not_existing.contains(id) => {}
                None => return CacheLookup::Miss,
            }
        }
        CacheLookup::Hit(found)
    }

    pub fn clear(&mut self) {
        self.users.clear();
        self.not_existing.clear();
    }
}
