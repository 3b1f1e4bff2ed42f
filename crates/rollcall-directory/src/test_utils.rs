//! In-process backend that records the queries it serves

use async_trait::async_trait;
use parking_lot::Mutex;
use rollcall_core::types::{FilterExpression, NewUser, SortCriteria, User};
use rollcall_core::{BackendQuery, DirectoryBackend, Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct RecordedQuery {
    filter: Option<FilterExpression>,
    size_limit: Option<u32>,
    sorted: bool,
}

/// Clones share state, so a test can keep a handle on a backend it moved
/// into a directory.
#[derive(Clone)]
pub struct TestBackend {
    users: Arc<Mutex<Vec<User>>>,
    passwords: Arc<Mutex<HashMap<Uuid, String>>>,
    native_sort: bool,
    calls: Arc<AtomicUsize>,
    max_seen_chain: Arc<AtomicUsize>,
    last_query: Arc<Mutex<RecordedQuery>>,
    fail_writes: Arc<AtomicBool>,
}

/// `count` users named `user00..`, with emails shared by groups of users.
pub fn seeded_backend(count: usize, native_sort: bool) -> TestBackend {
    let backend = TestBackend::new(native_sort);
    {
        let mut users = backend.users.lock();
        let mut passwords = backend.passwords.lock();
        for i in 0..count {
            let mut user = User::new(format!("user{:02}", i));
            user.email = Some(format!("team{}@x.io", i % 5));
            passwords.insert(user.id, format!("secret{}", i));
            users.push(user);
        }
    }
    backend
}

impl TestBackend {
    pub fn new(native_sort: bool) -> Self {
        Self {
            users: Arc::default(),
            passwords: Arc::default(),
            native_sort,
            calls: Arc::default(),
            max_seen_chain: Arc::default(),
            last_query: Arc::default(),
            fail_writes: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_seen_chain(&self) -> usize {
        self.max_seen_chain.load(Ordering::SeqCst)
    }

    pub fn last_filter(&self) -> Option<FilterExpression> {
        self.last_query.lock().filter.clone()
    }

    pub fn last_size_limit(&self) -> Option<u32> {
        self.last_query.lock().size_limit
    }

    pub fn last_sorted(&self) -> bool {
        self.last_query.lock().sorted
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn user_named(&self, name: &str) -> Option<User> {
        self.users.lock().iter().find(|u| u.user_name == name).cloned()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::backend("simulated outage"));
        }
        Ok(())
    }

    fn matching(&self, filter: Option<&FilterExpression>) -> Vec<User> {
        self.users
            .lock()
            .iter()
            .filter(|u| filter.map_or(true, |f| f.matches(u)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DirectoryBackend for TestBackend {
    fn name(&self) -> &str {
        "test"
    }

    fn supports_native_sort(&self) -> bool {
        self.native_sort
    }

    async fn find_no_cache(&self, query: BackendQuery<'_>) -> Result<Vec<User>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(filter) = query.filter {
            self.max_seen_chain.fetch_max(filter.chain_len(), Ordering::SeqCst);
        }
        *self.last_query.lock() = RecordedQuery {
            filter: query.filter.cloned(),
            size_limit: query.size_limit,
            sorted: query.sort.is_some(),
        };

        let mut users = self.matching(query.filter);
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
        self.calls.fetch_add(1, Ordering::SeqCst);
        let values: BTreeSet<String> = self
            .matching(filter)
            .iter()
            .flat_map(|u| u.field_values(field))
            .collect();
        Ok(values.into_iter().collect())
    }

    async fn add_no_cache(&self, user: NewUser) -> Result<User> {
        self.check_writable()?;
        let password = user.password.clone();
        let created = user.into_user(None);
        if let Some(password) = password {
            self.passwords.lock().insert(created.id, password);
        }
        self.users.lock().push(created.clone());
        Ok(created)
    }

    async fn update_no_cache(&self, user: &User) -> Result<()> {
        self.check_writable()?;
        let mut users = self.users.lock();
        let existing = users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or_else(|| Error::NotFound(format!("user {}", user.id)))?;
        *existing = user.clone();
        existing.modified_at = user.modified_at + chrono::Duration::seconds(1);
        Ok(())
    }

    async fn remove_no_cache(&self, id: Uuid) -> Result<bool> {
        self.check_writable()?;
        let mut users = self.users.lock();
        let before = users.len();
        users.retain(|u| u.id != id);
        Ok(users.len() != before)
    }

    async fn set_password_no_cache(&self, id: Uuid, password: &str) -> Result<bool> {
        self.check_writable()?;
        if !self.users.lock().iter().any(|u| u.id == id) {
            return Ok(false);
        }
        self.passwords.lock().insert(id, password.to_string());
        Ok(true)
    }

    async fn add_to_group_no_cache(&self, id: Uuid, group: &str) -> Result<bool> {
        self.check_writable()?;
        let mut users = self.users.lock();
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(false);
        };
        if !user.is_member_of(group) {
            user.groups.push(group.to_string());
        }
        Ok(true)
    }

    async fn remove_from_group_no_cache(&self, id: Uuid, group: &str) -> Result<bool> {
        self.check_writable()?;
        let mut users = self.users.lock();
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(false);
        };
        let before = user.groups.len();
        user.groups.retain(|g| !g.eq_ignore_ascii_case(group));
        Ok(user.groups.len() != before)
    }

    async fn verify_password_no_cache(&self, user: &User, password: &str) -> Result<bool> {
        Ok(self.passwords.lock().get(&user.id).map(String::as_str) == Some(password))
    }
}
