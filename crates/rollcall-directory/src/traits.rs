//! User directory contract

use async_trait::async_trait;
use rollcall_core::types::{fields, FilterExpression, NewUser, SortCriteria, User};
use rollcall_core::Result;
use uuid::Uuid;

use crate::outcome::OperationOutcome;

/// Arguments of a find call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// `None` matches every user
    pub filter: Option<FilterExpression>,
    pub sort: SortCriteria,
    /// Rows to skip in the sorted result
    pub start: u64,
    /// Rows to return after `start`; `None` is unbounded
    pub count: Option<u64>,
    /// Write the results through into the cache
    pub preload: bool,
}

impl FindQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filtered(filter: FilterExpression) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, sort: SortCriteria) -> Self {
        self.sort = sort;
        self
    }

    pub fn window(mut self, start: u64, count: Option<u64>) -> Self {
        self.start = start;
        self.count = count;
        self
    }

    pub fn with_preload(mut self) -> Self {
        self.preload = true;
        self
    }
}

/// A store of users.
///
/// Implementations own their cache and are not internally synchronized;
/// share a directory across tasks behind a mutex or build one per task.
#[async_trait]
pub trait UserDirectory: Send {
    fn name(&self) -> &str;

    async fn find(&mut self, query: &FindQuery) -> Result<Vec<User>>;

    /// Distinct values of `field` across the users matching `filter`.
    async fn find_distinct_values(
        &mut self,
        field: &str,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<String>>;

    async fn add(&mut self, user: NewUser) -> Result<User>;

    async fn update(&mut self, user: &User) -> Result<()>;

    async fn try_remove(&mut self, id: Uuid) -> Result<OperationOutcome>;

    async fn try_change_password(&mut self, id: Uuid, password: &str) -> Result<OperationOutcome>;

    async fn try_add_to_group(&mut self, id: Uuid, group: &str) -> Result<OperationOutcome>;

    async fn try_remove_from_group(&mut self, id: Uuid, group: &str) -> Result<OperationOutcome>;

    async fn verify_password(&mut self, user: &User, password: &str) -> Result<bool>;

    fn clear_cache(&mut self);

    async fn find_one(&mut self, filter: FilterExpression) -> Result<Option<User>> {
        let query = FindQuery::filtered(filter).window(0, Some(1));
        Ok(self.find(&query).await?.into_iter().next())
    }

    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<User>> {
        self.find_one(FilterExpression::id_equals(id)).await
    }

    async fn find_by_user_name(&mut self, user_name: &str) -> Result<Option<User>> {
        self.find_one(FilterExpression::equals(fields::USER_NAME, user_name))
            .await
    }

    async fn remove(&mut self, id: Uuid) -> Result<bool> {
        Ok(self.try_remove(id).await?.is_done())
    }

    async fn change_password(&mut self, id: Uuid, password: &str) -> Result<bool> {
        Ok(self.try_change_password(id, password).await?.is_done())
    }

    async fn add_to_group(&mut self, id: Uuid, group: &str) -> Result<bool> {
        Ok(self.try_add_to_group(id, group).await?.is_done())
    }

    async fn remove_from_group(&mut self, id: Uuid, group: &str) -> Result<bool> {
        Ok(self.try_remove_from_group(id, group).await?.is_done())
    }
}

/// Sort `users` by `sort` and cut out `[start, start + count)`.
pub fn sort_and_window(mut users: Vec<User>, sort: &SortCriteria, start: u64, count: Option<u64>) -> Vec<User> {
    if !sort.is_empty() {
        sort.sort_users(&mut users);
    }
    window(users, start, count)
}

pub fn window(users: Vec<User>, start: u64, count: Option<u64>) -> Vec<User> {
    let start = usize::try_from(start).unwrap_or(usize::MAX);
    let iter = users.into_iter().skip(start);
    match count {
        Some(count) => iter.take(usize::try_from(count).unwrap_or(usize::MAX)).collect(),
        None => iter.collect(),
    }
}
