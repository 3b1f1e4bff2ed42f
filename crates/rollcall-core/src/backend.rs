//! Directory backend trait
//!
//! A backend is a concrete user store (Active Directory, a relational
//! database, a static in-memory list). Backends only implement the
//! uncached primitives; caching, query splitting, pagination and sorting
//! live once in the directory wrapper composed over them.

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{FilterExpression, NewUser, SortCriterion, User};
use crate::Result;

/// One uncached query against a backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendQuery<'a> {
    /// `None` matches every user
    pub filter: Option<&'a FilterExpression>,
    /// Pushed down only when the backend supports native sorting
    pub sort: Option<&'a SortCriterion>,
    /// Absolute cap on returned rows; the backend has no offset primitive
    pub size_limit: Option<u32>,
}

impl<'a> BackendQuery<'a> {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filtered(filter: Option<&'a FilterExpression>) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Whether a single sort criterion combined with a size limit is honoured
    /// by the backend itself.
    fn supports_native_sort(&self) -> bool;

    async fn find_no_cache(&self, query: BackendQuery<'_>) -> Result<Vec<User>>;

    async fn find_distinct_values(
        &self,
        field: &str,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<String>>;

    async fn add_no_cache(&self, user: NewUser) -> Result<User>;

    async fn update_no_cache(&self, user: &User) -> Result<()>;

    /// `Ok(false)` when the user does not exist
    async fn remove_no_cache(&self, id: Uuid) -> Result<bool>;

    /// `Ok(false)` when the user does not exist
    async fn set_password_no_cache(&self, id: Uuid, password: &str) -> Result<bool>;

    async fn add_to_group_no_cache(&self, id: Uuid, group: &str) -> Result<bool>;

    async fn remove_from_group_no_cache(&self, id: Uuid, group: &str) -> Result<bool>;

    /// Check a password for a user previously returned by this backend.
    async fn verify_password_no_cache(&self, user: &User, password: &str) -> Result<bool>;
}
