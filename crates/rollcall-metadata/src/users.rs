//! Relational user store

use async_trait::async_trait;
use chrono::Utc;
use rollcall_core::types::{FilterExpression, NewUser, SortCriteria, User, UserKind};
use rollcall_core::{BackendQuery, DirectoryBackend, Error, Result};
use rollcall_crypto::CredentialHasher;
use sqlx::sqlite::SqlitePool;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::query::{
    column_for, decode_timestamp, encode_timestamp, order_by, push_filter, Column, USER_COLUMNS,
};

/// Row shape of [`USER_COLUMNS`]
pub(crate) type UserRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
);

/// Ids per `IN (...)` list when loading group memberships
const GROUP_BATCH: usize = 500;

fn db_error(e: sqlx::Error) -> Error {
    Error::DatabaseError(e.to_string())
}

fn parse_id(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| Error::DatabaseError(format!("bad user id '{}': {}", text, e)))
}

pub struct SqlUserStore {
    pool: SqlitePool,
    hasher: CredentialHasher,
}

impl SqlUserStore {
    pub async fn new(pool: SqlitePool, hasher: CredentialHasher) -> Result<Self> {
        let store = Self { pool, hasher };
        store.init().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                user_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                email TEXT,
                display_name TEXT,
                first_name TEXT,
                last_name TEXT,
                phone TEXT,
                password_hash TEXT,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_groups (
                user_id TEXT NOT NULL,
                group_name TEXT NOT NULL COLLATE NOCASE,
                PRIMARY KEY (user_id, group_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        info!("User store initialized");
        Ok(())
    }

    fn to_user(row: UserRow) -> Result<User> {
        Ok(User {
            id: parse_id(&row.0)?,
            user_name: row.1,
            email: row.2,
            display_name: row.3,
            first_name: row.4,
            last_name: row.5,
            phone: row.6,
            groups: Vec::new(),
            password_hash: None,
            created_at: decode_timestamp(&row.7)?,
            modified_at: decode_timestamp(&row.8)?,
            kind: UserKind::Stored,
        })
    }

    async fn attach_groups(&self, users: &mut [User]) -> Result<()> {
        let mut groups: HashMap<Uuid, Vec<String>> = HashMap::new();
        for chunk in users.chunks(GROUP_BATCH) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT user_id, group_name FROM user_groups WHERE user_id IN (",
            );
            let mut ids = qb.separated(", ");
            for user in chunk {
                ids.push_bind(user.id.to_string());
            }
            qb.push(") ORDER BY rowid");
            let rows: Vec<(String, String)> = qb
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;
            for (user_id, group) in rows {
                groups.entry(parse_id(&user_id)?).or_default().push(group);
            }
        }
        for user in users.iter_mut() {
            user.groups = groups.remove(&user.id).unwrap_or_default();
        }
        Ok(())
    }

    async fn exists(&self, id: Uuid) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.is_some())
    }

    fn encrypt(&self, password: &str) -> Result<String> {
        self.hasher
            .encrypt(password, None)
            .map_err(|e| Error::InvalidArgument(e.to_string()))
    }
}

fn unique_violation(e: sqlx::Error, user_name: &str) -> Error {
    if e.to_string().contains("UNIQUE constraint") {
        Error::InvalidArgument(format!("user name '{}' is already taken", user_name))
    } else {
        db_error(e)
    }
}

#[async_trait]
impl DirectoryBackend for SqlUserStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn supports_native_sort(&self) -> bool {
        true
    }

    async fn find_no_cache(&self, query: BackendQuery<'_>) -> Result<Vec<User>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM users", USER_COLUMNS));
        if let Some(filter) = query.filter {
            qb.push(" WHERE ");
            push_filter(&mut qb, filter)?;
        }
        let order = query.sort.and_then(order_by);
        let sort_locally = query.sort.is_some() && order.is_none();
        match &order {
            Some(clause) => {
                qb.push(clause);
            }
            None => {
                qb.push(" ORDER BY rowid");
            }
        }
        if let (Some(limit), false) = (query.size_limit, sort_locally) {
            qb.push(" LIMIT ");
            qb.push_bind(i64::from(limit));
        }
        debug!("sqlite find: {}", qb.sql());

        let rows: Vec<UserRow> = qb.build_query_as().fetch_all(&self.pool).await.map_err(|e| {
            match query.filter {
                Some(filter) => Error::backend_with_filter(e.to_string(), filter.to_string()),
                None => db_error(e),
            }
        })?;
        let mut users = rows.into_iter().map(Self::to_user).collect::<Result<Vec<_>>>()?;
        self.attach_groups(&mut users).await?;

        if sort_locally {
            if let Some(criterion) = query.sort {
                SortCriteria::from(vec![criterion.clone()]).sort_users(&mut users);
            }
            if let Some(limit) = query.size_limit {
                users.truncate(limit as usize);
            }
        }
        Ok(users)
    }

    async fn find_distinct_values(
        &self,
        field: &str,
        filter: Option<&FilterExpression>,
    ) -> Result<Vec<String>> {
        let mut qb = match column_for(field)? {
            Column::Users(column) => QueryBuilder::<Sqlite>::new(format!(
                "SELECT DISTINCT {col} FROM users WHERE {col} IS NOT NULL",
                col = column
            )),
            Column::Groups => QueryBuilder::<Sqlite>::new(
                "SELECT DISTINCT g.group_name FROM user_groups g JOIN users ON users.id = g.user_id WHERE 1 = 1",
            ),
        };
        if let Some(filter) = filter {
            qb.push(" AND ");
            push_filter(&mut qb, filter)?;
        }
        qb.push(" ORDER BY 1");
        let rows: Vec<(String,)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(|(value,)| value).collect())
    }

    async fn add_no_cache(&self, user: NewUser) -> Result<User> {
        let password_hash = user
            .password
            .as_deref()
            .map(|p| self.encrypt(p))
            .transpose()?;
        let user_name = user.user_name.clone();
        let created = user.into_user(password_hash);

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query(
            r#"
            INSERT INTO users (id, user_name, email, display_name, first_name, last_name, phone,
                               password_hash, created_at, modified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(created.id.to_string())
        .bind(&created.user_name)
        .bind(&created.email)
        .bind(&created.display_name)
        .bind(&created.first_name)
        .bind(&created.last_name)
        .bind(&created.phone)
        .bind(&created.password_hash)
        .bind(encode_timestamp(&created.created_at))
        .bind(encode_timestamp(&created.modified_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_violation(e, &user_name))?;

        for group in &created.groups {
            sqlx::query("INSERT OR IGNORE INTO user_groups (user_id, group_name) VALUES (?, ?)")
                .bind(created.id.to_string())
                .bind(group)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;

        debug!("Created user: {}", created.user_name);
        Ok(created.without_secret())
    }

    async fn update_no_cache(&self, user: &User) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let result = sqlx::query(
            r#"
            UPDATE users
            SET user_name = ?, email = ?, display_name = ?, first_name = ?, last_name = ?,
                phone = ?, modified_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.user_name)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(encode_timestamp(&Utc::now()))
        .bind(user.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_violation(e, &user.user_name))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {}", user.id)));
        }

        sqlx::query("DELETE FROM user_groups WHERE user_id = ?")
            .bind(user.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        for group in &user.groups {
            sqlx::query("INSERT OR IGNORE INTO user_groups (user_id, group_name) VALUES (?, ?)")
                .bind(user.id.to_string())
                .bind(group)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;

        debug!("Updated user: {}", user.user_name);
        Ok(())
    }

    async fn remove_no_cache(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query("DELETE FROM user_groups WHERE user_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        let removed = result.rows_affected() > 0;
        if removed {
            debug!("Removed user: {}", id);
        }
        Ok(removed)
    }

    async fn set_password_no_cache(&self, id: Uuid, password: &str) -> Result<bool> {
        let encoded = self.encrypt(password)?;
        let result = sqlx::query("UPDATE users SET password_hash = ?, modified_at = ? WHERE id = ?")
            .bind(encoded)
            .bind(encode_timestamp(&Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_to_group_no_cache(&self, id: Uuid, group: &str) -> Result<bool> {
        if !self.exists(id).await? {
            return Ok(false);
        }
        sqlx::query("INSERT OR IGNORE INTO user_groups (user_id, group_name) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(group)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(true)
    }

    async fn remove_from_group_no_cache(&self, id: Uuid, group: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_groups WHERE user_id = ? AND group_name = ?")
            .bind(id.to_string())
            .bind(group)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn verify_password_no_cache(&self, user: &User, password: &str) -> Result<bool> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT password_hash FROM users WHERE id = ?")
                .bind(user.id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(match row.and_then(|(hash,)| hash) {
            Some(encoded) => self.hasher.verify(password, &encoded),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect_memory;
    use rollcall_core::types::{fields, FilterOperator, SortCriterion};

    async fn store() -> SqlUserStore {
        let pool = connect_memory().await.unwrap();
        SqlUserStore::new(pool, CredentialHasher::new(10).unwrap())
            .await
            .unwrap()
    }

    async fn seed(store: &SqlUserStore) -> Vec<User> {
        let mut users = Vec::new();
        for (name, email, group) in [
            ("alice", Some("Alice@Example.com"), "staff"),
            ("bob", None, "staff"),
            ("Carol", Some("carol@example.com"), "admins"),
            ("dave", Some("dave@other.org"), "staff"),
        ] {
            let mut new_user = NewUser::new(name).with_password(format!("{}-pw", name));
            new_user.email = email.map(String::from);
            new_user.groups = vec![group.to_string()];
            users.push(store.add_no_cache(new_user).await.unwrap());
        }
        users
    }

    fn names(users: &[User]) -> Vec<&str> {
        users.iter().map(|u| u.user_name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_add_and_find_round_trip() {
        let store = store().await;
        let seeded = seed(&store).await;
        assert!(seeded.iter().all(|u| u.password_hash.is_none()));

        let found = store.find_no_cache(BackendQuery::all()).await.unwrap();
        assert_eq!(names(&found), vec!["alice", "bob", "Carol", "dave"]);
        assert_eq!(found[2].groups, vec!["admins".to_string()]);
        assert_eq!(found[0].id, seeded[0].id);
        assert!(found.iter().all(|u| u.password_hash.is_none()));
    }

    #[tokio::test]
    async fn test_filters_match_in_memory_semantics() {
        let store = store().await;
        let seeded = seed(&store).await;
        let all = store.find_no_cache(BackendQuery::all()).await.unwrap();

        let filters = vec![
            FilterExpression::equals(fields::USER_NAME, "CAROL"),
            FilterExpression::not_equals(fields::EMAIL, "alice@example.com"),
            FilterExpression::ends_with(fields::EMAIL, "example.com"),
            FilterExpression::contains(fields::EMAIL, "%"),
            FilterExpression::equals(fields::GROUPS, "Staff"),
            FilterExpression::not_equals(fields::GROUPS, "staff"),
            FilterExpression::compare(fields::USER_NAME, FilterOperator::GreaterThan, "bob"),
            FilterExpression::id_equals(seeded[1].id).or(FilterExpression::id_equals(seeded[3].id)),
            FilterExpression::starts_with(fields::EMAIL, "c")
                .or(FilterExpression::starts_with(fields::EMAIL, "d"))
                .and(FilterExpression::equals(fields::GROUPS, "staff")),
        ];
        for filter in filters {
            let expected: Vec<Uuid> = all.iter().filter(|u| filter.matches(u)).map(|u| u.id).collect();
            let got: Vec<Uuid> = store
                .find_no_cache(BackendQuery::filtered(Some(&filter)))
                .await
                .unwrap()
                .iter()
                .map(|u| u.id)
                .collect();
            assert_eq!(got, expected, "filter {}", filter);
        }
    }

    #[tokio::test]
    async fn test_native_sort_with_size_limit() {
        let store = store().await;
        seed(&store).await;
        let criterion = SortCriterion::descending(fields::EMAIL);
        let users = store
            .find_no_cache(BackendQuery {
                filter: None,
                sort: Some(&criterion),
                size_limit: Some(3),
            })
            .await
            .unwrap();
        assert_eq!(names(&users), vec!["dave", "Carol", "alice"]);

        let mut all = store.find_no_cache(BackendQuery::all()).await.unwrap();
        SortCriteria::from(vec![criterion]).sort_users(&mut all);
        assert_eq!(names(&all[..3]), names(&users));
    }

    #[tokio::test]
    async fn test_sort_by_groups_falls_back_to_memory() {
        let store = store().await;
        seed(&store).await;
        let criterion = SortCriterion::ascending(fields::GROUPS);
        let users = store
            .find_no_cache(BackendQuery {
                filter: None,
                sort: Some(&criterion),
                size_limit: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(names(&users), vec!["Carol"]);
    }

    #[tokio::test]
    async fn test_distinct_values() {
        let store = store().await;
        seed(&store).await;
        let groups = store.find_distinct_values(fields::GROUPS, None).await.unwrap();
        assert_eq!(groups, vec!["admins", "staff"]);

        let filter = FilterExpression::equals(fields::GROUPS, "staff");
        let emails = store
            .find_distinct_values(fields::EMAIL, Some(&filter))
            .await
            .unwrap();
        assert_eq!(emails, vec!["Alice@Example.com", "dave@other.org"]);
    }

    #[tokio::test]
    async fn test_duplicate_user_name_rejected() {
        let store = store().await;
        seed(&store).await;
        let err = store.add_no_cache(NewUser::new("ALICE")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_update_remove_and_groups() {
        let store = store().await;
        let seeded = seed(&store).await;
        let mut bob = seeded[1].clone();
        bob.email = Some("bob@example.com".into());
        bob.groups = vec!["staff".into(), "ops".into()];
        store.update_no_cache(&bob).await.unwrap();

        let filter = FilterExpression::id_equals(bob.id);
        let found = store.find_no_cache(BackendQuery::filtered(Some(&filter))).await.unwrap();
        assert_eq!(found[0].email.as_deref(), Some("bob@example.com"));
        assert_eq!(found[0].groups, vec!["staff".to_string(), "ops".to_string()]);

        assert!(store.remove_from_group_no_cache(bob.id, "OPS").await.unwrap());
        assert!(!store.remove_from_group_no_cache(bob.id, "ops").await.unwrap());
        assert!(store.add_to_group_no_cache(bob.id, "audit").await.unwrap());
        assert!(!store.add_to_group_no_cache(Uuid::new_v4(), "audit").await.unwrap());

        assert!(store.remove_no_cache(bob.id).await.unwrap());
        assert!(!store.remove_no_cache(bob.id).await.unwrap());
        assert!(matches!(
            store.update_no_cache(&bob).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_password_verification_and_change() {
        let store = store().await;
        let seeded = seed(&store).await;
        let alice = &seeded[0];
        assert!(store.verify_password_no_cache(alice, "alice-pw").await.unwrap());
        assert!(!store.verify_password_no_cache(alice, "bob-pw").await.unwrap());

        assert!(store.set_password_no_cache(alice.id, "rotated").await.unwrap());
        assert!(store.verify_password_no_cache(alice, "rotated").await.unwrap());
        assert!(!store.set_password_no_cache(Uuid::new_v4(), "x").await.unwrap());

        let too_long = "a".repeat(rollcall_crypto::MAX_PASSWORD_LENGTH + 1);
        assert!(matches!(
            store.set_password_no_cache(alice.id, &too_long).await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
