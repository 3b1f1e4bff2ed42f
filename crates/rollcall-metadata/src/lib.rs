//! Relational storage for Rollcall
//!
//! Users and tokens live in SQLite through sqlx. [`SqlUserStore`] is a
//! directory backend; [`SqlTokenRepository`] persists hashed session and
//! reset tokens.

pub mod query;
pub mod tokens;
pub mod users;

use rollcall_core::config::DatabaseConfig;
use rollcall_core::{Error, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

pub use tokens::SqlTokenRepository;
pub use users::SqlUserStore;

pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    info!("Connected to {}", config.url);
    Ok(pool)
}

/// Single-connection in-memory database; every connection to
/// `sqlite::memory:` would otherwise see its own empty database.
pub async fn connect_memory() -> Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))
}
