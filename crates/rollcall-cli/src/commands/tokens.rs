//! tokens command - token maintenance

use super::CommandContext;
use anyhow::{bail, Result};
use rollcall_auth::{LogOnThrottle, TokenStore};
use rollcall_core::config::BackendKind;
use rollcall_metadata::SqlTokenRepository;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct SweepResult {
    removed: usize,
}

/// Delete expired session and reset tokens from the database.
pub async fn sweep(ctx: &CommandContext) -> Result<()> {
    if ctx.config.directory.backend != BackendKind::Sqlite {
        bail!("tokens are only persisted by the sqlite backend");
    }

    let pool = rollcall_metadata::connect(&ctx.config.database).await?;
    let repository = Arc::new(SqlTokenRepository::new(pool).await?);
    let store = TokenStore::new(
        repository,
        ctx.hasher()?,
        Arc::new(LogOnThrottle::new(&ctx.config.throttle)),
        &ctx.config.tokens,
    );
    let removed = store.cleanup().await?;

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&SweepResult { removed })?);
    } else {
        println!("removed {} expired token(s)", removed);
    }
    Ok(())
}
