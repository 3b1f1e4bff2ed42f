//! CLI command implementations

pub mod credentials;
pub mod tokens;
pub mod users;

use anyhow::Result;
use rollcall_auth::{ActiveDirectoryBackend, LdapConfig};
use rollcall_core::config::{BackendKind, RollcallConfig};
use rollcall_crypto::CredentialHasher;
use rollcall_directory::{Directory, MemoryUserStore, MixedDirectory, UserDirectory};
use rollcall_metadata::SqlUserStore;
use tracing::debug;

use crate::OutputFormat;

/// Context passed to all commands
pub struct CommandContext {
    pub config: RollcallConfig,
    pub output_format: OutputFormat,
}

impl CommandContext {
    /// Check if output should be JSON
    pub fn is_json(&self) -> bool {
        matches!(self.output_format, OutputFormat::Json)
    }

    pub fn hasher(&self) -> Result<CredentialHasher> {
        Ok(CredentialHasher::new(self.config.hasher.iterations)?)
    }
}

/// Build the directory the configuration describes.
///
/// Configured static users are mixed in front of a database or LDAP
/// backend; new users always land in that backend.
pub async fn open_directory(ctx: &CommandContext) -> Result<Box<dyn UserDirectory>> {
    let config = &ctx.config;
    let hasher = ctx.hasher()?;

    let backend: Box<dyn UserDirectory> = match config.directory.backend {
        BackendKind::Memory => {
            let store = MemoryUserStore::new(&config.memory_users, hasher)?;
            return Ok(Box::new(Directory::with_config(store, &config.directory)));
        }
        BackendKind::Sqlite => {
            let pool = rollcall_metadata::connect(&config.database).await?;
            let store = SqlUserStore::new(pool, hasher).await?;
            Box::new(Directory::with_config(store, &config.directory))
        }
        BackendKind::Ldap => {
            let backend = ActiveDirectoryBackend::new(LdapConfig::from(&config.ldap));
            Box::new(Directory::with_config(backend, &config.directory))
        }
    };

    if config.memory_users.is_empty() {
        return Ok(backend);
    }

    debug!("Mixing {} configured users into the directory", config.memory_users.len());
    let memory = MemoryUserStore::new(&config.memory_users, hasher)?;
    let memory: Box<dyn UserDirectory> = Box::new(Directory::with_config(memory, &config.directory));
    Ok(Box::new(MixedDirectory::new(vec![backend, memory], 0)?))
}
