//! Configuration for Rollcall

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollcallConfig {
    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub ldap: LdapConfigSection,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub hasher: HasherConfig,

    #[serde(default)]
    pub throttle: ThrottleConfig,

    #[serde(default)]
    pub tokens: TokenConfig,

    /// Statically configured read-only users
    #[serde(default)]
    pub memory_users: Vec<MemoryUserConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RollcallConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(backend) = std::env::var("ROLLCALL_BACKEND") {
            if let Some(kind) = BackendKind::parse(&backend) {
                config.directory.backend = kind;
            }
        }
        if let Ok(len) = std::env::var("ROLLCALL_MAX_CHAIN_LENGTH") {
            if let Ok(l) = len.parse() {
                config.directory.max_chain_length = l;
            }
        }
        if let Ok(url) = std::env::var("ROLLCALL_DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(url) = std::env::var("ROLLCALL_LDAP_URL") {
            config.ldap.enabled = true;
            config.ldap.server_url = url;
        }
        if let Ok(dn) = std::env::var("ROLLCALL_LDAP_BIND_DN") {
            config.ldap.bind_dn = dn;
        }
        if let Ok(password) = std::env::var("ROLLCALL_LDAP_BIND_PASSWORD") {
            config.ldap.bind_password = password;
        }
        if let Ok(base) = std::env::var("ROLLCALL_LDAP_USER_BASE_DN") {
            config.ldap.user_base_dn = base;
        }
        if let Ok(iterations) = std::env::var("ROLLCALL_HASH_ITERATIONS") {
            if let Ok(i) = iterations.parse() {
                config.hasher.iterations = i;
            }
        }
        if let Ok(delay) = std::env::var("ROLLCALL_MIN_LOGON_DELAY_SECS") {
            if let Ok(d) = delay.parse() {
                config.throttle.min_delay_secs = d;
            }
        }
        if let Ok(level) = std::env::var("ROLLCALL_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.directory.validate()?;
        self.hasher.validate()?;
        self.throttle.validate()?;
        self.tokens.validate()?;
        match self.directory.backend {
            BackendKind::Ldap => self.ldap.validate(),
            BackendKind::Sqlite => self.database.validate(),
            BackendKind::Memory => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    Sqlite,
    Ldap,
}

impl BackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sqlite" | "sql" => Some(Self::Sqlite),
            "ldap" | "active_directory" | "ad" => Some(Self::Ldap),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Top-level filter links above which a query is split
    #[serde(default = "default_max_chain_length")]
    pub max_chain_length: usize,

    #[serde(default)]
    pub backend: BackendKind,
}

fn default_max_chain_length() -> usize {
    crate::DEFAULT_MAX_CHAIN_LENGTH
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_chain_length: default_max_chain_length(),
            backend: BackendKind::default(),
        }
    }
}

impl DirectoryConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_chain_length == 0 {
            return Err(crate::Error::ConfigError(
                "directory.max_chain_length must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// LDAP/Active Directory Configuration Section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfigSection {
    #[serde(default)]
    pub enabled: bool,

    /// LDAP server URL (ldap:// or ldaps://)
    #[serde(default = "default_ldap_url")]
    pub server_url: String,

    /// Use STARTTLS
    #[serde(default)]
    pub start_tls: bool,

    /// Bind DN for directory queries (service account)
    #[serde(default)]
    pub bind_dn: String,

    #[serde(default)]
    pub bind_password: String,

    /// Base DN for user searches
    #[serde(default)]
    pub user_base_dn: String,

    /// Base DN for group lookups
    #[serde(default)]
    pub group_base_dn: Option<String>,

    /// Connection timeout in seconds
    #[serde(default = "default_ldap_timeout")]
    pub timeout_seconds: u64,

    /// Object classes every user entry must carry
    #[serde(default = "default_object_classes")]
    pub object_classes: Vec<String>,

    /// Field name to LDAP attribute overrides, e.g. {"Phone": "mobile"}
    #[serde(default)]
    pub attribute_overrides: HashMap<String, String>,
}

fn default_ldap_url() -> String {
    "ldap://localhost:389".to_string()
}

fn default_ldap_timeout() -> u64 {
    10
}

fn default_object_classes() -> Vec<String> {
    vec!["user".to_string(), "person".to_string()]
}

impl Default for LdapConfigSection {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: default_ldap_url(),
            start_tls: false,
            bind_dn: String::new(),
            bind_password: String::new(),
            user_base_dn: String::new(),
            group_base_dn: None,
            timeout_seconds: default_ldap_timeout(),
            object_classes: default_object_classes(),
            attribute_overrides: HashMap::new(),
        }
    }
}

impl LdapConfigSection {
    pub fn validate(&self) -> crate::Result<()> {
        if self.server_url.is_empty() {
            return Err(crate::Error::ConfigError("ldap.server_url is required".into()));
        }
        if !self.server_url.starts_with("ldap://") && !self.server_url.starts_with("ldaps://") {
            return Err(crate::Error::ConfigError(
                "ldap.server_url must start with ldap:// or ldaps://".into(),
            ));
        }
        if self.bind_dn.is_empty() {
            return Err(crate::Error::ConfigError("ldap.bind_dn is required".into()));
        }
        if self.user_base_dn.is_empty() {
            return Err(crate::Error::ConfigError("ldap.user_base_dn is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://rollcall.db?mode=rwc".to_string(),
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.url.is_empty() {
            return Err(crate::Error::ConfigError("database.url is required".into()));
        }
        if self.max_connections == 0 {
            return Err(crate::Error::ConfigError(
                "database.max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HasherConfig {
    /// Rounds of digest feedback per credential
    pub iterations: u32,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self { iterations: 25_000 }
    }
}

impl HasherConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.iterations == 0 {
            return Err(crate::Error::ConfigError(
                "hasher.iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Brute-force throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Flat cooldown applied from the first failed attempt
    pub min_delay_secs: u64,
    /// Distinct failures tolerated before the penalty starts growing
    pub failure_threshold: u32,
    /// Added to the lockout for every failure beyond the threshold
    pub penalty_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 7,
            failure_threshold: 3,
            penalty_secs: 60,
        }
    }
}

impl ThrottleConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.min_delay_secs > 3600 {
            return Err(crate::Error::ConfigError(
                "throttle.min_delay_secs must not exceed one hour".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub cookie_name: String,
    pub cookie_lifetime_secs: u64,
    pub reset_lifetime_secs: u64,
    /// Minimum spacing between opportunistic expiry sweeps
    pub cleanup_interval_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            cookie_name: "rollcall_session".to_string(),
            cookie_lifetime_secs: 30 * 24 * 3600,
            reset_lifetime_secs: 24 * 3600,
            cleanup_interval_secs: 60,
        }
    }
}

impl TokenConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.cookie_name.is_empty() {
            return Err(crate::Error::ConfigError("tokens.cookie_name is required".into()));
        }
        if self.cookie_lifetime_secs == 0 || self.reset_lifetime_secs == 0 {
            return Err(crate::Error::ConfigError(
                "token lifetimes must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A statically configured user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUserConfig {
    pub user_name: String,
    /// Encoded credential as produced by the credential hasher
    pub password_hash: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
