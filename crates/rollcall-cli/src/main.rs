//! Rollcall - user directory tools
//!
//! Hash and verify credentials, inspect and edit the configured user
//! directory, and sweep expired tokens.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use commands::CommandContext;
use rollcall_core::config::{BackendKind, RollcallConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(author = "Rollcall Team")]
#[command(version = rollcall_core::VERSION)]
#[command(about = "User directory tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Directory backend (memory, sqlite, ldap)
    #[arg(long, env = "ROLLCALL_BACKEND", global = true)]
    backend: Option<String>,

    /// Database URL for the sqlite backend
    #[arg(long, env = "ROLLCALL_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, env = "ROLLCALL_LOG_LEVEL", global = true)]
    log_level: Option<String>,
}

fn log_level<'a>(requested: Option<&'a str>, config: &'a RollcallConfig) -> &'a str {
    requested.unwrap_or(&config.logging.level)
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a password as a stored credential
    Hash {
        password: String,

        /// Fixed 16-character salt instead of a generated one
        #[arg(long)]
        salt: Option<String>,
    },

    /// Check a password against an encoded credential
    Verify { password: String, encoded: String },

    /// Inspect and edit users
    #[command(subcommand)]
    Users(UserCommands),

    /// Token maintenance
    #[command(subcommand)]
    Tokens(TokenCommands),

    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// List users
    List {
        /// Only users whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Only members of this group
        #[arg(long)]
        group: Option<String>,

        /// Sort field, prefix with '-' for descending (repeatable)
        #[arg(long = "sort")]
        sort: Vec<String>,

        #[arg(long, default_value_t = 0)]
        start: u64,

        #[arg(long)]
        count: Option<u64>,
    },

    /// Create a user
    Add {
        user_name: String,

        #[arg(long)]
        password: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        display_name: Option<String>,

        /// Group membership (repeatable)
        #[arg(long = "group")]
        groups: Vec<String>,
    },

    /// Remove a user
    Remove { user_name: String },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Delete expired tokens now
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        RollcallConfig::from_file(config_path)?
    } else {
        RollcallConfig::from_env()
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(cli.log_level.as_deref(), &config)));
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_target(true).with_writer(std::io::stderr)).init();
    }

    // Override with CLI args
    if let Some(backend) = &cli.backend {
        config.directory.backend = BackendKind::parse(backend)
            .ok_or_else(|| anyhow::anyhow!("unknown backend '{}'", backend))?;
    }
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    config.validate()?;

    let ctx = CommandContext {
        config,
        output_format: cli.output,
    };

    match cli.command {
        Commands::Hash { password, salt } => {
            commands::credentials::hash(&ctx, &password, salt.as_deref())
        }
        Commands::Verify { password, encoded } => {
            commands::credentials::verify(&ctx, &password, &encoded)
        }
        Commands::Users(command) => commands::users::execute(&ctx, command).await,
        Commands::Tokens(TokenCommands::Sweep) => commands::tokens::sweep(&ctx).await,
        Commands::Version => {
            println!("rollcall {}", rollcall_core::VERSION);
            Ok(())
        }
    }
}
