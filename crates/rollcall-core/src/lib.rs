//! Rollcall Core Library
//!
//! Core types, traits, and utilities shared by the Rollcall user-directory
//! crates.

pub mod backend;
pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use backend::{BackendQuery, DirectoryBackend};
pub use config::RollcallConfig;
pub use error::{Error, FilterError, Result};

/// Rollcall version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top-level filter links a single backend query may carry before it is split
pub const DEFAULT_MAX_CHAIN_LENGTH: usize = 46;

/// Largest start offset or size limit a backend accepts (32-bit index)
pub const MAX_BACKEND_INDEX: u64 = i32::MAX as u64;
