//! User directories for Rollcall
//!
//! [`Directory`] layers caching, query splitting and local pagination over
//! any [`rollcall_core::DirectoryBackend`]. [`MixedDirectory`] combines
//! several directories and [`AuthenticatingDirectory`] adds log-on,
//! session and password reset flows on top of one.

pub mod authenticating;
pub mod cache;
pub mod directory;
pub mod memory;
pub mod mixed;
pub mod outcome;
pub mod traits;

#[cfg(test)]
mod test_utils;

pub use authenticating::{AuthScheme, AuthenticatingDirectory};
pub use cache::{CacheLookup, DirectoryUserCache};
pub use directory::Directory;
pub use memory::{memory_user_id, MemoryUserStore};
pub use mixed::MixedDirectory;
pub use outcome::OperationOutcome;
pub use traits::{sort_and_window, window, FindQuery, UserDirectory};
