//! Active Directory backend
//!
//! Translates filter expressions to LDAP search filters and implements the
//! uncached backend primitives over `ldap3`. Users are keyed by objectGUID.

mod client;
mod filter;
mod sort;
mod types;

pub use client::ActiveDirectoryBackend;
pub use filter::{decode_guid, encode_guid, FilterBuilder};
pub use sort::{sort_control, SERVER_SIDE_SORT_OID};
pub use types::*;
