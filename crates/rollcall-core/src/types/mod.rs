//! Core types for Rollcall

mod filter;
mod sort;
mod user;

pub use filter::*;
pub use sort::*;
pub use user::*;
