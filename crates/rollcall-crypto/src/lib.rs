//! Cryptography utilities for Rollcall

pub mod credential;
pub mod hash;

pub use credential::*;
pub use hash::*;
