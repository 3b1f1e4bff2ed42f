//! Authentication for Rollcall
//!
//! Log-on throttling, session and reset tokens, request credential parsing
//! and the Active Directory backend.

pub mod credentials;
pub mod ldap;
pub mod throttle;
pub mod token;

pub use credentials::{
    decode_session_cookie, encode_basic_auth, encode_session_cookie, parse_basic_auth,
    AuthRequest, AuthResponse, BasicCredentials, SimpleRequest, SimpleResponse,
};
pub use ldap::{ActiveDirectoryBackend, AttributeMappings, LdapConfig};
pub use throttle::{LogOnInfo, LogOnThrottle};
pub use token::{
    IssuedToken, MemoryTokenRepository, StoredToken, TokenKind, TokenRepository, TokenStore,
};
