//! Request credential extraction and session cookie encoding
//!
//! The HTTP layer itself is out of scope here; callers adapt their request
//! and response types through [`AuthRequest`] and [`AuthResponse`].

use base64::prelude::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Read access to the parts of a request that carry credentials.
pub trait AuthRequest {
    fn header(&self, name: &str) -> Option<String>;
    fn cookie(&self, name: &str) -> Option<String>;
}

/// Write access to the cookie jar of a response.
pub trait AuthResponse {
    fn set_cookie(&mut self, name: &str, value: &str, expires_at: DateTime<Utc>);
    fn remove_cookie(&mut self, name: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub user_name: String,
    pub password: String,
}

/// Parse `Basic <base64(user:password)>`.
///
/// The scheme name is matched case-insensitively and the user name ends at
/// the first colon, so passwords may contain colons.
pub fn parse_basic_auth(header: &str) -> Option<BasicCredentials> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64_STANDARD.decode(encoded.trim().as_bytes()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user_name, password) = decoded.split_once(':')?;
    if user_name.is_empty() {
        return None;
    }
    Some(BasicCredentials {
        user_name: user_name.to_string(),
        password: password.to_string(),
    })
}

pub fn encode_basic_auth(user_name: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64_STANDARD.encode(format!("{}:{}", user_name, password))
    )
}

/// Cookie value carrying a user name and a token identifier.
pub fn encode_session_cookie(user_name: &str, identifier: &str) -> String {
    BASE64_STANDARD.encode(format!("{}:{}", user_name, identifier))
}

/// Split a session cookie back into user name and token identifier.
///
/// Identifiers are alphanumeric, so the last colon is the separator even
/// when the user name contains one.
pub fn decode_session_cookie(value: &str) -> Option<(String, String)> {
    let decoded = BASE64_STANDARD.decode(value.trim().as_bytes()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user_name, identifier) = decoded.rsplit_once(':')?;
    if user_name.is_empty() || identifier.is_empty() {
        return None;
    }
    Some((user_name.to_string(), identifier.to_string()))
}

/// Plain map-backed request, for callers without an HTTP stack.
#[derive(Debug, Clone, Default)]
pub struct SimpleRequest {
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl SimpleRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: &str, value: impl Into<String>) -> Self {
        self.cookies.insert(name.to_string(), value.into());
        self
    }
}

impl AuthRequest for SimpleRequest {
    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.get(name).cloned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimpleResponse {
    pub cookies: HashMap<String, (String, DateTime<Utc>)>,
    pub removed: Vec<String>,
}

impl SimpleResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|(value, _)| value.as_str())
    }
}

impl AuthResponse for SimpleResponse {
    fn set_cookie(&mut self, name: &str, value: &str, expires_at: DateTime<Utc>) {
        self.cookies
            .insert(name.to_string(), (value.to_string(), expires_at));
    }

    fn remove_cookie(&mut self, name: &str) {
        self.cookies.remove(name);
        self.removed.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_auth() {
        let creds = parse_basic_auth("Basic dXNlcjpwYXNz").unwrap();
        assert_eq!(creds.user_name, "user");
        assert_eq!(creds.password, "pass");

        let header = encode_basic_auth("alice", "a:b:c");
        let creds = parse_basic_auth(&header).unwrap();
        assert_eq!(creds.password, "a:b:c");

        assert!(parse_basic_auth("basic dXNlcjpwYXNz").is_some());
        assert!(parse_basic_auth("Bearer abc").is_none());
        assert!(parse_basic_auth("Basic !!!").is_none());
        assert!(parse_basic_auth(&encode_basic_auth("", "x")).is_none());
    }

    #[test]
    fn test_session_cookie() {
        let value = encode_session_cookie("domain:alice", "Tok3n");
        assert_eq!(
            decode_session_cookie(&value),
            Some(("domain:alice".to_string(), "Tok3n".to_string()))
        );
        assert!(decode_session_cookie("not base64!").is_none());
        assert!(decode_session_cookie(&BASE64_STANDARD.encode("nocolon")).is_none());
    }

    #[test]
    fn test_simple_request_header_lookup_ignores_case() {
        let req = SimpleRequest::new().with_header("Authorization", "Basic x");
        assert_eq!(req.header("authorization").as_deref(), Some("Basic x"));
        assert!(req.cookie("session").is_none());
    }
}
