//! Salted, iterated credential hashing
//!
//! Encoded layout: `$<version>$<16-char salt><hex digest>`. The first round
//! hashes `password || salt`; every further round hashes
//! `previous digest || salt`. The salt is stored in the clear so the
//! encoded string verifies on its own.

use once_cell::sync::Lazy;
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::hash::{constant_time_eq, sha256_concat};

/// Version marker of the current encoding
pub const CREDENTIAL_VERSION: &str = "0";

/// Salt length in characters
pub const SALT_LENGTH: usize = 16;

/// Longest accepted password, in characters
pub const MAX_PASSWORD_LENGTH: usize = 4096;

/// Encoded values shorter than this are rejected without hashing
pub const MIN_ENCODED_LENGTH: usize = 20;

pub const DEFAULT_ITERATIONS: u32 = 25_000;

const PREFIX: &str = "$0$";

const SALT_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789./";

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Password exceeds 4096 characters")]
    PasswordTooLong,

    #[error("Salt must be exactly 16 ASCII characters without '$'")]
    InvalidSalt,

    #[error("Iteration count must be at least 1")]
    InvalidIterations,
}

#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    iterations: u32,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl CredentialHasher {
    pub fn new(iterations: u32) -> Result<Self, CredentialError> {
        if iterations == 0 {
            return Err(CredentialError::InvalidIterations);
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Encode `password`, generating a salt when none is given.
    pub fn encrypt(&self, password: &str, salt: Option<&str>) -> Result<String, CredentialError> {
        if password.chars().count() > MAX_PASSWORD_LENGTH {
            return Err(CredentialError::PasswordTooLong);
        }
        let salt = match salt {
            Some(s) => {
                validate_salt(s)?;
                s.to_string()
            }
            None => generate_salt(),
        };
        let digest = self.derive(password, &salt);
        Ok(format!("{}{}{}", PREFIX, salt, digest))
    }

    /// Check `password` against an encoded credential.
    ///
    /// Over-long passwords, short encodings and unknown versions are
    /// rejected without hashing.
    pub fn verify(&self, password: &str, encoded: &str) -> bool {
        if password.chars().count() > MAX_PASSWORD_LENGTH {
            return false;
        }
        if encoded.len() < MIN_ENCODED_LENGTH || !encoded.starts_with(PREFIX) {
            return false;
        }
        let Some(salt) = encoded.get(PREFIX.len()..PREFIX.len() + SALT_LENGTH) else {
            return false;
        };
        if validate_salt(salt).is_err() {
            return false;
        }
        let expected = format!("{}{}{}", PREFIX, salt, self.derive(password, salt));
        constant_time_eq(&expected, encoded)
    }

    fn derive(&self, password: &str, salt: &str) -> String {
        let salt = salt.as_bytes();
        let mut digest = sha256_concat(&[password.as_bytes(), salt]);
        for _ in 1..self.iterations {
            digest = sha256_concat(&[digest.as_slice(), salt]);
        }
        hex::encode(digest)
    }
}

fn validate_salt(salt: &str) -> Result<(), CredentialError> {
    if salt.len() != SALT_LENGTH || !salt.bytes().all(|b| b.is_ascii_graphic() && b != b'$') {
        return Err(CredentialError::InvalidSalt);
    }
    Ok(())
}

/// Salt from a generator seeded with monotonic and wall-clock ticks.
///
/// Not cryptographically strong; the salt is stored in the clear anyway.
pub fn generate_salt() -> String {
    let mono = PROCESS_START.elapsed().as_nanos() as u64;
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let mut rng = StdRng::seed_from_u64(mono.rotate_left(32) ^ wall);
    (0..SALT_LENGTH)
        .map(|_| SALT_CHARSET[rng.random_range(0..SALT_CHARSET.len())] as char)
        .collect()
}

/// High-entropy alphanumeric identifier of 40 to 64 characters.
pub fn generate_token_identifier() -> String {
    let mut rng = rand::rng();
    let len = rng.random_range(40..=64);
    (&mut rng)
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> CredentialHasher {
        CredentialHasher::new(1_000).unwrap()
    }

    #[test]
    fn test_known_salt_round_trip() {
        let hasher = CredentialHasher::default();
        let encoded = hasher.encrypt("Secret123!", Some("abcd1234abcd1234")).unwrap();
        assert!(encoded.starts_with("$0$abcd1234abcd1234"));
        assert_eq!(encoded.len(), 3 + 16 + 64);
        assert!(hasher.verify("Secret123!", &encoded));
        assert!(!hasher.verify("wrong", &encoded));
    }

    #[test]
    fn test_generated_salt_round_trip() {
        let hasher = hasher();
        let encoded = hasher.encrypt("p@ss w0rd", None).unwrap();
        assert!(hasher.verify("p@ss w0rd", &encoded));
        assert!(!hasher.verify("p@ss w0rD", &encoded));
    }

    #[test]
    fn test_mutated_hash_segment_fails() {
        let hasher = hasher();
        let encoded = hasher.encrypt("hunter2", Some("0123456789abcdef")).unwrap();
        let mut bytes = encoded.clone().into_bytes();
        let last = bytes.len() - 1;
        bytes[last] = if bytes[last] == b'0' { b'1' } else { b'0' };
        let mutated = String::from_utf8(bytes).unwrap();
        assert!(!hasher.verify("hunter2", &mutated));
    }

    #[test]
    fn test_rejects_short_or_unknown_encodings() {
        let hasher = hasher();
        assert!(!hasher.verify("x", "$0$short"));
        assert!(!hasher.verify("x", ""));
        let encoded = hasher.encrypt("x", Some("0123456789abcdef")).unwrap();
        let other_version = encoded.replacen("$0$", "$1$", 1);
        assert!(!hasher.verify("x", &other_version));
    }

    #[test]
    fn test_password_length_bound() {
        let hasher = hasher();
        let max = "a".repeat(MAX_PASSWORD_LENGTH);
        let encoded = hasher.encrypt(&max, None).unwrap();
        assert!(hasher.verify(&max, &encoded));

        let too_long = "a".repeat(MAX_PASSWORD_LENGTH + 1);
        assert_eq!(
            hasher.encrypt(&too_long, None),
            Err(CredentialError::PasswordTooLong)
        );
        assert!(!hasher.verify(&too_long, &encoded));
    }

    #[test]
    fn test_invalid_salt() {
        let hasher = hasher();
        assert_eq!(hasher.encrypt("x", Some("short")), Err(CredentialError::InvalidSalt));
        assert_eq!(
            hasher.encrypt("x", Some("has$dollar012345")),
            Err(CredentialError::InvalidSalt)
        );
        assert!(CredentialHasher::new(0).is_err());
    }

    #[test]
    fn test_salt_and_token_shapes() {
        let salt = generate_salt();
        assert_eq!(salt.len(), SALT_LENGTH);
        assert!(validate_salt(&salt).is_ok());

        let token = generate_token_identifier();
        assert!((40..=64).contains(&token.len()));
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token_identifier());
    }
}
