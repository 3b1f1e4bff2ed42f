//! hash and verify commands

use super::CommandContext;
use anyhow::Result;
use serde::Serialize;

#[derive(Serialize)]
struct HashResult {
    encoded: String,
    iterations: u32,
}

#[derive(Serialize)]
struct VerifyResult {
    valid: bool,
}

pub fn hash(ctx: &CommandContext, password: &str, salt: Option<&str>) -> Result<()> {
    let hasher = ctx.hasher()?;
    let encoded = hasher.encrypt(password, salt)?;

    if ctx.is_json() {
        let result = HashResult {
            encoded,
            iterations: hasher.iterations(),
        };
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", encoded);
    }
    Ok(())
}

/// Exits non-zero when the password does not match.
pub fn verify(ctx: &CommandContext, password: &str, encoded: &str) -> Result<()> {
    let valid = ctx.hasher()?.verify(password, encoded);

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&VerifyResult { valid })?);
    } else {
        println!("{}", if valid { "valid" } else { "invalid" });
    }

    if !valid {
        anyhow::bail!("password does not match");
    }
    Ok(())
}
