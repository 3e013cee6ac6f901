//! Salary-code generation.
//!
//! Codes are drawn uniformly from `A-Z0-9` using the operating system's
//! entropy source. There is no global uniqueness check; the code space for
//! nine characters is 36^9 (about 1.0e14).

use rand::rngs::OsRng;
use rand::TryRngCore;
use thiserror::Error;

/// Code alphabet: 26 uppercase letters then 10 digits.
pub const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated salary codes.
pub const CODE_LEN: usize = 9;

// Largest multiple of 36 that fits in a byte; bytes at or above it are
// discarded so every symbol is equally likely.
const ACCEPT_BELOW: u8 = 252;

/// The entropy source failed.
#[derive(Debug, Error)]
#[error("entropy source unavailable: {0}")]
pub struct CodeGenError(String);

/// Generates a code of `len` symbols from the OS entropy source.
pub fn generate_code(len: usize) -> Result<String, CodeGenError> {
    generate_code_with(&mut OsRng, len)
}

/// Generates a code of `len` symbols from `rng`.
pub fn generate_code_with<R>(rng: &mut R, len: usize) -> Result<String, CodeGenError>
where
    R: TryRngCore + ?Sized,
{
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 32];
    while out.len() < len {
        rng.try_fill_bytes(&mut buf)
            .map_err(|e| CodeGenError(e.to_string()))?;
        for &b in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
            if out.len() == len {
                break;
            }
            out.push(ALPHABET[(b % 36) as usize] as char);
        }
    }
    Ok(out)
}

/// True if `s` looks like a code this module could have produced.
pub fn is_well_formed(s: &str) -> bool {
    s.len() == CODE_LEN && s.bytes().all(|b| ALPHABET.contains(&b))
}
