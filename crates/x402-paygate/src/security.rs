//! Constant-time helpers for secrets compared on request paths.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compare two byte strings without leaking their content or length.
///
/// Both sides are hashed to SHA-256 first, then compared with
/// `subtle::ConstantTimeEq`. Used for the `/metrics` bearer token.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Check an `Authorization: Bearer <token>` header value against `expected`.
pub fn bearer_matches(header_value: Option<&str>, expected: &[u8]) -> bool {
    header_value
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| constant_time_eq(token.as_bytes(), expected))
        .unwrap_or(false)
}
