//! Content hashing for cache validators.
//!
//! The wire protocol pins SHA-1: `eTag` and `template-tag` carry the
//! hex digest of the document and template bytes. The digest is a
//! cache-busting comparison, not a security boundary.

use sha1::{Digest, Sha1};

/// Hex SHA-1 of `content`. Empty input hashes to the empty string so a
/// missing document and a missing validator compare equal.
pub fn sha1_hex(content: &[u8]) -> String {
    if content.is_empty() {
        return String::new();
    }
    let mut hasher = Sha1::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Verify `content` against an expected hex digest, ignoring case.
pub fn verify(content: &[u8], expected: &str) -> bool {
    !expected.is_empty() && sha1_hex(content).eq_ignore_ascii_case(expected)
}
