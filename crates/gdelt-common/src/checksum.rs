//! MD5 digest helpers for verifying downloaded archives
//!
//! The GDELT manifest publishes an MD5 digest next to every archive URL.

use crate::error::{GdeltError, Result};

/// Compute the lowercase hex MD5 digest of `data`
pub fn compute_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Check `data` against an expected MD5 digest (case-insensitive)
pub fn verify_md5(data: &[u8], expected_md5: &str) -> bool {
    compute_md5(data).eq_ignore_ascii_case(expected_md5)
}

/// Like [`verify_md5`] but returns a `ChecksumMismatch` naming `subject`
pub fn ensure_md5(data: &[u8], expected_md5: &str, subject: &str) -> Result<()> {
    let actual = compute_md5(data);
    if actual.eq_ignore_ascii_case(expected_md5) {
        Ok(())
    } else {
        Err(GdeltError::ChecksumMismatch {
            subject: subject.to_string(),
            expected: expected_md5.to_lowercase(),
            actual,
        })
    }
}

/// Whether `s` looks like a hex-encoded MD5 digest
pub fn is_md5_hex(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
