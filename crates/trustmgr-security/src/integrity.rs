// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SHA-256 digests for policies, manifests and content-addressed certificates.

use sha2::{Digest, Sha256};
use trustmgr_core::error::{Result, TrustError};

/// Compute the SHA-256 digest of `data`.
pub fn digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the SHA-256 digest of `data` as a lowercase hex string.
///
/// Used as the content address of stored certificate blobs.
pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(digest(data))
}

/// Verify that `data` matches the expected SHA-256 hex digest.
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<()> {
    let actual = hash_hex(data);
    if actual == expected_hex {
        Ok(())
    } else {
        Err(TrustError::IntegrityMismatch {
            expected: expected_hex.to_owned(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn hash_empty_input() {
        assert_eq!(hash_hex(b""), EMPTY_SHA256);
    }

    #[test]
    fn verify_mismatched_hash() {
        match verify_hash(b"a", "0000") {
            Err(TrustError::IntegrityMismatch { expected, actual }) => {
                assert_eq!(expected, "0000");
                assert_eq!(actual, hash_hex(b"a"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(verify_hash(b"a", &hash_hex(b"a")).is_ok());
    }
}
