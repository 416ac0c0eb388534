// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for the trust management core.

use thiserror::Error;

/// Top-level error type for all trustmgr operations.
#[derive(Debug, Error)]
pub enum TrustError {
    // -- Caller errors --
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    // -- Certificates and policies --
    #[error("certificate has not been signed yet")]
    NotYetEncoded,

    #[error("policy generation produced no ACLs")]
    NoAclsGenerated,

    #[error("manifest rejected")]
    ManifestRejected,

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    // -- Remote peer --
    #[error("network failure: {0}")]
    NetworkFailure(String),

    // -- Storage / persistence --
    #[error("storage constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("persistence failure: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The remote round trip failed; the same call may succeed later.
    Transient,
    /// Configuration or programmer error; retrying changes nothing.
    Permanent,
}

impl TrustError {
    /// Classify this error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            TrustError::NetworkFailure(_) => ErrorClass::Transient,
            // SQLite reports a locked database as a plain I/O failure.
            TrustError::Io(detail) if detail.contains("locked") || detail.contains("busy") => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Permanent,
        }
    }

    /// Whether retrying the same operation can succeed.
    pub fn is_retriable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TrustError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failure_is_transient() {
        let err = TrustError::NetworkFailure("session closed".into());
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.is_retriable());
    }

    #[test]
    fn busy_database_is_transient() {
        let err = TrustError::Io("database is locked".into());
        assert!(err.is_retriable());
    }

    #[test]
    fn caller_errors_are_permanent() {
        for err in [
            TrustError::InvalidArgument("zero validity".into()),
            TrustError::NotFound("identity".into()),
            TrustError::InvalidState("already claimed".into()),
            TrustError::NotYetEncoded,
            TrustError::ManifestRejected,
            TrustError::Io("disk full".into()),
        ] {
            assert_eq!(err.class(), ErrorClass::Permanent, "{err}");
        }
    }
}
