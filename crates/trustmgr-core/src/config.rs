// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Security manager configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TrustError};
use crate::types::PublicKey;

/// Seconds added to every certificate's expiry to tolerate clock skew
/// between issuer and verifier.
pub const DEFAULT_DRIFT_SECONDS: u64 = 3600;

/// Ten years, the default lifetime of issued certificates.
const DEFAULT_VALIDITY_SECONDS: u64 = 10 * 365 * 24 * 3600;

/// Persistent security manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Clock-skew allowance added to `valid_to` of every certificate.
    pub drift_seconds: u64,
    /// Validity period of issued identity certificates.
    pub identity_validity_seconds: u64,
    /// Validity period of issued membership certificates.
    pub membership_validity_seconds: u64,
    /// Common name written into the issuer field of certificates.
    pub issuer_name: String,
    /// Peers that are explicitly denied by generated policies.
    pub deny_list: Vec<PublicKey>,
    /// Trust store database; in-memory when absent.
    pub storage_path: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            drift_seconds: DEFAULT_DRIFT_SECONDS,
            identity_validity_seconds: DEFAULT_VALIDITY_SECONDS,
            membership_validity_seconds: DEFAULT_VALIDITY_SECONDS,
            issuer_name: "trustmgr".into(),
            deny_list: Vec::new(),
            storage_path: None,
        }
    }
}

impl SecurityConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| TrustError::Io(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        debug!(path = %path.display(), "security configuration loaded");
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| TrustError::Io(format!("write {}: {e}", path.display())))?;
        Ok(())
    }

    /// Reject settings that would make certificate issuance fail later.
    pub fn validate(&self) -> Result<()> {
        if self.identity_validity_seconds == 0 || self.membership_validity_seconds == 0 {
            return Err(TrustError::InvalidArgument(
                "certificate validity periods must be non-zero".into(),
            ));
        }
        if self.issuer_name.is_empty() {
            return Err(TrustError::InvalidArgument("issuer name must not be empty".into()));
        }
        Ok(())
    }
}
