// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The bus collaborator: secure sessions to remote peers.
//
// The transport itself lives outside this crate. Implementations are
// responsible for bounding every round trip; a timeout surfaces as
// `TrustError::NetworkFailure`.

use async_trait::async_trait;
use trustmgr_core::error::{Result, TrustError};
use trustmgr_core::types::{Application, ClaimState, Guid};
use trustmgr_security::{IdentityCertificate, Manifest, MembershipCertificate, PermissionPolicy};

/// Opens point-to-point secure sessions to discovered peers.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open_secure_session(&self, app: &Application) -> Result<Box<dyn Session>>;
}

/// Remote security operations on one peer.
#[async_trait]
pub trait Session: Send {
    /// Bus-level identifier of the remote endpoint.
    fn peer_id(&self) -> String;

    async fn query_claim_state(&mut self) -> Result<ClaimState>;

    /// The manifest the application asks to be granted.
    async fn get_manifest_template(&mut self) -> Result<Manifest>;

    /// Install the identity certificate and the approved manifest. On a
    /// claimable peer this completes the claim.
    async fn install_identity(&mut self, cert: &IdentityCertificate, manifest: &Manifest) -> Result<()>;

    async fn install_membership(&mut self, cert: &MembershipCertificate) -> Result<()>;

    /// Groups of the membership certificates the peer currently holds.
    async fn installed_memberships(&mut self) -> Result<Vec<Guid>>;

    async fn remove_membership(&mut self, guild: &Guid) -> Result<()>;

    async fn install_policy(&mut self, policy: &PermissionPolicy) -> Result<()>;

    /// Return the peer to its unclaimed factory state.
    async fn reset(&mut self) -> Result<()>;
}

/// Provider used when no bus is attached. Every session attempt fails with
/// `NetworkFailure`, so persisted changes stay pending.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineSessions;

#[async_trait]
impl SessionProvider for OfflineSessions {
    async fn open_secure_session(&self, app: &Application) -> Result<Box<dyn Session>> {
        tracing::warn!(app = %app.public_key, "secure session requested without a bus");
        Err(TrustError::NetworkFailure("no bus attached".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustmgr_core::types::PublicKey;

    #[tokio::test]
    async fn offline_sessions_fail_transiently() {
        let mut bytes = vec![0x04];
        bytes.extend([1u8; 64]);
        let app = Application::new(PublicKey::from_sec1(&bytes).unwrap());

        let err = OfflineSessions.open_secure_session(&app).await.err().unwrap();
        assert!(matches!(err, TrustError::NetworkFailure(_)));
        assert!(err.is_retriable());
    }
}
