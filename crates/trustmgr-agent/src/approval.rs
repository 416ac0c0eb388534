// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Manifest approval during claim.

use async_trait::async_trait;
use trustmgr_core::types::Application;
use trustmgr_security::Manifest;

/// Decides whether the permissions an application asks for are granted.
///
/// Typically backed by an administrator prompt.
#[async_trait]
pub trait ManifestApprover: Send + Sync {
    async fn approve(&self, app: &Application, manifest: &Manifest) -> bool;
}

/// Approves every manifest.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl ManifestApprover for AcceptAll {
    async fn approve(&self, _app: &Application, _manifest: &Manifest) -> bool {
        true
    }
}

/// Rejects every manifest.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

#[async_trait]
impl ManifestApprover for RejectAll {
    async fn approve(&self, app: &Application, _manifest: &Manifest) -> bool {
        tracing::debug!(app = %app.public_key, "manifest rejected");
        false
    }
}
