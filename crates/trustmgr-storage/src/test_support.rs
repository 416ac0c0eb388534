// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared fixtures for the trust store tests.

use std::sync::Arc;

use trustmgr_core::types::{Application, GroupInfo, IdentityInfo, PublicKey};
use trustmgr_security::{
    CertificateFactory, Manifest, MembershipCertificate, SigningKey, SystemClock, X509Certificate,
};

use crate::TrustStore;

/// A syntactically valid key for rows that never need a signature.
pub(crate) fn key(seed: u8) -> PublicKey {
    let mut bytes = vec![0x04];
    bytes.extend(std::iter::repeat_n(seed, 64));
    PublicKey::from_sec1(&bytes).unwrap()
}

pub(crate) struct Fixture {
    pub ca: SigningKey,
    pub factory: CertificateFactory,
}

impl Fixture {
    pub fn membership(&self, store: &TrustStore, app: &PublicKey, group: &GroupInfo) -> MembershipCertificate {
        let mut cert = self
            .factory
            .to_membership_certificate(
                &Application::new(app.clone()),
                group,
                3600,
                store.next_serial_number().unwrap(),
            )
            .unwrap();
        cert.sign(&self.ca).unwrap();
        cert
    }
}

pub(crate) fn fixture() -> Fixture {
    let ca = SigningKey::generate().unwrap();
    let factory = CertificateFactory::new(ca.public_key().clone(), "test-ca", Arc::new(SystemClock));
    Fixture { ca, factory }
}

/// Claim a fresh application with `identity` and an empty manifest.
pub(crate) fn claim(store: &TrustStore, fx: &Fixture, identity: &IdentityInfo) -> PublicKey {
    claim_with_manifest(store, fx, identity, &Manifest::default())
}

pub(crate) fn claim_with_manifest(
    store: &TrustStore,
    fx: &Fixture,
    identity: &IdentityInfo,
    manifest: &Manifest,
) -> PublicKey {
    let app = Application::new(SigningKey::generate().unwrap().public_key().clone());
    let mut cert = fx
        .factory
        .to_identity_certificate(&app, identity, 3600, store.next_serial_number().unwrap())
        .unwrap();
    cert.sign(&fx.ca).unwrap();
    store
        .finish_claim(&app.public_key, "peer", &cert, manifest)
        .unwrap();
    app.public_key
}
