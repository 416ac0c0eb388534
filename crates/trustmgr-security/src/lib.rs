// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// trustmgr-security — ECDSA keys, certificate issuance, permission policies
// and manifests.

pub mod certificates;
pub mod clock;
pub mod generator;
pub mod integrity;
pub mod keys;
pub mod manifest;
pub mod policy;

pub use certificates::{
    Certificate, CertificateBody, CertificateFactory, IdentityCertificate, MembershipCertificate,
    PolicyCertificate, SerialNumber, UserEquivalenceCertificate, Validity, X509Certificate,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use generator::PolicyGenerator;
pub use keys::{SigningKey, verify_signature};
pub use manifest::Manifest;
pub use policy::{Acl, ActionMask, Member, MemberType, Peer, PermissionPolicy, Rule};
