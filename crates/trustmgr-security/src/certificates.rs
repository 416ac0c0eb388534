// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// X.509 ECC certificates issued to claimed applications.
//
// A certificate is built unsigned by `CertificateFactory`, then signed by the
// issuing authority with `X509Certificate::sign`, which produces the DER
// encoding through `rcgen`. Until that step the DER accessor fails with
// `NotYetEncoded`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType, IsCa, KeyPair,
    PublicKeyData, SignatureAlgorithm,
};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, instrument};
use trustmgr_core::config::{DEFAULT_DRIFT_SECONDS, SecurityConfig};
use trustmgr_core::error::{Result, TrustError};
use trustmgr_core::types::{Application, GroupInfo, Guid, IdentityInfo, PublicKey};

use crate::clock::Clock;
use crate::keys::{SigningKey, verify_signature};

const OID_DELEGATE: &[u64] = &[1, 3, 6, 1, 4, 1, 44924, 1, 1];
const OID_DIGEST: &[u64] = &[1, 3, 6, 1, 4, 1, 44924, 1, 2];

// ---------------------------------------------------------------------------
// Common fields
// ---------------------------------------------------------------------------

/// Certificate serial number, kept as big-endian hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Serial drawn from a monotonically increasing counter.
    pub fn from_counter(value: u64) -> Self {
        Self(hex::encode(value.to_be_bytes()))
    }

    /// 128-bit random serial from the OS CSPRNG.
    pub fn random() -> Result<Self> {
        let mut bytes = [0u8; 16];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| TrustError::Crypto("random serial generation failed".into()))?;
        Ok(Self(hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.0)
            .map_err(|e| TrustError::InvalidArgument(format!("serial number {}: {e}", self.0)))
    }
}

impl std::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validity window `[valid_from, valid_to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

impl Validity {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at <= self.valid_to
    }
}

/// Fields shared by every certificate variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBody {
    pub serial: SerialNumber,
    pub issuer: PublicKey,
    pub issuer_name: String,
    pub subject: PublicKey,
    pub validity: Validity,
    pub is_ca: bool,
    /// Digest of an associated payload. Identity and membership
    /// certificates carry none.
    pub digest: Option<Vec<u8>>,
    #[serde(default)]
    signature: Option<Vec<u8>>,
    #[serde(default)]
    der: Option<Vec<u8>>,
}

impl CertificateBody {
    pub fn is_signed(&self) -> bool {
        self.der.is_some()
    }
}

// ---------------------------------------------------------------------------
// Encoding and signing
// ---------------------------------------------------------------------------

/// Behaviour shared by all certificate variants.
pub trait X509Certificate {
    fn body(&self) -> &CertificateBody;

    fn body_mut(&mut self) -> &mut CertificateBody;

    /// Distinguished name of the subject.
    fn subject_name(&self) -> DistinguishedName;

    /// Variant specific extensions.
    fn custom_extensions(&self) -> Vec<CustomExtension> {
        Vec::new()
    }

    /// The signed DER encoding.
    fn encode_der(&self) -> Result<&[u8]> {
        self.body().der.as_deref().ok_or(TrustError::NotYetEncoded)
    }

    /// Sign with the issuing authority's key and store the DER encoding.
    fn sign(&mut self, issuer: &SigningKey) -> Result<()> {
        if issuer.public_key() != &self.body().issuer {
            return Err(TrustError::InvalidArgument(format!(
                "signing key {} does not match certificate issuer {}",
                issuer.public_key(),
                self.body().issuer
            )));
        }

        let params = certificate_params(self.body(), self.subject_name(), self.custom_extensions())?;
        let issuer_key = KeyPair::try_from(issuer.pkcs8_der()).map_err(rcgen_error)?;
        let authority = authority_params(&self.body().issuer_name)
            .self_signed(&issuer_key)
            .map_err(rcgen_error)?;
        let signed = params
            .signed_by(&SubjectKey(&self.body().subject), &authority, &issuer_key)
            .map_err(rcgen_error)?;

        let encoded = signed.der().to_vec();
        let signature = split_signed(&encoded)?.1.to_vec();

        let body = self.body_mut();
        debug!(serial = %body.serial, subject = %body.subject, len = encoded.len(), "certificate signed");
        body.signature = Some(signature);
        body.der = Some(encoded);
        Ok(())
    }

    /// Check the signature over the encoded TBS against the issuer's key.
    fn verify(&self) -> Result<()> {
        let body = self.body();
        let encoded = body.der.as_deref().ok_or(TrustError::NotYetEncoded)?;
        let (tbs, signature) = split_signed(encoded)?;
        if body.signature.as_deref() != Some(signature) {
            return Err(TrustError::Crypto("stored signature does not match encoding".into()));
        }
        verify_signature(&body.issuer, tbs, signature)
    }
}

/// The subject key in the form `rcgen` embeds into the SubjectPublicKeyInfo.
struct SubjectKey<'a>(&'a PublicKey);

impl PublicKeyData for SubjectKey<'_> {
    fn der_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        &rcgen::PKCS_ECDSA_P256_SHA256
    }
}

fn rcgen_error(e: rcgen::Error) -> TrustError {
    TrustError::Crypto(format!("certificate encoding: {e}"))
}

fn offset_time(at: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| TrustError::InvalidArgument(format!("certificate time {at}: {e}")))
}

/// Parameters `rcgen` rebuilds the issuer name and key identifier from.
fn authority_params(issuer_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, issuer_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

fn certificate_params(
    body: &CertificateBody,
    subject_name: DistinguishedName,
    mut extensions: Vec<CustomExtension>,
) -> Result<CertificateParams> {
    if let Some(digest) = &body.digest {
        extensions.push(CustomExtension::from_oid_content(OID_DIGEST, octet_string(digest)?));
    }

    let mut params = CertificateParams::default();
    params.serial_number = Some(rcgen::SerialNumber::from_slice(&body.serial.to_bytes()?));
    params.distinguished_name = subject_name;
    params.not_before = offset_time(body.validity.valid_from)?;
    params.not_after = offset_time(body.validity.valid_to)?;
    params.is_ca = if body.is_ca {
        IsCa::Ca(BasicConstraints::Unconstrained)
    } else {
        IsCa::ExplicitNoCa
    };
    params.custom_extensions = extensions;
    Ok(params)
}

/// DER `OCTET STRING` holding `bytes`, as carried in the digest extension.
fn octet_string(bytes: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| TrustError::InvalidArgument(format!("digest of {} bytes", bytes.len())))?;
    let mut out = vec![0x04];
    match len {
        0..=0x7f => out.push(len as u8),
        0x80..=0xff => out.extend([0x81, len as u8]),
        _ => out.extend([0x82, (len >> 8) as u8, len as u8]),
    }
    out.extend_from_slice(bytes);
    Ok(out)
}

fn malformed() -> TrustError {
    TrustError::Crypto("malformed certificate encoding".into())
}

/// Tag, content and remainder of the DER element at the start of `input`.
fn read_element(input: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input.split_first().ok_or_else(malformed)?;
    let (&first, rest) = rest.split_first().ok_or_else(malformed)?;
    let (len, rest) = if first < 0x80 {
        (usize::from(first), rest)
    } else {
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 || rest.len() < count {
            return Err(malformed());
        }
        let len = rest[..count]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        (len, &rest[count..])
    };
    if rest.len() < len {
        return Err(malformed());
    }
    Ok((tag, &rest[..len], &rest[len..]))
}

/// Split a signed certificate into its encoded TBS and raw signature.
fn split_signed(encoded: &[u8]) -> Result<(&[u8], &[u8])> {
    let (tag, outer, _) = read_element(encoded)?;
    if tag != 0x30 {
        return Err(malformed());
    }
    let (_, _, after_tbs) = read_element(outer)?;
    let tbs = &outer[..outer.len() - after_tbs.len()];
    let (_, _, after_algorithm) = read_element(after_tbs)?;
    let (tag, bits, _) = read_element(after_algorithm)?;
    match bits.split_first() {
        Some((0, signature)) if tag == 0x03 => Ok((tbs, signature)),
        _ => Err(malformed()),
    }
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

fn common_name(value: String) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, value);
    name
}

/// Binds an application's key to the identity it impersonates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCertificate {
    #[serde(flatten)]
    pub body: CertificateBody,
    /// Guid of the identity.
    pub alias: Guid,
    /// Display name of the identity.
    pub organizational_unit: String,
}

impl X509Certificate for IdentityCertificate {
    fn body(&self) -> &CertificateBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut CertificateBody {
        &mut self.body
    }

    fn subject_name(&self) -> DistinguishedName {
        let mut name = DistinguishedName::new();
        name.push(DnType::OrganizationalUnitName, self.organizational_unit.as_str());
        name.push(DnType::CommonName, self.alias.to_string());
        name
    }
}

/// Proves that an application belongs to a security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipCertificate {
    #[serde(flatten)]
    pub body: CertificateBody,
    pub guild: Guid,
    /// Whether the member may issue memberships itself.
    pub delegate: bool,
}

impl X509Certificate for MembershipCertificate {
    fn body(&self) -> &CertificateBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut CertificateBody {
        &mut self.body
    }

    fn subject_name(&self) -> DistinguishedName {
        common_name(self.guild.to_string())
    }

    fn custom_extensions(&self) -> Vec<CustomExtension> {
        // DER BOOLEAN
        let flag = if self.delegate { 0xff } else { 0x00 };
        vec![CustomExtension::from_oid_content(OID_DELEGATE, vec![0x01, 0x01, flag])]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEquivalenceCertificate {
    #[serde(flatten)]
    pub body: CertificateBody,
}

impl X509Certificate for UserEquivalenceCertificate {
    fn body(&self) -> &CertificateBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut CertificateBody {
        &mut self.body
    }

    fn subject_name(&self) -> DistinguishedName {
        common_name(self.body.subject.to_hex())
    }
}

/// Binds a policy digest to an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCertificate {
    #[serde(flatten)]
    pub body: CertificateBody,
}

impl X509Certificate for PolicyCertificate {
    fn body(&self) -> &CertificateBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut CertificateBody {
        &mut self.body
    }

    fn subject_name(&self) -> DistinguishedName {
        common_name(self.body.subject.to_hex())
    }
}

/// Any certificate variant, as persisted in the content-addressed blob table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Certificate {
    Identity(IdentityCertificate),
    Membership(MembershipCertificate),
    UserEquivalence(UserEquivalenceCertificate),
    Policy(PolicyCertificate),
}

impl Certificate {
    fn inner(&self) -> &dyn X509Certificate {
        match self {
            Certificate::Identity(c) => c,
            Certificate::Membership(c) => c,
            Certificate::UserEquivalence(c) => c,
            Certificate::Policy(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn X509Certificate {
        match self {
            Certificate::Identity(c) => c,
            Certificate::Membership(c) => c,
            Certificate::UserEquivalence(c) => c,
            Certificate::Policy(c) => c,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl X509Certificate for Certificate {
    fn body(&self) -> &CertificateBody {
        self.inner().body()
    }

    fn body_mut(&mut self) -> &mut CertificateBody {
        self.inner_mut().body_mut()
    }

    fn subject_name(&self) -> DistinguishedName {
        self.inner().subject_name()
    }

    fn custom_extensions(&self) -> Vec<CustomExtension> {
        self.inner().custom_extensions()
    }
}

impl From<IdentityCertificate> for Certificate {
    fn from(cert: IdentityCertificate) -> Self {
        Certificate::Identity(cert)
    }
}

impl From<MembershipCertificate> for Certificate {
    fn from(cert: MembershipCertificate) -> Self {
        Certificate::Membership(cert)
    }
}

impl From<UserEquivalenceCertificate> for Certificate {
    fn from(cert: UserEquivalenceCertificate) -> Self {
        Certificate::UserEquivalence(cert)
    }
}

impl From<PolicyCertificate> for Certificate {
    fn from(cert: PolicyCertificate) -> Self {
        Certificate::Policy(cert)
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds unsigned certificates on behalf of one issuing authority.
///
/// Time comes from the injected [`Clock`] and serial numbers are supplied by
/// the caller, so construction is deterministic under test.
#[derive(Clone)]
pub struct CertificateFactory {
    issuer: PublicKey,
    issuer_name: String,
    drift_seconds: u64,
    clock: Arc<dyn Clock>,
}

impl CertificateFactory {
    pub fn new(issuer: PublicKey, issuer_name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            issuer,
            issuer_name: issuer_name.into(),
            drift_seconds: DEFAULT_DRIFT_SECONDS,
            clock,
        }
    }

    pub fn from_config(issuer: PublicKey, config: &SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(issuer, config.issuer_name.clone(), clock).with_drift(config.drift_seconds)
    }

    pub fn with_drift(mut self, drift_seconds: u64) -> Self {
        self.drift_seconds = drift_seconds;
        self
    }

    pub fn issuer(&self) -> &PublicKey {
        &self.issuer
    }

    pub fn drift_seconds(&self) -> u64 {
        self.drift_seconds
    }

    /// Identity certificate for `app`, aliased to `identity`.
    #[instrument(skip(self, app, identity), fields(app = %app.public_key, identity = %identity.guid))]
    pub fn to_identity_certificate(
        &self,
        app: &Application,
        identity: &IdentityInfo,
        validity_period_seconds: u64,
        serial: SerialNumber,
    ) -> Result<IdentityCertificate> {
        let body = self.body(&app.public_key, validity_period_seconds, serial)?;
        Ok(IdentityCertificate {
            body,
            alias: identity.guid,
            organizational_unit: identity.name.clone(),
        })
    }

    /// Membership certificate for `app` in `group`.
    #[instrument(skip(self, app, group), fields(app = %app.public_key, group = %group.guid))]
    pub fn to_membership_certificate(
        &self,
        app: &Application,
        group: &GroupInfo,
        validity_period_seconds: u64,
        serial: SerialNumber,
    ) -> Result<MembershipCertificate> {
        let body = self.body(&app.public_key, validity_period_seconds, serial)?;
        Ok(MembershipCertificate {
            body,
            guild: group.guid,
            delegate: false,
        })
    }

    pub fn to_user_equivalence_certificate(
        &self,
        app: &Application,
        validity_period_seconds: u64,
        serial: SerialNumber,
    ) -> Result<UserEquivalenceCertificate> {
        let body = self.body(&app.public_key, validity_period_seconds, serial)?;
        Ok(UserEquivalenceCertificate { body })
    }

    /// Policy certificate carrying the digest of the policy it vouches for.
    pub fn to_policy_certificate(
        &self,
        app: &Application,
        policy_digest: &[u8],
        validity_period_seconds: u64,
        serial: SerialNumber,
    ) -> Result<PolicyCertificate> {
        let mut body = self.body(&app.public_key, validity_period_seconds, serial)?;
        body.digest = Some(policy_digest.to_vec());
        Ok(PolicyCertificate { body })
    }

    fn body(
        &self,
        subject: &PublicKey,
        validity_period_seconds: u64,
        serial: SerialNumber,
    ) -> Result<CertificateBody> {
        if validity_period_seconds == 0 {
            return Err(TrustError::InvalidArgument(
                "validity period must be greater than zero".into(),
            ));
        }

        let valid_from = self.clock.now();
        let valid_to = validity_period_seconds
            .checked_add(self.drift_seconds)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|span| valid_from.checked_add_signed(span))
            .ok_or_else(|| {
                TrustError::InvalidArgument(format!(
                    "validity period of {validity_period_seconds}s is out of range"
                ))
            })?;

        Ok(CertificateBody {
            serial,
            issuer: self.issuer.clone(),
            issuer_name: self.issuer_name.clone(),
            subject: subject.clone(),
            validity: Validity { valid_from, valid_to },
            is_ca: false,
            digest: None,
            signature: None,
            der: None,
        })
    }
}

impl std::fmt::Debug for CertificateFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateFactory")
            .field("issuer", &self.issuer)
            .field("issuer_name", &self.issuer_name)
            .field("drift_seconds", &self.drift_seconds)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedClock, SystemClock};
    use chrono::TimeZone;

    fn setup() -> (SigningKey, CertificateFactory, DateTime<Utc>) {
        let ca = SigningKey::generate().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let factory = CertificateFactory::new(ca.public_key().clone(), "test-ca", Arc::new(FixedClock(at)));
        (ca, factory, at)
    }

    fn app() -> Application {
        let key = SigningKey::generate().unwrap();
        Application::new(key.public_key().clone())
    }

    #[test]
    fn identity_certificate_fields_and_window() {
        let (ca, factory, at) = setup();
        let app = app();
        let identity = IdentityInfo::new(ca.public_key().clone(), "MyName");

        for period in [1u64, 60, 86_400, 10 * 365 * 86_400] {
            let cert = factory
                .to_identity_certificate(&app, &identity, period, SerialNumber::from_counter(1))
                .unwrap();
            let validity = cert.body.validity;
            assert_eq!(validity.valid_from, at);
            assert_eq!(
                validity.valid_to,
                validity.valid_from + Duration::seconds((period + DEFAULT_DRIFT_SECONDS) as i64)
            );
            assert!(validity.contains(at));
            assert_eq!(cert.body.subject, app.public_key);
            assert_eq!(cert.alias, identity.guid);
            assert_eq!(cert.organizational_unit, "MyName");
            assert!(!cert.body.is_ca);
            assert!(cert.body.digest.is_none());
        }
    }

    #[test]
    fn zero_period_is_rejected() {
        let (ca, factory, _) = setup();
        let app = app();
        let identity = IdentityInfo::new(ca.public_key().clone(), "id");
        let group = GroupInfo::new(ca.public_key().clone(), "group", "");

        assert!(matches!(
            factory.to_identity_certificate(&app, &identity, 0, SerialNumber::from_counter(1)),
            Err(TrustError::InvalidArgument(_))
        ));
        assert!(matches!(
            factory.to_membership_certificate(&app, &group, 0, SerialNumber::from_counter(1)),
            Err(TrustError::InvalidArgument(_))
        ));
    }

    #[test]
    fn membership_certificate_fields() {
        let (ca, factory, _) = setup();
        let app = app();
        let group = GroupInfo::new(ca.public_key().clone(), "kitchen", "kitchen devices");

        let cert = factory
            .to_membership_certificate(&app, &group, 3600, SerialNumber::from_counter(7))
            .unwrap();
        assert_eq!(cert.guild, group.guid);
        assert_eq!(cert.body.subject, app.public_key);
        assert!(!cert.body.is_ca);
        assert!(!cert.delegate);
    }

    #[test]
    fn system_clock_window_contains_now() {
        let ca = SigningKey::generate().unwrap();
        let factory = CertificateFactory::new(ca.public_key().clone(), "ca", Arc::new(SystemClock));
        let identity = IdentityInfo::new(ca.public_key().clone(), "id");
        let cert = factory
            .to_identity_certificate(&app(), &identity, 60, SerialNumber::random().unwrap())
            .unwrap();
        assert!(cert.body.validity.contains(Utc::now()));
    }

    #[test]
    fn der_is_unavailable_before_signing() {
        let (ca, factory, _) = setup();
        let identity = IdentityInfo::new(ca.public_key().clone(), "id");
        let cert = factory
            .to_identity_certificate(&app(), &identity, 60, SerialNumber::from_counter(1))
            .unwrap();
        assert!(matches!(cert.encode_der(), Err(TrustError::NotYetEncoded)));
        assert!(matches!(cert.verify(), Err(TrustError::NotYetEncoded)));
    }

    #[test]
    fn sign_produces_verifiable_der() {
        let (ca, factory, _) = setup();
        let identity = IdentityInfo::new(ca.public_key().clone(), "id");
        let mut cert = factory
            .to_identity_certificate(&app(), &identity, 60, SerialNumber::from_counter(1))
            .unwrap();

        cert.sign(&ca).unwrap();
        let encoded = cert.encode_der().unwrap().to_vec();
        assert_eq!(encoded[0], 0x30);
        cert.verify().unwrap();

        // The subject key is embedded in the TBS; flipping a bit of it
        // invalidates the signature.
        let at = encoded
            .windows(cert.body.subject.as_bytes().len())
            .position(|w| w == cert.body.subject.as_bytes())
            .unwrap();
        let mut tampered = encoded;
        tampered[at + 10] ^= 0x01;
        cert.body.der = Some(tampered);
        assert!(matches!(cert.verify(), Err(TrustError::Crypto(_))));
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn subject_name_and_extensions_are_encoded() {
        let (ca, factory, _) = setup();
        let identity = IdentityInfo::new(ca.public_key().clone(), "Kitchen Owner");
        let mut cert = factory
            .to_identity_certificate(&app(), &identity, 60, SerialNumber::from_counter(9))
            .unwrap();
        cert.sign(&ca).unwrap();
        let encoded = cert.encode_der().unwrap();
        assert!(contains(encoded, b"Kitchen Owner"));
        assert!(contains(encoded, identity.guid.to_string().as_bytes()));
        assert!(contains(encoded, b"test-ca"));

        let group = GroupInfo::new(ca.public_key().clone(), "g", "");
        let mut membership = factory
            .to_membership_certificate(&app(), &group, 60, SerialNumber::from_counter(10))
            .unwrap();
        membership.delegate = true;
        membership.sign(&ca).unwrap();
        let encoded = membership.encode_der().unwrap();
        assert!(contains(encoded, group.guid.to_string().as_bytes()));
        // Delegate extension value: BOOLEAN TRUE.
        assert!(contains(encoded, &[0x04, 0x03, 0x01, 0x01, 0xff]));

        let mut policy = factory
            .to_policy_certificate(&app(), &[0x5a; 32], 60, SerialNumber::from_counter(11))
            .unwrap();
        policy.sign(&ca).unwrap();
        assert!(contains(policy.encode_der().unwrap(), &[0x5a; 32]));
    }

    #[test]
    fn truncated_encoding_is_rejected() {
        let (ca, factory, _) = setup();
        let identity = IdentityInfo::new(ca.public_key().clone(), "id");
        let mut cert = factory
            .to_identity_certificate(&app(), &identity, 60, SerialNumber::from_counter(1))
            .unwrap();
        cert.sign(&ca).unwrap();
        let encoded = cert.encode_der().unwrap().to_vec();
        cert.body.der = Some(encoded[..encoded.len() / 2].to_vec());
        assert!(matches!(cert.verify(), Err(TrustError::Crypto(_))));
    }

    #[test]
    fn sign_with_foreign_key_is_rejected() {
        let (_, factory, _) = setup();
        let stranger = SigningKey::generate().unwrap();
        let group = GroupInfo::new(stranger.public_key().clone(), "g", "");
        let mut cert = factory
            .to_membership_certificate(&app(), &group, 60, SerialNumber::from_counter(1))
            .unwrap();
        assert!(matches!(cert.sign(&stranger), Err(TrustError::InvalidArgument(_))));
        assert!(!cert.body.is_signed());
    }

    #[test]
    fn certificate_enum_persists_signed_state() {
        let (ca, factory, _) = setup();
        let group = GroupInfo::new(ca.public_key().clone(), "g", "");
        let mut cert: Certificate = factory
            .to_membership_certificate(&app(), &group, 60, SerialNumber::from_counter(3))
            .unwrap()
            .into();
        cert.sign(&ca).unwrap();

        let restored = Certificate::from_bytes(&cert.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, cert);
        restored.verify().unwrap();
        assert_eq!(restored.encode_der().unwrap(), cert.encode_der().unwrap());
    }

    #[test]
    fn policy_certificate_carries_digest() {
        let (ca, factory, _) = setup();
        let mut cert = factory
            .to_policy_certificate(&app(), &[0xaa; 32], 60, SerialNumber::from_counter(4))
            .unwrap();
        assert_eq!(cert.body.digest.as_deref(), Some(&[0xaa; 32][..]));
        cert.sign(&ca).unwrap();
        cert.verify().unwrap();
    }

    #[test]
    fn configured_drift_is_applied() {
        let (ca, factory, at) = setup();
        let factory = factory.with_drift(0);
        let identity = IdentityInfo::new(ca.public_key().clone(), "id");
        let cert = factory
            .to_identity_certificate(&app(), &identity, 10, SerialNumber::from_counter(1))
            .unwrap();
        assert_eq!(cert.body.validity.valid_to, at + Duration::seconds(10));
    }
}
