// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ECDSA P-256 key material for the certificate authority and for tests.
//
// `ring` supplies the curve arithmetic; this module only holds the PKCS#8
// document and exposes signing and verification over the fixed curve.

use std::fmt;

use ring::rand::SystemRandom;
use ring::signature::{
    ECDSA_P256_SHA256_ASN1, ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair, UnparsedPublicKey,
};
use tracing::{debug, instrument};
use trustmgr_core::error::{Result, TrustError};
use trustmgr_core::types::PublicKey;

/// An ECDSA P-256 signing key.
///
/// The private key is stored as a PKCS#8 v1 DER document; the public key is
/// kept alongside as the uncompressed SEC1 point.
#[derive(Clone)]
pub struct SigningKey {
    pkcs8_der: Vec<u8>,
    public_key: PublicKey,
}

impl SigningKey {
    /// Generate a fresh key pair using the OS CSPRNG.
    #[instrument]
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|e| TrustError::Crypto(format!("key generation failed: {e}")))?;

        let key = Self::from_pkcs8(document.as_ref())?;
        debug!(public_key = %key.public_key, "ECDSA P-256 key pair generated");
        Ok(key)
    }

    /// Load a key from a PKCS#8 v1 DER document.
    pub fn from_pkcs8(pkcs8_der: &[u8]) -> Result<Self> {
        let key_pair = Self::load(pkcs8_der)?;
        let public_key = PublicKey::from_sec1(key_pair.public_key().as_ref())?;
        Ok(Self {
            pkcs8_der: pkcs8_der.to_vec(),
            public_key,
        })
    }

    /// The PKCS#8 v1 DER-encoded private key, for persisting the authority.
    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Sign `message` (ECDSA P-256 + SHA-256, ASN.1 DER signature).
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        let key_pair = Self::load(&self.pkcs8_der)?;
        let signature = key_pair
            .sign(&rng, message)
            .map_err(|e| TrustError::Crypto(format!("signing failed: {e}")))?;
        Ok(signature.as_ref().to_vec())
    }

    fn load(pkcs8_der: &[u8]) -> Result<EcdsaKeyPair> {
        let rng = SystemRandom::new();
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8_der, &rng)
            .map_err(|e| TrustError::Crypto(format!("key load failed: {e}")))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Verify an ASN.1 DER ECDSA P-256 signature over `message`.
pub fn verify_signature(public_key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<()> {
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key.as_bytes())
        .verify(message, signature)
        .map_err(|_| TrustError::Crypto("signature verification failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_key_pair() {
        let key = SigningKey::generate().expect("key generation failed");
        assert!(key.pkcs8_der().len() > 100, "PKCS#8 DER looks too short");
        assert_eq!(key.public_key().as_bytes().len(), 65);
    }

    #[test]
    fn sign_and_verify() {
        let key = SigningKey::generate().unwrap();
        let message = b"claim handshake";
        let signature = key.sign(message).unwrap();

        verify_signature(key.public_key(), message, &signature).expect("signature must verify");
        assert!(verify_signature(key.public_key(), b"tampered", &signature).is_err());
    }

    #[test]
    fn reload_from_pkcs8_keeps_public_key() {
        let key = SigningKey::generate().unwrap();
        let reloaded = SigningKey::from_pkcs8(key.pkcs8_der()).unwrap();
        assert_eq!(reloaded.public_key(), key.public_key());
    }

    #[test]
    fn debug_does_not_leak_private_key() {
        let key = SigningKey::generate().unwrap();
        let text = format!("{key:?}");
        assert!(!text.contains(&hex::encode(key.pkcs8_der())));
    }
}
