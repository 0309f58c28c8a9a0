// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Link-token signing keys: ECDSA P-256 with SHA-256 via `ring`.
//
// The protocol engine holds the private half and mints tokens. The validator
// only needs the public half, so the two components share nothing that could
// mint a token.

use ring::rand::SystemRandom;
use ring::signature::{
    ECDSA_P256_SHA256_ASN1, ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair,
    UnparsedPublicKey,
};
use tatou_core::error::{Result, TatouError};
use tracing::{debug, instrument};

/// Private signing key for link tokens.
pub struct LinkSigningKey {
    /// PKCS#8 v1 DER document (includes the public key).
    pkcs8_der: Vec<u8>,
    key_pair: EcdsaKeyPair,
    rng: SystemRandom,
}

impl LinkSigningKey {
    /// Generate a fresh key pair using the OS CSPRNG.
    #[instrument]
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|e| TatouError::Crypto(format!("key generation failed: {e}")))?;
        let key = Self::from_pkcs8(document.as_ref())?;
        debug!(pkcs8_len = key.pkcs8_der.len(), "link signing key generated");
        Ok(key)
    }

    /// Load a previously exported PKCS#8 DER key.
    pub fn from_pkcs8(pkcs8_der: &[u8]) -> Result<Self> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8_der, &rng)
            .map_err(|e| TatouError::Crypto(format!("key parsing failed: {e}")))?;
        Ok(Self {
            pkcs8_der: pkcs8_der.to_vec(),
            key_pair,
            rng,
        })
    }

    /// PKCS#8 DER export, for persisting the key.
    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }

    /// Public half, handed to the link validator.
    pub fn verifying_key(&self) -> LinkVerifyingKey {
        LinkVerifyingKey {
            public_key: self.key_pair.public_key().as_ref().to_vec(),
        }
    }

    /// ASN.1 DER ECDSA signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let sig = self
            .key_pair
            .sign(&self.rng, message)
            .map_err(|e| TatouError::Crypto(format!("signing failed: {e}")))?;
        Ok(sig.as_ref().to_vec())
    }
}

impl std::fmt::Debug for LinkSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSigningKey")
            .field("public_key", &hex::encode(self.key_pair.public_key().as_ref()))
            .finish_non_exhaustive()
    }
}

/// Public verification key for link tokens (uncompressed SEC1 point).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkVerifyingKey {
    public_key: Vec<u8>,
}

impl LinkVerifyingKey {
    pub fn from_bytes(public_key: Vec<u8>) -> Self {
        Self { public_key }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.public_key
    }

    /// Whether `signature` is a valid signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, &self.public_key)
            .verify(message, signature)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_key_pair() {
        let key = LinkSigningKey::generate().expect("key generation failed");
        assert!(key.pkcs8_der().len() > 100, "PKCS#8 DER looks too short");
        // Uncompressed P-256 public key: 0x04 || x || y.
        let public = key.verifying_key();
        assert_eq!(public.as_bytes().len(), 65);
        assert_eq!(public.as_bytes()[0], 0x04);
    }

    #[test]
    fn sign_and_verify() {
        let key = LinkSigningKey::generate().unwrap();
        let signature = key.sign(b"claims").unwrap();
        let public = key.verifying_key();
        assert!(public.verify(b"claims", &signature));
        assert!(!public.verify(b"claimz", &signature));
    }

    #[test]
    fn reloaded_key_keeps_identity() {
        let key = LinkSigningKey::generate().unwrap();
        let reloaded = LinkSigningKey::from_pkcs8(key.pkcs8_der()).unwrap();
        assert_eq!(key.verifying_key(), reloaded.verifying_key());
        let signature = reloaded.sign(b"m").unwrap();
        assert!(key.verifying_key().verify(b"m", &signature));
    }

    #[test]
    fn foreign_key_rejects() {
        let a = LinkSigningKey::generate().unwrap();
        let b = LinkSigningKey::generate().unwrap();
        let signature = a.sign(b"m").unwrap();
        assert!(!b.verifying_key().verify(b"m", &signature));
    }

    #[test]
    fn garbage_pkcs8_is_rejected() {
        assert!(matches!(
            LinkSigningKey::from_pkcs8(b"not a key"),
            Err(TatouError::Crypto(_))
        ));
    }
}
