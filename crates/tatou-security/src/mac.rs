// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Symmetric key material and HMAC-SHA256 via `ring`.
//
// Used for RMAP pre-shared identity keys, the handshake proofs, and the
// watermark key that authenticates secrets embedded by the engine.

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use tatou_core::error::{Result, TatouError};

/// Length in bytes of every symmetric key and HMAC-SHA256 tag.
pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key.
///
/// `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Draw a fresh key from the OS CSPRNG.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| TatouError::Crypto("system random source unavailable".into()))?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex key.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let raw = hex::decode(encoded.trim())
            .map_err(|e| TatouError::Crypto(format!("key is not hex: {e}")))?;
        let bytes: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|_| TatouError::Crypto(format!("key must be {KEY_LEN} bytes")))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn hmac_key(&self) -> hmac::Key {
        hmac::Key::new(hmac::HMAC_SHA256, &self.0)
    }

    /// HMAC-SHA256 over the concatenation of `parts`.
    pub fn sign(&self, parts: &[&[u8]]) -> Vec<u8> {
        let mut ctx = hmac::Context::with_key(&self.hmac_key());
        for part in parts {
            ctx.update(part);
        }
        ctx.sign().as_ref().to_vec()
    }

    /// Constant-time check of `tag` against the HMAC of `parts`.
    pub fn verify(&self, parts: &[&[u8]], tag: &[u8]) -> bool {
        hmac::verify(&self.hmac_key(), &parts.concat(), tag).is_ok()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Fill a buffer of `len` bytes from the OS CSPRNG.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| TatouError::Crypto("system random source unavailable".into()))?;
    Ok(buf)
}
