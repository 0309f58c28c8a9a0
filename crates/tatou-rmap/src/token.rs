// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Link token codec.
//
// Wire form: `hex(claims_json) "." hex(ecdsa_p256_signature)`. The signature
// covers the exact JSON bytes, so any edit to either half is detected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tatou_core::error::{Result, TatouError};
use tatou_core::types::{DocumentId, VersionIndex};
use tatou_security::{LinkSigningKey, LinkVerifyingKey};

/// Everything a link token asserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkClaims {
    pub document_id: DocumentId,
    pub version_index: VersionIndex,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// 16 random bytes, hex. The redemption ledger is keyed on this.
    pub nonce: String,
    /// Identity that completed the handshake.
    pub intended_for: String,
}

impl LinkClaims {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Serialize and sign `claims`.
pub fn encode(claims: &LinkClaims, signer: &LinkSigningKey) -> Result<String> {
    let json = serde_json::to_vec(claims)?;
    let signature = signer.sign(&json)?;
    Ok(format!("{}.{}", hex::encode(&json), hex::encode(signature)))
}

/// Verify and parse a token. Every failure is `InvalidToken`.
pub fn decode(token: &str, verifier: &LinkVerifyingKey) -> Result<LinkClaims> {
    let (claims_hex, signature_hex) = token.split_once('.').ok_or(TatouError::InvalidToken)?;
    let json = hex::decode(claims_hex).map_err(|_| TatouError::InvalidToken)?;
    let signature = hex::decode(signature_hex).map_err(|_| TatouError::InvalidToken)?;
    if !verifier.verify(&json, &signature) {
        return Err(TatouError::InvalidToken);
    }
    serde_json::from_slice(&json).map_err(|_| TatouError::InvalidToken)
}
