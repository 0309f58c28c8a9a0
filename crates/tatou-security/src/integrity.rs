// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document integrity: SHA-256 fingerprints for content identity and tamper
// detection.

use sha2::{Digest, Sha256};
use tatou_core::error::TatouError;
use tatou_core::types::Fingerprint;

/// Compute the SHA-256 hash of `data` and return it as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Content fingerprint of a document version.
///
/// Two versions in one chain may never share a fingerprint, so this is also
/// the store's duplicate-content key.
pub fn fingerprint(data: &[u8]) -> Fingerprint {
    Fingerprint(hash_bytes(data))
}

/// First byte of SHA-256(`data`). Used as a cheap frame check where a full
/// digest would not fit.
pub fn check_byte(data: &[u8]) -> u8 {
    Sha256::digest(data)[0]
}

/// Verify that `data` still matches the recorded fingerprint.
pub fn verify_fingerprint(data: &[u8], expected: &Fingerprint) -> Result<(), TatouError> {
    let actual = hash_bytes(data);
    if actual == expected.0 {
        Ok(())
    } else {
        Err(TatouError::IntegrityMismatch {
            expected: expected.0.clone(),
            actual,
        })
    }
}
