// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// tatou-security: Cryptographic foundation for watermarking and RMAP.
//
// Content fingerprints, HMAC keys, the identity keyring, ECDSA link signing
// keys, passphrase-encrypted key storage and the tamper-evident audit log.

pub mod audit;
pub mod integrity;
pub mod keyring;
pub mod mac;
pub mod signing;
pub mod storage;

pub use audit::{AuditAction, AuditEntry, AuditLog, AuditRecord};
pub use integrity::{check_byte, fingerprint, hash_bytes, verify_fingerprint};
pub use keyring::{Keyring, is_valid_identity};
pub use mac::{SecretKey, random_bytes};
pub use signing::{LinkSigningKey, LinkVerifyingKey};
pub use storage::EncryptedStorage;
