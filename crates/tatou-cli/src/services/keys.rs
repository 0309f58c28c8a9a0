// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Key material on disk. Everything secret is sealed with the keyring
// passphrase; nothing is ever written in the clear.
//
//   <data_dir>/keyring.age          identity pre-shared keys
//   <data_dir>/link-signing.age     ECDSA P-256 PKCS#8 for link tokens
//   <data_dir>/watermark-key.age    HMAC key behind every secret_ref
//   <data_dir>/identities/*.key     optional plaintext hex keys, merged in

use std::path::{Path, PathBuf};

use tatou_core::error::{Result, TatouError};
use tatou_security::{EncryptedStorage, Keyring, LinkSigningKey, SecretKey};
use tracing::{info, warn};

const KEYRING_FILE: &str = "keyring.age";
const SIGNING_KEY_FILE: &str = "link-signing.age";
const WATERMARK_KEY_FILE: &str = "watermark-key.age";
const IDENTITIES_DIR: &str = "identities";

pub struct KeyFiles {
    dir: PathBuf,
    storage: EncryptedStorage,
}

impl KeyFiles {
    pub fn new(dir: &Path, storage: EncryptedStorage) -> Self {
        Self {
            dir: dir.to_path_buf(),
            storage,
        }
    }

    /// The sealed keyring plus any plaintext `identities/*.key` files. A
    /// sealed entry wins over a plaintext one with the same name.
    pub fn keyring(&self) -> Result<Keyring> {
        let sealed_path = self.dir.join(KEYRING_FILE);
        let sealed = if sealed_path.exists() {
            Keyring::load_encrypted(&sealed_path, &self.storage)?
        } else {
            Keyring::new()
        };

        let plain_dir = self.dir.join(IDENTITIES_DIR);
        if !plain_dir.is_dir() {
            return Ok(sealed);
        }
        let mut merged = Keyring::load_dir(&plain_dir)?;
        if !merged.is_empty() {
            warn!(dir = %plain_dir.display(), "plaintext identity keys in use");
        }
        for identity in sealed.identities() {
            if let Some(key) = sealed.get(identity) {
                merged.insert(identity, key.clone())?;
            }
        }
        Ok(merged)
    }

    /// Create a key for a new identity and seal it into the keyring.
    pub fn add_identity(&self, identity: &str) -> Result<SecretKey> {
        let sealed_path = self.dir.join(KEYRING_FILE);
        let mut keyring = if sealed_path.exists() {
            Keyring::load_encrypted(&sealed_path, &self.storage)?
        } else {
            Keyring::new()
        };
        if keyring.contains(identity) {
            return Err(TatouError::Config(format!("identity {identity} already has a key")));
        }
        let key = keyring.generate(identity)?;
        keyring.save_encrypted(&sealed_path, &self.storage)?;
        Ok(key)
    }

    /// The link signing key, generated and sealed on first use.
    pub fn signing_key(&self) -> Result<LinkSigningKey> {
        let path = self.dir.join(SIGNING_KEY_FILE);
        if path.exists() {
            return LinkSigningKey::from_pkcs8(&self.storage.open_file(&path)?);
        }
        let key = LinkSigningKey::generate()?;
        self.storage.seal_to_file(&path, key.pkcs8_der())?;
        info!(path = %path.display(), "link signing key created");
        Ok(key)
    }

    /// The watermark key, generated and sealed on first use.
    pub fn watermark_key(&self) -> Result<SecretKey> {
        let path = self.dir.join(WATERMARK_KEY_FILE);
        if path.exists() {
            let encoded = String::from_utf8(self.storage.open_file(&path)?)
                .map_err(|_| TatouError::Config("watermark key file is not text".into()))?;
            return SecretKey::from_hex(encoded.trim());
        }
        let key = SecretKey::generate()?;
        self.storage.seal_to_file(&path, key.to_hex().as_bytes())?;
        info!(path = %path.display(), "watermark key created");
        Ok(key)
    }
}
