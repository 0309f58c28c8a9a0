// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Identity keyring: the set of requesters allowed to run the RMAP handshake,
// each with a 256-bit pre-shared key.
//
// On disk the keyring is either an age-encrypted JSON document or a directory
// of `<identity>.key` files holding hex keys (one file per requester group).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tatou_core::error::{Result, TatouError};
use tracing::{debug, info, instrument, warn};

use crate::mac::SecretKey;
use crate::storage::EncryptedStorage;

/// Maximum length of an identity name.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Whether `name` is a well-formed identity: 1..=64 characters from
/// `[A-Za-z0-9_.-]`.
pub fn is_valid_identity(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_IDENTITY_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// Serialized form of the keyring.
#[derive(Debug, Serialize, Deserialize)]
struct KeyringFile {
    version: u32,
    /// Identity name → hex key.
    identities: BTreeMap<String, String>,
}

/// Known identities and their pre-shared keys.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: BTreeMap<String, SecretKey>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the key for `identity`. Returns the previous key.
    pub fn insert(&mut self, identity: &str, key: SecretKey) -> Result<Option<SecretKey>> {
        if !is_valid_identity(identity) {
            return Err(TatouError::Config(format!(
                "invalid identity name {identity:?}"
            )));
        }
        Ok(self.keys.insert(identity.to_owned(), key))
    }

    /// Generate, store and return a fresh key for `identity`.
    pub fn generate(&mut self, identity: &str) -> Result<SecretKey> {
        let key = SecretKey::generate()?;
        self.insert(identity, key.clone())?;
        info!(identity, "identity key generated");
        Ok(key)
    }

    pub fn get(&self, identity: &str) -> Option<&SecretKey> {
        self.keys.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.keys.contains_key(identity)
    }

    pub fn remove(&mut self, identity: &str) -> Option<SecretKey> {
        self.keys.remove(identity)
    }

    /// Identity names in sorted order.
    pub fn identities(&self) -> Vec<&str> {
        self.keys.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn to_json(&self) -> Result<Vec<u8>> {
        let file = KeyringFile {
            version: 1,
            identities: self
                .keys
                .iter()
                .map(|(name, key)| (name.clone(), key.to_hex()))
                .collect(),
        };
        Ok(serde_json::to_vec_pretty(&file)?)
    }

    fn from_json(data: &[u8]) -> Result<Self> {
        let file: KeyringFile = serde_json::from_slice(data)?;
        if file.version != 1 {
            return Err(TatouError::Config(format!(
                "unsupported keyring version {}",
                file.version
            )));
        }
        let mut keyring = Self::new();
        for (name, encoded) in &file.identities {
            keyring.insert(name, SecretKey::from_hex(encoded)?)?;
        }
        Ok(keyring)
    }

    /// Encrypt the keyring with `storage` and write it to `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), identities = self.len()))]
    pub fn save_encrypted(&self, path: impl AsRef<Path>, storage: &EncryptedStorage) -> Result<()> {
        storage.seal_to_file(path, &self.to_json()?)?;
        debug!("keyring saved");
        Ok(())
    }

    /// Load an encrypted keyring written by [`Keyring::save_encrypted`].
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_encrypted(path: impl AsRef<Path>, storage: &EncryptedStorage) -> Result<Self> {
        let keyring = Self::from_json(&storage.open_file(path)?)?;
        debug!(identities = keyring.len(), "keyring loaded");
        Ok(keyring)
    }

    /// Load every `<identity>.key` file in `dir`.
    ///
    /// Files with other extensions are ignored. A malformed key file fails
    /// the whole load rather than silently dropping an identity.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let mut keyring = Self::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("key") {
                continue;
            }
            let Some(identity) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!(path = %path.display(), "skipping key file with non-UTF-8 name");
                continue;
            };
            let encoded = std::fs::read_to_string(&path)?;
            keyring.insert(identity, SecretKey::from_hex(&encoded)?)?;
        }
        info!(identities = keyring.len(), "keyring loaded from directory");
        Ok(keyring)
    }
}
