// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Encrypted storage: passphrase-based `age` (scrypt) encryption for key
// material kept on disk: the identity keyring and the link signing key.

use std::io::{Read, Write};
use std::path::Path;

use age::secrecy::SecretString;
use tatou_core::error::{Result, TatouError};
use tracing::{debug, instrument};

/// Passphrase-based encrypted storage backed by the `age` crate.
///
/// The passphrase lives only as long as this value, inside a `SecretString`
/// that is zeroised on drop.
pub struct EncryptedStorage {
    passphrase: SecretString,
}

impl EncryptedStorage {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: SecretString::from(passphrase.into()),
        }
    }

    /// Read the passphrase from environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self> {
        let passphrase = std::env::var(var)
            .map_err(|_| TatouError::Config(format!("environment variable {var} is not set")))?;
        if passphrase.is_empty() {
            return Err(TatouError::Config(format!("environment variable {var} is empty")));
        }
        Ok(Self::new(passphrase))
    }

    /// Encrypt `plaintext` into a complete age file (header + payload).
    #[instrument(skip_all, fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let encryptor = age::Encryptor::with_user_passphrase(self.passphrase.clone());
        let mut ciphertext = Vec::new();

        let mut writer = encryptor
            .wrap_output(&mut ciphertext)
            .map_err(|e| TatouError::Encryption(e.to_string()))?;
        writer
            .write_all(plaintext)
            .map_err(|e| TatouError::Encryption(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| TatouError::Encryption(e.to_string()))?;

        debug!(ciphertext_len = ciphertext.len(), "encryption complete");
        Ok(ciphertext)
    }

    /// Decrypt a complete age file.
    #[instrument(skip_all, fields(ciphertext_len = ciphertext.len()))]
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let decryptor =
            age::Decryptor::new(ciphertext).map_err(|e| TatouError::Decryption(e.to_string()))?;
        let identity = age::scrypt::Identity::new(self.passphrase.clone());

        let mut reader = decryptor
            .decrypt(std::iter::once(&identity as &dyn age::Identity))
            .map_err(|e| TatouError::Decryption(e.to_string()))?;

        let mut plaintext = Vec::new();
        reader
            .read_to_end(&mut plaintext)
            .map_err(|e| TatouError::Decryption(e.to_string()))?;

        debug!(plaintext_len = plaintext.len(), "decryption complete");
        Ok(plaintext)
    }

    /// Encrypt `plaintext` and write it to `path`.
    ///
    /// Writes to a sibling temp file first and renames it into place, so a
    /// crash never leaves a half-written key file behind.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn seal_to_file(&self, path: impl AsRef<Path>, plaintext: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let ciphertext = self.encrypt(plaintext)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, ciphertext)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read and decrypt the file at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let ciphertext = std::fs::read(path.as_ref())?;
        self.decrypt(&ciphertext)
    }
}
