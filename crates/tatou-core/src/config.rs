// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service configuration.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, TatouError};

/// File name of the persisted configuration inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Longest handshake deadline accepted from configuration.
pub const MAX_SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Longest link lifetime accepted from configuration.
pub const MAX_LINK_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Persistent service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TatouConfig {
    /// Where databases, the keyring and this file live. `None` means "resolve
    /// from the environment" (see [`resolve_data_dir`]).
    pub data_dir: Option<PathBuf>,
    /// Identity the server presents in RMAP commitments.
    pub server_id: String,
    /// Deadline for completing an RMAP handshake.
    pub session_ttl_secs: i64,
    /// Lifetime of an issued link token.
    pub link_ttl_secs: i64,
    /// Upload size limit in bytes.
    pub max_document_bytes: u64,
    /// Record embed/extract/redeem events in the audit log.
    pub audit_enabled: bool,
    /// Environment variable holding the keyring passphrase.
    pub keyring_passphrase_env: String,
}

impl Default for TatouConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            server_id: "tatou-server".into(),
            session_ttl_secs: 60,
            link_ttl_secs: 600,
            max_document_bytes: 20 * 1024 * 1024,
            audit_enabled: true,
            keyring_passphrase_env: "TATOU_KEYRING_PASSPHRASE".into(),
        }
    }
}

impl TatouConfig {
    /// Handshake deadline, or `Config` if the setting is out of range.
    pub fn session_ttl(&self) -> Result<Duration> {
        ttl("session_ttl_secs", self.session_ttl_secs, MAX_SESSION_TTL_SECS)
    }

    /// Link lifetime, or `Config` if the setting is out of range.
    pub fn link_ttl(&self) -> Result<Duration> {
        ttl("link_ttl_secs", self.link_ttl_secs, MAX_LINK_TTL_SECS)
    }

    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<()> {
        self.session_ttl()?;
        self.link_ttl()?;
        if self.server_id.is_empty() {
            return Err(TatouError::Config("server_id must not be empty".into()));
        }
        if self.max_document_bytes == 0 {
            return Err(TatouError::Config("max_document_bytes must be positive".into()));
        }
        Ok(())
    }

    /// Load `config.json` from `dir`, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load_or_default(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(_) => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file unreadable, using defaults");
                Self::default()
            }
        }
    }

    /// Write this configuration to `dir/config.json`.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE), json)?;
        Ok(())
    }
}

fn ttl(field: &str, secs: i64, max: i64) -> Result<Duration> {
    if !(1..=max).contains(&secs) {
        return Err(TatouError::Config(format!(
            "{field} must be between 1 and {max} seconds, got {secs}"
        )));
    }
    Duration::try_seconds(secs)
        .ok_or_else(|| TatouError::Config(format!("{field} out of range: {secs}")))
}

/// Resolve the data directory: `TATOU_DATA_DIR`, then `$XDG_DATA_HOME/tatou`,
/// then `~/.local/share/tatou`, then `/tmp/tatou`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TATOU_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("tatou");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share").join("tatou");
    }
    PathBuf::from("/tmp").join("tatou")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_timeouts() {
        let config = TatouConfig::default();
        assert_eq!(config.session_ttl().unwrap(), Duration::seconds(60));
        assert_eq!(config.link_ttl().unwrap(), Duration::seconds(600));
        assert_eq!(config.max_document_bytes, 20 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn out_of_range_ttls_rejected() {
        for secs in [0, -5, MAX_SESSION_TTL_SECS + 1, i64::MAX] {
            let config = TatouConfig {
                session_ttl_secs: secs,
                ..TatouConfig::default()
            };
            assert!(matches!(config.session_ttl(), Err(TatouError::Config(_))));
            assert!(matches!(config.validate(), Err(TatouError::Config(_))));
        }
        for secs in [0, -1, MAX_LINK_TTL_SECS + 1, 9_000_000_000_000] {
            let config = TatouConfig {
                link_ttl_secs: secs,
                ..TatouConfig::default()
            };
            assert!(matches!(config.link_ttl(), Err(TatouError::Config(_))));
            assert!(matches!(config.validate(), Err(TatouError::Config(_))));
        }

        let longest = TatouConfig {
            session_ttl_secs: MAX_SESSION_TTL_SECS,
            link_ttl_secs: MAX_LINK_TTL_SECS,
            ..TatouConfig::default()
        };
        assert!(longest.validate().is_ok());
    }

    #[test]
    fn empty_server_id_rejected() {
        let config = TatouConfig {
            server_id: String::new(),
            ..TatouConfig::default()
        };
        assert!(matches!(config.validate(), Err(TatouError::Config(_))));
    }

    #[test]
    fn persist_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = TatouConfig {
            server_id: "unit-test".into(),
            link_ttl_secs: 30,
            ..TatouConfig::default()
        };
        config.persist(dir.path()).expect("persist");
        assert_eq!(TatouConfig::load_or_default(dir.path()), config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"session_ttl_secs": 5}"#).unwrap();
        let config = TatouConfig::load_or_default(dir.path());
        assert_eq!(config.session_ttl_secs, 5);
        assert_eq!(config.link_ttl_secs, 600);
    }

    #[test]
    fn garbage_file_falls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "not json").unwrap();
        assert_eq!(TatouConfig::load_or_default(dir.path()), TatouConfig::default());
    }
}
