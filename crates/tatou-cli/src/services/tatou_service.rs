// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: opens every backend component from one data
// directory and exposes the operations the command line needs.
//
// All calls are synchronous. The binary runs them on tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tatou_core::config::{CONFIG_FILE, TatouConfig, resolve_data_dir};
use tatou_core::error::{Result, TatouError};
use tatou_core::types::{DocumentId, DocumentSummary, MethodDescriptor, VersionIndex, VersionMeta};
use tatou_rmap::{IssuedLink, LinkValidator, RmapClient, RmapEngine, SweepReport};
use tatou_security::{AuditAction, AuditEntry, AuditLog, AuditRecord, EncryptedStorage, Keyring, SecretKey};
use tatou_store::VersionStore;
use tatou_watermark::{EmbedRequest, MethodRegistry, WatermarkEngine};
use tracing::{error, info, instrument};

use super::keys::KeyFiles;

const STORE_DB: &str = "store.db";
const LEDGER_DB: &str = "ledger.db";
const AUDIT_DB: &str = "audit.db";

/// Result of one housekeeping pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PruneReport {
    pub sessions: SweepReport,
    pub tokens: usize,
}

pub struct TatouService {
    config: TatouConfig,
    data_dir: PathBuf,
    keys: KeyFiles,
    keyring: Keyring,
    store: Arc<VersionStore>,
    watermark: WatermarkEngine,
    rmap: RmapEngine,
    validator: LinkValidator,
    audit: Option<Arc<AuditLog>>,
}

impl TatouService {
    /// Resolve the data directory and passphrase from the environment and
    /// open everything.
    pub fn from_env() -> Result<Self> {
        let (dir, config, storage) = environment()?;
        Self::open(&dir, config, storage)
    }

    /// Open every component under `dir`.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn open(dir: &Path, config: TatouConfig, storage: EncryptedStorage) -> Result<Self> {
        config.validate()?;
        let keys = KeyFiles::new(dir, storage);
        let keyring = keys.keyring()?;
        let signer = keys.signing_key()?;
        let watermark_key = keys.watermark_key()?;

        let store = Arc::new(
            VersionStore::open(dir.join(STORE_DB))?
                .with_max_document_bytes(config.max_document_bytes),
        );
        let audit = if config.audit_enabled {
            Some(Arc::new(AuditLog::open(dir.join(AUDIT_DB))?))
        } else {
            None
        };

        let mut watermark = WatermarkEngine::new(
            MethodRegistry::with_builtin_methods(),
            store.clone(),
            watermark_key,
        );
        let mut validator = LinkValidator::open(dir.join(LEDGER_DB), signer.verifying_key(), store.clone())?;
        let mut rmap = RmapEngine::new(&config, keyring.clone(), store.clone(), signer)?;
        if let Some(audit) = &audit {
            watermark = watermark.with_audit(audit.clone());
            validator = validator.with_audit(audit.clone());
            rmap = rmap.with_audit(audit.clone());
        }

        info!(identities = keyring.len(), "services initialised");
        Ok(Self {
            config,
            data_dir: dir.to_path_buf(),
            keys,
            keyring,
            store,
            watermark,
            rmap,
            validator,
            audit,
        })
    }

    pub fn config(&self) -> &TatouConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // -- Documents -----------------------------------------------------------

    pub fn methods(&self) -> Vec<MethodDescriptor> {
        self.watermark.methods()
    }

    pub fn upload(&self, bytes: &[u8], name: &str, owner: &str) -> Result<DocumentId> {
        let result = self.store.create_named_document(name, owner, bytes);
        match &result {
            Ok(id) => {
                let fingerprint = self.store.version_meta(*id, VersionIndex::ORIGINAL).map(|m| m.fingerprint.0);
                let mut record = AuditRecord::success(AuditAction::Upload).document(*id).details(name);
                if let Ok(fp) = fingerprint.as_deref() {
                    record = record.fingerprint(fp);
                }
                self.audit(record);
            }
            Err(e) => {
                let details = format!("name={name} error={}", e.code());
                self.audit(AuditRecord::failure(AuditAction::Upload).details(&details));
            }
        }
        result
    }

    pub fn embed(&self, request: EmbedRequest<'_>) -> Result<VersionIndex> {
        self.watermark.embed_with(request)
    }

    pub fn extract(&self, document_id: DocumentId, index: VersionIndex, method: &str) -> Result<Vec<u8>> {
        self.watermark.extract(document_id, index, method)
    }

    pub fn versions(&self, document_id: DocumentId) -> Result<Vec<VersionMeta>> {
        self.store.list_versions(document_id)
    }

    /// Stored documents, optionally only those uploaded by `owner`.
    pub fn documents(&self, owner: Option<&str>) -> Result<Vec<DocumentSummary>> {
        match owner {
            Some(owner) => self.store.list_documents_for(owner),
            None => self.store.list_all_documents(),
        }
    }

    pub fn delete(&self, document_id: DocumentId) -> Result<()> {
        let result = self.store.delete_document(document_id);
        let record = match &result {
            Ok(()) => AuditRecord::success(AuditAction::Delete),
            Err(_) => AuditRecord::failure(AuditAction::Delete),
        };
        self.audit(record.document(document_id));
        result
    }

    // -- Links ---------------------------------------------------------------

    /// Seal a new pre-shared key for `identity`. The handshake engine picks
    /// it up the next time the service is opened.
    pub fn add_identity(&self, identity: &str) -> Result<SecretKey> {
        self.keys.add_identity(identity)
    }

    /// Run a full handshake as `identity` against this server, using the
    /// identity's key from the local keyring.
    #[instrument(skip(self), fields(document_id = %document_id, index = %index))]
    pub fn issue_link(&self, identity: &str, document_id: DocumentId, index: VersionIndex) -> Result<IssuedLink> {
        let key: SecretKey = self
            .keyring
            .get(identity)
            .cloned()
            .ok_or(TatouError::UnknownIdentity)?;
        let mut client = RmapClient::new(identity, key);

        let nonce = client.begin()?;
        let challenge = self.rmap.initiate(identity, &nonce)?;
        client.verify_challenge(self.rmap.server_id(), &challenge)?;
        let proof = client.proof(&challenge)?;
        self.rmap.get_link(challenge.session_id, &proof, document_id, index)
    }

    pub fn redeem(&self, token: &str) -> Result<(Vec<u8>, VersionMeta)> {
        self.validator.redeem(token)
    }

    /// Handshake plus redemption in one step.
    pub fn fetch(&self, identity: &str, document_id: DocumentId, index: VersionIndex) -> Result<(Vec<u8>, VersionMeta)> {
        let link = self.issue_link(identity, document_id, index)?;
        self.redeem(&link.token)
    }

    // -- Housekeeping --------------------------------------------------------

    /// Expire stale sessions and forget spent tokens that can no longer be
    /// redeemed anyway.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<PruneReport> {
        Ok(PruneReport {
            sessions: self.rmap.sweep_expired(now)?,
            tokens: self.validator.prune_used(now)?,
        })
    }

    /// Most recent audit entries, newest first. Empty when auditing is off.
    pub fn recent_audit_entries(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        match &self.audit {
            Some(audit) => audit.recent_entries(limit),
            None => Ok(Vec::new()),
        }
    }

    fn audit(&self, record: AuditRecord<'_>) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(record) {
                error!(error = %e, "failed to record audit entry");
            }
        }
    }
}

/// Data directory, configuration and keyring passphrase as the environment
/// describes them. A missing `config.json` is written out with defaults.
fn environment() -> Result<(PathBuf, TatouConfig, EncryptedStorage)> {
    let base = resolve_data_dir();
    std::fs::create_dir_all(&base)?;
    if !base.join(CONFIG_FILE).exists() {
        TatouConfig::default().persist(&base)?;
        info!(dir = %base.display(), "default configuration written");
    }
    let config = TatouConfig::load_or_default(&base);
    let dir = config.data_dir.clone().unwrap_or(base);
    std::fs::create_dir_all(&dir)?;
    let storage = EncryptedStorage::from_env(&config.keyring_passphrase_env)?;
    Ok((dir, config, storage))
}


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    const PASSPHRASE: &str = "service test passphrase";

    fn storage() -> EncryptedStorage {
        EncryptedStorage::new(PASSPHRASE)
    }

    fn open(dir: &Path) -> TatouService {
        TatouService::open(dir, TatouConfig::default(), storage()).unwrap()
    }

    fn embed(svc: &TatouService, doc: DocumentId, method: &str, secret: &[u8]) -> VersionIndex {
        svc.embed(EmbedRequest {
            document_id: doc,
            method,
            secret,
            parent: None,
            intended_for: Some("alice"),
        })
        .unwrap()
    }

    #[test]
    fn upload_embed_fetch_redeem() {
        let dir = tempfile::tempdir().unwrap();
        open(dir.path()).add_identity("alice").unwrap();
        let svc = open(dir.path());

        let doc = svc.upload(b"0123456789", "D", "owner").unwrap();
        let v1 = embed(&svc, doc, "lsb", b"S1");
        assert_eq!(v1, VersionIndex(1));
        assert_eq!(svc.extract(doc, v1, "lsb").unwrap(), b"S1");

        let link = svc.issue_link("alice", doc, v1).unwrap();
        let (bytes, meta) = svc.redeem(&link.token).unwrap();
        assert_eq!(meta.index, v1);
        assert_eq!(meta.intended_for.as_deref(), Some("alice"));
        assert_eq!(bytes, svc.store.get_version(doc, v1).unwrap().0);
        assert_ne!(bytes, b"0123456789");
        assert!(matches!(svc.redeem(&link.token), Err(TatouError::TokenAlreadyUsed)));
    }

    #[test]
    fn invalid_config_refused_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = TatouConfig {
            link_ttl_secs: 9_000_000_000_000,
            ..TatouConfig::default()
        };
        assert!(matches!(
            TatouService::open(dir.path(), config, storage()),
            Err(TatouError::Config(_))
        ));
    }

    #[test]
    fn unknown_requester() {
        let dir = tempfile::tempdir().unwrap();
        let svc = open(dir.path());
        let doc = svc.upload(b"content", "D", "owner").unwrap();
        assert!(matches!(
            svc.fetch("nobody", doc, VersionIndex::ORIGINAL),
            Err(TatouError::UnknownIdentity)
        ));
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        open(dir.path()).add_identity("alice").unwrap();

        let (doc, v1, token) = {
            let svc = open(dir.path());
            let doc = svc.upload(b"%PDF-1.4\n%%EOF\n", "D", "owner").unwrap();
            let v1 = embed(&svc, doc, "eof-hmac", b"recipient-7");
            let token = svc.issue_link("alice", doc, v1).unwrap().token;
            (doc, v1, token)
        };

        let svc = open(dir.path());
        // Same watermark key, so the HMAC-bound mark still verifies.
        assert_eq!(svc.extract(doc, v1, "eof-hmac").unwrap(), b"recipient-7");
        // Same signing key, so the earlier token is still good exactly once.
        assert!(svc.redeem(&token).is_ok());
        assert!(matches!(svc.redeem(&token), Err(TatouError::TokenAlreadyUsed)));
    }

    #[test]
    fn delete_and_audit_trail() {
        let dir = tempfile::tempdir().unwrap();
        let svc = open(dir.path());
        let doc = svc.upload(b"0123456789", "D", "owner").unwrap();
        embed(&svc, doc, "trailer-hex", b"S1");
        assert_eq!(svc.documents(Some("owner")).unwrap().len(), 1);
        assert!(svc.documents(Some("someone-else")).unwrap().is_empty());
        svc.delete(doc).unwrap();
        assert!(matches!(svc.versions(doc), Err(TatouError::DocumentNotFound(_))));
        assert!(svc.documents(None).unwrap().is_empty());
        assert!(svc.documents(Some("owner")).unwrap().is_empty());

        let actions: Vec<String> = svc
            .recent_audit_entries(10)
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["delete", "embed", "upload"]);
    }

    #[test]
    fn audit_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = TatouConfig {
            audit_enabled: false,
            ..TatouConfig::default()
        };
        let svc = TatouService::open(dir.path(), config, storage()).unwrap();
        svc.upload(b"content", "D", "owner").unwrap();
        assert!(svc.recent_audit_entries(10).unwrap().is_empty());
        assert!(!dir.path().join(AUDIT_DB).exists());
    }

    #[test]
    fn prune_clears_spent_tokens() {
        let dir = tempfile::tempdir().unwrap();
        open(dir.path()).add_identity("alice").unwrap();
        let svc = open(dir.path());
        let doc = svc.upload(b"content", "D", "owner").unwrap();
        svc.fetch("alice", doc, VersionIndex::ORIGINAL).unwrap();

        assert_eq!(svc.prune(Utc::now()).unwrap().tokens, 0);
        let later = Utc::now() + Duration::seconds(601);
        assert_eq!(svc.prune(later).unwrap().tokens, 1);
    }
}
