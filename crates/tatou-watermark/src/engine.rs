// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Watermark engine: runs registered methods against stored versions and
// records the results as new versions.
//
// The engine never stores or logs a secret. Each watermarked version keeps
// only `secret_ref`, an HMAC of the secret under the engine's watermark key,
// which is enough to confirm a later extraction.

use std::sync::Arc;

use tatou_core::error::{Result, TatouError};
use tatou_core::types::{DocumentId, MethodDescriptor, VersionIndex};
use tatou_security::{AuditAction, AuditLog, AuditRecord, SecretKey};
use tatou_store::{AppendVersion, VersionStore};
use tracing::{debug, info, instrument, warn};

use crate::method::WatermarkMethod;
use crate::registry::MethodRegistry;

/// Prefix of every `secret_ref` this engine writes.
const SECRET_REF_PREFIX: &str = "hmac-sha256:";

/// Full embed request. [`WatermarkEngine::embed`] is shorthand for the
/// common case of marking the latest version for nobody in particular.
#[derive(Clone, Copy)]
pub struct EmbedRequest<'a> {
    pub document_id: DocumentId,
    pub method: &'a str,
    pub secret: &'a [u8],
    /// Version to mark. `None` means the latest one.
    pub parent: Option<VersionIndex>,
    pub intended_for: Option<&'a str>,
}

pub struct WatermarkEngine {
    registry: MethodRegistry,
    store: Arc<VersionStore>,
    key: SecretKey,
    audit: Option<Arc<AuditLog>>,
}

impl WatermarkEngine {
    pub fn new(registry: MethodRegistry, store: Arc<VersionStore>, key: SecretKey) -> Self {
        Self {
            registry,
            store,
            key,
            audit: None,
        }
    }

    /// Record every embed and extract in `audit`.
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    /// Registered methods with their usage strings.
    pub fn methods(&self) -> Vec<MethodDescriptor> {
        self.registry.describe()
    }

    /// Embed `secret` into the latest version of `document_id`.
    pub fn embed(&self, document_id: DocumentId, method: &str, secret: &[u8]) -> Result<VersionIndex> {
        self.embed_with(EmbedRequest {
            document_id,
            method,
            secret,
            parent: None,
            intended_for: None,
        })
    }

    /// Embed a secret into the requested parent version and append the
    /// result to the chain.
    #[instrument(skip_all, fields(document_id = %req.document_id, method = req.method, secret_len = req.secret.len()))]
    pub fn embed_with(&self, req: EmbedRequest<'_>) -> Result<VersionIndex> {
        let result = self.try_embed(&req);
        match &result {
            Ok(index) => {
                info!(index = %index, "watermark embedded");
                let fingerprint = self
                    .store
                    .version_meta(req.document_id, *index)
                    .map(|m| m.fingerprint.0)
                    .ok();
                let details = format!("method={} version={index}", req.method);
                let mut record = AuditRecord::success(AuditAction::Embed)
                    .document(req.document_id)
                    .details(&details);
                if let Some(fp) = fingerprint.as_deref() {
                    record = record.fingerprint(fp);
                }
                self.audit(record);
            }
            Err(e) => {
                debug!(error = %e, "embed rejected");
                let details = format!("method={} error={}", req.method, e.code());
                self.audit(
                    AuditRecord::failure(AuditAction::Embed)
                        .document(req.document_id)
                        .details(&details),
                );
            }
        }
        result
    }

    fn try_embed(&self, req: &EmbedRequest<'_>) -> Result<VersionIndex> {
        let method = self.registry.get(req.method)?;

        let parent = match req.parent {
            Some(index) => index,
            None => self.store.latest_version(req.document_id)?.index,
        };
        let (carrier, _) = self.store.get_version(req.document_id, parent)?;

        if req.secret.is_empty() {
            return Err(TatouError::EmbedFailure("secret is empty".into()));
        }
        if !method.is_applicable(&carrier) {
            return Err(TatouError::EmbedFailure(format!(
                "method {} does not apply to this document",
                method.name()
            )));
        }
        let capacity = method.capacity(carrier.len());
        if req.secret.len() > capacity {
            return Err(TatouError::EmbedFailure(format!(
                "secret of {} bytes exceeds the {capacity} byte capacity of {} for this document",
                req.secret.len(),
                method.name()
            )));
        }

        let marked = method
            .embed(&carrier, req.secret, &self.key)
            .map_err(|e| match e {
                TatouError::EmbedFailure(_) => e,
                other => TatouError::EmbedFailure(other.to_string()),
            })?;

        let secret_ref = self.secret_ref(req.secret);
        self.store.append_version(AppendVersion {
            document_id: req.document_id,
            parent,
            method: method.name(),
            secret_ref: &secret_ref,
            intended_for: req.intended_for,
            bytes: &marked,
        })
    }

    /// Recover the secret carried by one version.
    ///
    /// When the version was produced by `method`, the recovered secret must
    /// also match the version's recorded reference.
    #[instrument(skip(self), fields(document_id = %document_id, index = %index))]
    pub fn extract(&self, document_id: DocumentId, index: VersionIndex, method: &str) -> Result<Vec<u8>> {
        let result = self.try_extract(document_id, index, method);
        let details = match &result {
            Ok(_) => format!("method={method} version={index}"),
            Err(e) => format!("method={method} version={index} error={}", e.code()),
        };
        let record = match &result {
            Ok(_) => AuditRecord::success(AuditAction::Extract),
            Err(_) => AuditRecord::failure(AuditAction::Extract),
        };
        self.audit(record.document(document_id).details(&details));
        result
    }

    fn try_extract(&self, document_id: DocumentId, index: VersionIndex, method: &str) -> Result<Vec<u8>> {
        let method = self.registry.get(method)?;
        let (carrier, meta) = self.store.get_version(document_id, index)?;

        let secret = method.extract(&carrier, &self.key).map_err(|e| match e {
            TatouError::ExtractFailure(_) => e,
            other => TatouError::ExtractFailure(other.to_string()),
        })?;

        if meta.method.as_deref() == Some(method.name()) {
            if let Some(recorded) = meta.secret_ref.as_deref() {
                if !self.matches_ref(&secret, recorded) {
                    warn!("recovered secret does not match the recorded reference");
                    return Err(TatouError::ExtractFailure(
                        "recovered secret does not match the recorded reference".into(),
                    ));
                }
            }
        }
        debug!(secret_len = secret.len(), "watermark extracted");
        Ok(secret)
    }

    /// Whether `candidate` is the secret that produced this version with
    /// `method`. The comparison is constant-time.
    pub fn verify(
        &self,
        document_id: DocumentId,
        index: VersionIndex,
        method: &str,
        candidate: &[u8],
    ) -> Result<bool> {
        let method = self.registry.get(method)?;
        let meta = self.store.version_meta(document_id, index)?;
        if meta.method.as_deref() != Some(method.name()) {
            return Ok(false);
        }
        Ok(meta
            .secret_ref
            .as_deref()
            .is_some_and(|recorded| self.matches_ref(candidate, recorded)))
    }

    fn secret_ref(&self, secret: &[u8]) -> String {
        format!("{SECRET_REF_PREFIX}{}", hex::encode(self.key.sign(&[secret])))
    }

    fn matches_ref(&self, secret: &[u8], recorded: &str) -> bool {
        recorded
            .strip_prefix(SECRET_REF_PREFIX)
            .and_then(|tag| hex::decode(tag).ok())
            .is_some_and(|tag| self.key.verify(&[secret], &tag))
    }

    fn audit(&self, record: AuditRecord<'_>) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(record) {
                warn!(error = %e, "failed to write audit entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::testing::sample_pdf;

    struct Fixture {
        engine: WatermarkEngine,
        audit: Arc<AuditLog>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(VersionStore::open_in_memory().unwrap());
        let audit = Arc::new(AuditLog::open_in_memory().unwrap());
        let engine = WatermarkEngine::new(
            MethodRegistry::with_builtin_methods(),
            store,
            SecretKey::from_bytes([9u8; 32]),
        )
        .with_audit(Arc::clone(&audit));
        Fixture { engine, audit }
    }

    #[test]
    fn every_builtin_round_trips() {
        let f = fixture();
        let pdf = sample_pdf();
        for name in f.engine.registry().list() {
            let doc = f.engine.store().create_document(&pdf).unwrap();
            let index = f.engine.embed(doc, name, b"alice@example.org").unwrap();
            assert_eq!(index, VersionIndex(1), "method {name}");
            assert_eq!(
                f.engine.extract(doc, index, name).unwrap(),
                b"alice@example.org",
                "method {name}"
            );
        }
    }

    #[test]
    fn round_trip_at_capacity_and_rejection_above() {
        let f = fixture();
        let carrier = b"0123456789";
        let registry = f.engine.registry();
        let lsb = registry.get("lsb").unwrap();
        let cap = lsb.capacity(carrier.len());
        assert_eq!(cap, 3);

        let doc = f.engine.store().create_document(carrier).unwrap();
        let err = f.engine.embed(doc, "lsb", &vec![b'x'; cap + 1]).unwrap_err();
        assert!(matches!(err, TatouError::EmbedFailure(_)));
        // Nothing was appended.
        assert_eq!(f.engine.store().list_versions(doc).unwrap().len(), 1);

        let index = f.engine.embed(doc, "lsb", b"xyz").unwrap();
        assert_eq!(f.engine.extract(doc, index, "lsb").unwrap(), b"xyz");
    }

    #[test]
    fn every_builtin_honours_its_capacity() {
        let f = fixture();
        let pdf = sample_pdf();
        for name in f.engine.registry().list() {
            let cap = f.engine.registry().get(name).unwrap().capacity(pdf.len());
            assert!(cap > 0, "method {name}");
            let doc = f.engine.store().create_document(&pdf).unwrap();

            let at: Vec<u8> = (0..cap).map(|i| (i % 251) as u8 + 1).collect();
            let index = f
                .engine
                .embed_with(EmbedRequest {
                    document_id: doc,
                    method: name,
                    secret: &at,
                    parent: Some(VersionIndex::ORIGINAL),
                    intended_for: None,
                })
                .unwrap();
            assert_eq!(f.engine.extract(doc, index, name).unwrap(), at, "method {name}");

            let above = vec![0x5Au8; cap + 1];
            let err = f
                .engine
                .embed_with(EmbedRequest {
                    document_id: doc,
                    method: name,
                    secret: &above,
                    parent: Some(VersionIndex::ORIGINAL),
                    intended_for: None,
                })
                .unwrap_err();
            assert!(matches!(err, TatouError::EmbedFailure(_)), "method {name}");
            assert_eq!(f.engine.store().list_versions(doc).unwrap().len(), 2, "method {name}");
        }
    }

    #[test]
    fn check_order() {
        let f = fixture();
        let doc = f.engine.store().create_document(b"plain text body").unwrap();

        // Unknown method wins over a missing document.
        assert!(matches!(
            f.engine.embed(DocumentId(404), "nope", b"s"),
            Err(TatouError::UnknownMethod(_))
        ));
        assert!(matches!(
            f.engine.embed(DocumentId(404), "lsb", b"s"),
            Err(TatouError::DocumentNotFound(_))
        ));
        assert!(matches!(
            f.engine.embed_with(EmbedRequest {
                document_id: doc,
                method: "lsb",
                secret: b"s",
                parent: Some(VersionIndex(7)),
                intended_for: None,
            }),
            Err(TatouError::VersionNotFound { .. })
        ));
        assert!(matches!(
            f.engine.embed(doc, "pdf-object", b"s"),
            Err(TatouError::EmbedFailure(_))
        ));
        assert!(matches!(
            f.engine.embed(doc, "lsb", b""),
            Err(TatouError::EmbedFailure(_))
        ));
    }

    #[test]
    fn embed_defaults_to_latest_and_records_parent() {
        let f = fixture();
        let doc = f.engine.store().create_document(b"%PDF-1.4\n%%EOF\n").unwrap();
        f.engine.embed(doc, "trailer-hex", b"one").unwrap();
        let second = f
            .engine
            .embed_with(EmbedRequest {
                document_id: doc,
                method: "eof-hmac",
                secret: b"two",
                parent: None,
                intended_for: Some("bob"),
            })
            .unwrap();

        let meta = f.engine.store().version_meta(doc, second).unwrap();
        assert_eq!(meta.parent, Some(VersionIndex(1)));
        assert_eq!(meta.intended_for.as_deref(), Some("bob"));
        assert_eq!(meta.method.as_deref(), Some("eof-hmac"));

        // Earlier marks survive later ones.
        assert_eq!(f.engine.extract(doc, second, "eof-hmac").unwrap(), b"two");
        assert_eq!(f.engine.extract(doc, second, "trailer-hex").unwrap(), b"one");
    }

    #[test]
    fn extract_failure_is_not_version_not_found() {
        let f = fixture();
        let doc = f.engine.store().create_document(&sample_pdf()).unwrap();
        assert!(matches!(
            f.engine.extract(doc, VersionIndex::ORIGINAL, "eof-hmac"),
            Err(TatouError::ExtractFailure(_))
        ));
        assert!(matches!(
            f.engine.extract(doc, VersionIndex(3), "eof-hmac"),
            Err(TatouError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn mismatched_reference_is_extract_failure() {
        let f = fixture();
        let doc = f.engine.store().create_document(b"%%EOF").unwrap();
        // A version whose recorded reference belongs to another secret.
        let carrier = crate::methods::MarkedTrailer
            .embed(b"%%EOF", b"actual", &SecretKey::from_bytes([0u8; 32]))
            .unwrap();
        let wrong_ref = f.engine.secret_ref(b"claimed");
        let index = f
            .engine
            .store()
            .append_version(AppendVersion {
                document_id: doc,
                parent: VersionIndex::ORIGINAL,
                method: "trailer-hex",
                secret_ref: &wrong_ref,
                intended_for: None,
                bytes: &carrier,
            })
            .unwrap();

        assert!(matches!(
            f.engine.extract(doc, index, "trailer-hex"),
            Err(TatouError::ExtractFailure(_))
        ));
    }

    #[test]
    fn verify_candidates() {
        let f = fixture();
        let doc = f.engine.store().create_document(b"%%EOF").unwrap();
        let index = f.engine.embed(doc, "eof-hmac", b"right").unwrap();

        assert!(f.engine.verify(doc, index, "eof-hmac", b"right").unwrap());
        assert!(!f.engine.verify(doc, index, "eof-hmac", b"wrong").unwrap());
        assert!(!f.engine.verify(doc, index, "lsb", b"right").unwrap());
        assert!(!f
            .engine
            .verify(doc, VersionIndex::ORIGINAL, "eof-hmac", b"right")
            .unwrap());
    }

    #[test]
    fn secrets_stay_out_of_storage_and_audit() {
        let f = fixture();
        let doc = f.engine.store().create_document(&sample_pdf()).unwrap();
        let secret = b"do-not-leak-me";
        let index = f.engine.embed(doc, "pdf-object", secret).unwrap();
        f.engine.extract(doc, index, "pdf-object").unwrap();

        let meta = f.engine.store().version_meta(doc, index).unwrap();
        let secret_ref = meta.secret_ref.unwrap();
        assert!(secret_ref.starts_with(SECRET_REF_PREFIX));
        assert!(!secret_ref.contains(&hex::encode(secret)));

        let entries = f.audit.recent_entries(10).unwrap();
        assert_eq!(entries.len(), 2);
        for entry in entries {
            let details = entry.details.unwrap_or_default();
            assert!(!details.contains("do-not-leak-me"));
            assert!(!details.contains(&hex::encode(secret)));
        }
    }

    #[test]
    fn method_list_matches_registry() {
        let f = fixture();
        let names: Vec<_> = f.engine.methods().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["lsb", "trailer-hex", "eof-hmac", "pdf-object", "embedfile-v1"]);
    }
}
