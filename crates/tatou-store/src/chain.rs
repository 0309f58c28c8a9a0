// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory view of one document's version chain.
//
// A chain is only ever touched while its owning mutex is held, which makes it
// the linearization point for index assignment on that document.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tatou_core::error::{Result, TatouError};
use tatou_core::types::{DocumentId, DocumentSummary, Fingerprint, VersionIndex, VersionMeta};

#[derive(Debug)]
pub(crate) struct Chain {
    pub id: DocumentId,
    pub name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    /// Set once the document is deleted; late holders of the chain see
    /// `DocumentNotFound`.
    pub deleted: bool,
    versions: Vec<VersionMeta>,
    fingerprints: HashMap<Fingerprint, VersionIndex>,
}

impl Chain {
    pub fn new(id: DocumentId, name: String, owner: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            owner,
            created_at,
            deleted: false,
            versions: Vec::new(),
            fingerprints: HashMap::new(),
        }
    }

    /// Fail with `DocumentNotFound` if the document was deleted.
    pub fn live(&self) -> Result<&Self> {
        if self.deleted {
            Err(TatouError::DocumentNotFound(self.id))
        } else {
            Ok(self)
        }
    }

    pub fn get(&self, index: VersionIndex) -> Result<&VersionMeta> {
        self.versions
            .get(index.0 as usize)
            .ok_or(TatouError::VersionNotFound {
                document_id: self.id,
                index,
            })
    }

    pub fn latest(&self) -> Result<&VersionMeta> {
        self.versions
            .last()
            .ok_or(TatouError::VersionNotFound {
                document_id: self.id,
                index: VersionIndex::ORIGINAL,
            })
    }

    /// Index the next appended version will receive.
    pub fn next_index(&self) -> VersionIndex {
        VersionIndex(self.versions.len() as u32)
    }

    /// Reject content already present anywhere in this chain.
    pub fn check_unique(&self, fingerprint: &Fingerprint) -> Result<()> {
        match self.fingerprints.get(fingerprint) {
            Some(&existing) => Err(TatouError::DuplicateContent {
                document_id: self.id,
                existing,
            }),
            None => Ok(()),
        }
    }

    /// Add `meta` as the next version. The caller has already validated the
    /// parent and uniqueness and persisted the row.
    pub fn push(&mut self, meta: VersionMeta) {
        debug_assert_eq!(meta.index, self.next_index());
        self.fingerprints
            .insert(meta.fingerprint.clone(), meta.index);
        self.versions.push(meta);
    }

    pub fn versions(&self) -> &[VersionMeta] {
        &self.versions
    }

    pub fn summary(&self) -> Result<DocumentSummary> {
        let original = self.get(VersionIndex::ORIGINAL)?;
        Ok(DocumentSummary {
            id: self.id,
            name: self.name.clone(),
            owner: self.owner.clone(),
            fingerprint: original.fingerprint.clone(),
            size: original.size,
            version_count: self.versions.len() as u32,
            created_at: self.created_at,
        })
    }
}
