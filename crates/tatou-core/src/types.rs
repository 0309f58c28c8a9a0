// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for Tatou.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an uploaded document, assigned by the version store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a version within its document's chain. `0` is the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionIndex(pub u32);

impl VersionIndex {
    /// The original upload.
    pub const ORIGINAL: Self = Self(0);

    /// The index that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for VersionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 content fingerprint, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata of one node in a document's version chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMeta {
    pub document_id: DocumentId,
    pub index: VersionIndex,
    /// Absent only for version 0.
    pub parent: Option<VersionIndex>,
    /// Watermarking method that produced this version (absent for version 0).
    pub method: Option<String>,
    /// Opaque reference sufficient to validate a later extraction.
    pub secret_ref: Option<String>,
    /// Recipient label recorded at embed time.
    pub intended_for: Option<String>,
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl VersionMeta {
    /// Whether this version carries a watermark.
    pub fn is_watermarked(&self) -> bool {
        self.method.is_some()
    }
}

/// Listing entry for one stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub name: String,
    pub owner: String,
    /// Fingerprint of the original upload.
    pub fingerprint: Fingerprint,
    /// Size of the original upload in bytes.
    pub size: u64,
    pub version_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Public description of a registered watermarking method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub usage: String,
}

/// Identifier of an in-progress RMAP handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
