// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Tatou.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DocumentId, VersionIndex};

/// Top-level error type for all Tatou operations.
#[derive(Debug, Error)]
pub enum TatouError {
    // -- Not found --
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("version {index} of document {document_id} not found")]
    VersionNotFound {
        document_id: DocumentId,
        index: VersionIndex,
    },

    #[error("session not found")]
    SessionNotFound,

    #[error("unknown watermarking method: {0}")]
    UnknownMethod(String),

    // -- Conflict --
    #[error("identical content already stored as version {existing} of document {document_id}")]
    DuplicateContent {
        document_id: DocumentId,
        existing: VersionIndex,
    },

    #[error("watermarking method already registered: {0}")]
    DuplicateMethod(String),

    // -- Validation --
    #[error("payload is empty")]
    EmptyPayload,

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("embedding failed: {0}")]
    EmbedFailure(String),

    // -- Authentication --
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("unknown identity")]
    UnknownIdentity,

    #[error("invalid link token")]
    InvalidToken,

    // -- Expiry --
    #[error("session expired")]
    SessionExpired,

    #[error("link token expired")]
    TokenExpired,

    // -- Reuse --
    #[error("link token already used")]
    TokenAlreadyUsed,

    // -- Method --
    #[error("no recoverable watermark: {0}")]
    ExtractFailure(String),

    // -- Infrastructure --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse failure classes shared by every component.
///
/// The transport layer maps each class to its own response code via
/// [`ErrorKind::status_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Document, version, session or method absent.
    NotFound,
    /// Duplicate content or duplicate method name.
    Conflict,
    /// Empty payload, oversized payload, embed capacity exceeded.
    ValidationFailure,
    /// Bad RMAP proof, unknown identity, forged token.
    AuthenticationFailure,
    /// Session or token past its deadline.
    ExpiryFailure,
    /// Token already consumed.
    ReuseFailure,
    /// Extraction found nothing recoverable.
    MethodFailure,
    /// Storage, I/O, crypto backend or configuration trouble.
    Infrastructure,
}

impl ErrorKind {
    /// HTTP-style status code for this class. Every class gets a distinct code.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::ValidationFailure => 400,
            Self::AuthenticationFailure => 401,
            Self::ExpiryFailure => 410,
            Self::ReuseFailure => 403,
            Self::MethodFailure => 422,
            Self::Infrastructure => 500,
        }
    }
}

impl TatouError {
    /// Classify this error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DocumentNotFound(_)
            | Self::VersionNotFound { .. }
            | Self::SessionNotFound
            | Self::UnknownMethod(_) => ErrorKind::NotFound,

            Self::DuplicateContent { .. } | Self::DuplicateMethod(_) => ErrorKind::Conflict,

            Self::EmptyPayload | Self::PayloadTooLarge { .. } | Self::EmbedFailure(_) => {
                ErrorKind::ValidationFailure
            }

            Self::AuthenticationFailed | Self::UnknownIdentity | Self::InvalidToken => {
                ErrorKind::AuthenticationFailure
            }

            Self::SessionExpired | Self::TokenExpired => ErrorKind::ExpiryFailure,

            Self::TokenAlreadyUsed => ErrorKind::ReuseFailure,

            Self::ExtractFailure(_) => ErrorKind::MethodFailure,

            Self::Database(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::IntegrityMismatch { .. }
            | Self::Crypto(_)
            | Self::Encryption(_)
            | Self::Decryption(_)
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Infrastructure,
        }
    }

    /// Status code for the transport layer.
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Stable machine-readable code, distinct per variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DocumentNotFound(_) => "document_not_found",
            Self::VersionNotFound { .. } => "version_not_found",
            Self::SessionNotFound => "session_not_found",
            Self::UnknownMethod(_) => "unknown_method",
            Self::DuplicateContent { .. } => "duplicate_content",
            Self::DuplicateMethod(_) => "duplicate_method",
            Self::EmptyPayload => "empty_payload",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::EmbedFailure(_) => "embed_failure",
            Self::AuthenticationFailed => "authentication_failed",
            Self::UnknownIdentity => "unknown_identity",
            Self::InvalidToken => "invalid_token",
            Self::SessionExpired => "session_expired",
            Self::TokenExpired => "token_expired",
            Self::TokenAlreadyUsed => "token_already_used",
            Self::ExtractFailure(_) => "extract_failure",
            Self::Database(_) => "database",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::IntegrityMismatch { .. } => "integrity_mismatch",
            Self::Crypto(_) => "crypto",
            Self::Encryption(_) => "encryption",
            Self::Decryption(_) => "decryption",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Build an `Internal` error for a poisoned lock.
    pub fn poisoned(what: &str) -> Self {
        Self::Internal(format!("{what} lock poisoned"))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TatouError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_kind_has_a_distinct_status() {
        let kinds = [
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::ValidationFailure,
            ErrorKind::AuthenticationFailure,
            ErrorKind::ExpiryFailure,
            ErrorKind::ReuseFailure,
            ErrorKind::MethodFailure,
            ErrorKind::Infrastructure,
        ];
        let codes: HashSet<u16> = kinds.iter().map(ErrorKind::status_code).collect();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn extract_failure_is_distinct_from_version_not_found() {
        let missing = TatouError::VersionNotFound {
            document_id: DocumentId(1),
            index: VersionIndex(3),
        };
        let absent = TatouError::ExtractFailure("no marker".into());
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert_eq!(absent.kind(), ErrorKind::MethodFailure);
        assert_ne!(missing.status_code(), absent.status_code());
    }

    #[test]
    fn reuse_and_expiry_are_separate_classes() {
        assert_eq!(TatouError::TokenAlreadyUsed.kind(), ErrorKind::ReuseFailure);
        assert_eq!(TatouError::TokenExpired.kind(), ErrorKind::ExpiryFailure);
        assert_eq!(TatouError::SessionExpired.kind(), ErrorKind::ExpiryFailure);
    }

    #[test]
    fn version_not_found_message_names_both_ids() {
        let err = TatouError::VersionNotFound {
            document_id: DocumentId(7),
            index: VersionIndex(2),
        };
        assert_eq!(err.to_string(), "version 2 of document 7 not found");
        assert_eq!(err.code(), "version_not_found");
    }
}
