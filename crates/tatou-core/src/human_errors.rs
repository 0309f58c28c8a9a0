// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for operators and API clients.
//
// Every error is mapped to a plain sentence and a concrete next step. The
// RMAP failures deliberately share wording so the message cannot be used to
// tell failure causes apart.

use crate::error::TatouError;

/// Severity of an error from the caller's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Storage blip or lock contention, safe to retry.
    Transient,
    /// The caller must change the request (different method, smaller secret).
    ActionRequired,
    /// Retrying the same request will never succeed.
    Permanent,
}

/// A human-readable error with a plain message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// One-line summary.
    pub message: String,
    /// What the caller should try next.
    pub suggestion: String,
    /// Whether an identical retry can succeed.
    pub retriable: bool,
    pub severity: Severity,
}

impl HumanError {
    fn new(message: &str, suggestion: impl Into<String>, retriable: bool, severity: Severity) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retriable,
            severity,
        }
    }
}

/// Convert a `TatouError` into a `HumanError`.
pub fn humanize_error(err: &TatouError) -> HumanError {
    match err {
        // -- Not found --
        TatouError::DocumentNotFound(id) => HumanError::new(
            "That document doesn't exist.",
            format!("Check the document id ({id}) against the document list."),
            false,
            Severity::ActionRequired,
        ),

        TatouError::VersionNotFound { document_id, .. } => HumanError::new(
            "That version doesn't exist.",
            format!("List the versions of document {document_id} and pick one of those."),
            false,
            Severity::ActionRequired,
        ),

        TatouError::UnknownMethod(name) => HumanError::new(
            "That watermarking method isn't available.",
            format!("'{name}' is not registered. List the methods and choose one of them."),
            false,
            Severity::ActionRequired,
        ),

        // -- Handshake --
        TatouError::SessionNotFound
        | TatouError::SessionExpired
        | TatouError::AuthenticationFailed
        | TatouError::UnknownIdentity => HumanError::new(
            "The link request could not be completed.",
            "Start a new handshake from the beginning.",
            false,
            Severity::ActionRequired,
        ),

        // -- Links --
        TatouError::InvalidToken => HumanError::new(
            "That link is not valid.",
            "Request a new link.",
            false,
            Severity::Permanent,
        ),

        TatouError::TokenExpired => HumanError::new(
            "That link has expired.",
            "Request a new link and use it before it expires.",
            false,
            Severity::Permanent,
        ),

        TatouError::TokenAlreadyUsed => HumanError::new(
            "That link has already been used.",
            "Links work once. Request a new link.",
            false,
            Severity::Permanent,
        ),

        // -- Conflict --
        TatouError::DuplicateContent { existing, .. } => HumanError::new(
            "This content is already stored.",
            format!("Version {existing} holds identical bytes; use a different secret or method."),
            false,
            Severity::ActionRequired,
        ),

        TatouError::DuplicateMethod(name) => HumanError::new(
            "A method with that name is already registered.",
            format!("Register '{name}' under a different name."),
            false,
            Severity::Permanent,
        ),

        // -- Validation --
        TatouError::EmptyPayload => HumanError::new(
            "The document is empty.",
            "Upload a file that contains data.",
            false,
            Severity::ActionRequired,
        ),

        TatouError::PayloadTooLarge { limit, .. } => HumanError::new(
            "The document is too large.",
            format!("Documents may be at most {limit} bytes."),
            false,
            Severity::ActionRequired,
        ),

        TatouError::EmbedFailure(detail) => HumanError::new(
            "The watermark could not be embedded.",
            format!("Try a shorter secret or a different method. ({detail})"),
            false,
            Severity::ActionRequired,
        ),

        // -- Method --
        TatouError::ExtractFailure(_) => HumanError::new(
            "No watermark was found.",
            "Check that the version was produced with the method you asked for.",
            false,
            Severity::ActionRequired,
        ),

        // -- Infrastructure --
        TatouError::Database(_) => HumanError::new(
            "The document store had a problem.",
            "Try again. Stored documents are not affected.",
            true,
            Severity::Transient,
        ),

        TatouError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound => HumanError::new(
                "The file couldn't be found.",
                "Check the path and try again.",
                false,
                Severity::ActionRequired,
            ),
            std::io::ErrorKind::PermissionDenied => HumanError::new(
                "Permission denied while accessing a file.",
                "Check the file permissions of the data directory.",
                false,
                Severity::ActionRequired,
            ),
            _ => HumanError::new(
                "There was a problem reading or writing a file.",
                "Try again. If this keeps happening, the disk may be full.",
                true,
                Severity::Transient,
            ),
        },

        TatouError::Serialization(_) | TatouError::Internal(_) => HumanError::new(
            "An internal problem occurred.",
            "Try again. If this keeps happening, please report it.",
            true,
            Severity::Transient,
        ),

        TatouError::IntegrityMismatch { .. } => HumanError::new(
            "A stored version no longer matches its fingerprint.",
            "The data directory may have been modified outside Tatou. Restore it from backup.",
            false,
            Severity::Permanent,
        ),

        TatouError::Crypto(_) => HumanError::new(
            "A cryptographic operation failed.",
            "Check that the signing key and keyring are intact.",
            false,
            Severity::Permanent,
        ),

        TatouError::Encryption(_) | TatouError::Decryption(_) => HumanError::new(
            "The keyring could not be unlocked or saved.",
            "Check the keyring passphrase environment variable.",
            false,
            Severity::ActionRequired,
        ),

        TatouError::Config(detail) => HumanError::new(
            "The configuration is invalid.",
            format!("Fix config.json in the data directory. ({detail})"),
            false,
            Severity::ActionRequired,
        ),
    }
}
