// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Built-in watermarking methods.

pub mod embedded_file;
pub mod eof_hmac;
pub mod lsb;
pub mod pdf_object;
pub mod trailer;

pub use embedded_file::EmbeddedFile;
pub use eof_hmac::EofHmac;
pub use lsb::LowBitSubstitution;
pub use pdf_object::PdfObject;
pub use trailer::MarkedTrailer;

use lopdf::{Dictionary, Document, Object};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tatou_core::error::{Result, TatouError};

/// Serialize a record as hex-encoded compact JSON, so it survives inside
/// text-oriented formats without escaping.
pub(crate) fn encode_record<T: Serialize>(record: &T) -> Result<String> {
    let json = serde_json::to_vec(record)
        .map_err(|e| TatouError::EmbedFailure(format!("cannot encode record: {e}")))?;
    Ok(hex::encode(json))
}

/// Inverse of [`encode_record`]. Any decoding problem means there is no
/// usable watermark.
pub(crate) fn decode_record<T: DeserializeOwned>(encoded: &[u8]) -> Result<T> {
    let json = hex::decode(encoded.trim_ascii())
        .map_err(|e| TatouError::ExtractFailure(format!("record is not hex: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| TatouError::ExtractFailure(format!("record is not valid JSON: {e}")))
}

/// Decode a hex secret taken from a record.
pub(crate) fn decode_secret(encoded: &str) -> Result<Vec<u8>> {
    hex::decode(encoded).map_err(|e| TatouError::ExtractFailure(format!("secret is not hex: {e}")))
}

/// Mutable view of a PDF's document catalog.
pub(crate) fn catalog_mut(doc: &mut Document) -> Result<&mut Dictionary> {
    let id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|e| TatouError::EmbedFailure(format!("PDF has no catalog: {e}")))?;
    match doc.get_object_mut(id) {
        Ok(Object::Dictionary(dict)) => Ok(dict),
        _ => Err(TatouError::EmbedFailure("PDF catalog is not a dictionary".into())),
    }
}

/// Last occurrence of `needle` in `haystack`.
pub(crate) fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// First occurrence of `needle` in `haystack` at or after `from`.
pub(crate) fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}
