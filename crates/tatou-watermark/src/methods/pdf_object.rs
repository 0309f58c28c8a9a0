// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Hidden PDF object: an unreferenced-looking XML stream hung off the
// document catalog, using `lopdf`.
//
// The stream is never drawn: it is reachable only through the private
// catalog key `/TatouWatermark`, which viewers ignore.

use lopdf::{Document, Object, Stream, dictionary};
use tatou_core::error::{Result, TatouError};
use tatou_security::SecretKey;
use tracing::debug;

use super::{catalog_mut, decode_secret};
use crate::method::WatermarkMethod;

const CATALOG_KEY: &[u8] = b"TatouWatermark";
const CAPACITY: usize = 64 * 1024;

pub struct PdfObject;

impl PdfObject {
    pub const NAME: &'static str = "pdf-object";
}

impl WatermarkMethod for PdfObject {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn usage(&self) -> &'static str {
        "Stores the secret in a hidden XML stream referenced from the PDF catalog; PDF documents only"
    }

    fn is_applicable(&self, carrier: &[u8]) -> bool {
        carrier.starts_with(b"%PDF-") && Document::load_mem(carrier).is_ok()
    }

    fn capacity(&self, _carrier_len: usize) -> usize {
        CAPACITY
    }

    fn embed(&self, carrier: &[u8], secret: &[u8], _key: &SecretKey) -> Result<Vec<u8>> {
        let mut doc = Document::load_mem(carrier)
            .map_err(|e| TatouError::EmbedFailure(format!("failed to load PDF: {e}")))?;

        let stream = Stream::new(
            dictionary! {
                "Type" => "Metadata",
                "Subtype" => "XML",
            },
            hex::encode(secret).into_bytes(),
        );
        let stream_id = doc.add_object(stream);
        catalog_mut(&mut doc)?.set(CATALOG_KEY, Object::Reference(stream_id));

        let mut output = Vec::new();
        doc.save_to(&mut output)
            .map_err(|e| TatouError::EmbedFailure(format!("failed to serialise PDF: {e}")))?;
        debug!(?stream_id, output_bytes = output.len(), "hidden object added");
        Ok(output)
    }

    fn extract(&self, carrier: &[u8], _key: &SecretKey) -> Result<Vec<u8>> {
        let doc = Document::load_mem(carrier)
            .map_err(|e| TatouError::ExtractFailure(format!("not a readable PDF: {e}")))?;

        let stream_id = doc
            .catalog()
            .and_then(|catalog| catalog.get(CATALOG_KEY))
            .and_then(Object::as_reference)
            .map_err(|_| TatouError::ExtractFailure("no hidden object in catalog".into()))?;
        let stream = doc
            .get_object(stream_id)
            .and_then(Object::as_stream)
            .map_err(|_| TatouError::ExtractFailure("hidden object is not a stream".into()))?;

        let encoded = std::str::from_utf8(&stream.content)
            .map_err(|_| TatouError::ExtractFailure("hidden object is not text".into()))?;
        decode_secret(encoded.trim())
    }
}
