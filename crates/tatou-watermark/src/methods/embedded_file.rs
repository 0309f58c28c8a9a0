// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF attachment: a framed record stored as an embedded file under
// `/Names /EmbeddedFiles`, using `lopdf`.
//
//   WM3|<hex of {"v":1,"algo":"embedfile-v1","doc_sha256":..,"secret":..}>|<hex hmac>
//
// Extraction walks the name tree, newest attachment first. When the PDF no
// longer parses, or no attachment holds a frame, the raw bytes are scanned
// for one instead. The attachment stream is stored uncompressed so the scan
// can see it.

use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use serde::{Deserialize, Serialize};
use tatou_core::error::{Result, TatouError};
use tatou_security::{SecretKey, hash_bytes};
use tracing::debug;

use super::{catalog_mut, decode_record, decode_secret, encode_record, find_from};
use crate::method::WatermarkMethod;

const MAGIC: &[u8] = b"WM3|";
const MAC_LABEL: &[u8] = b"tatou-embedfile-v1";
const MAC_HEX_LEN: usize = 64;
const RECORD_VERSION: u32 = 1;
const CAPACITY: usize = 4096;

#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    v: u32,
    algo: String,
    doc_sha256: String,
    secret: String,
}

pub struct EmbeddedFile;

impl EmbeddedFile {
    pub const NAME: &'static str = "embedfile-v1";
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

fn names_dict(doc: &Document) -> Option<&Dictionary> {
    let names = doc.catalog().ok()?.get(b"Names").ok()?;
    resolve(doc, names).as_dict().ok()
}

/// Flat `[name, filespec, ...]` array of the embedded-files name tree.
fn attachment_pairs(doc: &Document) -> Vec<Object> {
    names_dict(doc)
        .and_then(|names| names.get(b"EmbeddedFiles").ok())
        .and_then(|tree| resolve(doc, tree).as_dict().ok())
        .and_then(|tree| tree.get(b"Names").ok())
        .and_then(|pairs| resolve(doc, pairs).as_array().ok())
        .cloned()
        .unwrap_or_default()
}

/// Contents of every attached file, in name-tree order.
fn attachments(doc: &Document) -> Vec<Vec<u8>> {
    let pairs = attachment_pairs(doc);
    pairs
        .chunks(2)
        .filter_map(|pair| pair.get(1))
        .filter_map(|spec| resolve(doc, spec).as_dict().ok())
        .filter_map(|spec| spec.get(b"EF").ok())
        .filter_map(|ef| resolve(doc, ef).as_dict().ok())
        .filter_map(|ef| ef.get(b"F").ok())
        .filter_map(|file| resolve(doc, file).as_stream().ok())
        .map(|stream| {
            stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone())
        })
        .collect()
}

fn frame_offsets(data: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut from = 0;
    while let Some(at) = find_from(data, MAGIC, from) {
        offsets.push(at);
        from = at + 1;
    }
    offsets
}

fn read_frame(blob: &[u8], key: &SecretKey) -> Result<Vec<u8>> {
    let rest = blob
        .strip_prefix(MAGIC)
        .ok_or_else(|| TatouError::ExtractFailure("frame marker missing".into()))?;
    let sep = rest
        .iter()
        .position(|&b| b == b'|')
        .ok_or_else(|| TatouError::ExtractFailure("frame has no MAC".into()))?;
    let body = &rest[..sep];
    let mac_hex = rest
        .get(sep + 1..sep + 1 + MAC_HEX_LEN)
        .ok_or_else(|| TatouError::ExtractFailure("frame truncated".into()))?;

    let mac = hex::decode(mac_hex)
        .map_err(|e| TatouError::ExtractFailure(format!("mac is not hex: {e}")))?;
    if !key.verify(&[MAC_LABEL, body], &mac) {
        return Err(TatouError::ExtractFailure("embedded file authentication failed".into()));
    }

    let record: FileRecord = decode_record(body)?;
    if record.v != RECORD_VERSION || record.algo != EmbeddedFile::NAME {
        return Err(TatouError::ExtractFailure(format!(
            "unsupported embedded file record (v{}, {})",
            record.v, record.algo
        )));
    }
    decode_secret(&record.secret)
}

impl WatermarkMethod for EmbeddedFile {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn usage(&self) -> &'static str {
        "Attaches an authenticated record as an embedded file under /EmbeddedFiles; PDF documents only"
    }

    fn is_applicable(&self, carrier: &[u8]) -> bool {
        carrier.starts_with(b"%PDF-") && Document::load_mem(carrier).is_ok()
    }

    fn capacity(&self, _carrier_len: usize) -> usize {
        CAPACITY
    }

    fn embed(&self, carrier: &[u8], secret: &[u8], key: &SecretKey) -> Result<Vec<u8>> {
        let mut doc = Document::load_mem(carrier)
            .map_err(|e| TatouError::EmbedFailure(format!("failed to load PDF: {e}")))?;

        let doc_sha256 = hash_bytes(carrier);
        let body = encode_record(&FileRecord {
            v: RECORD_VERSION,
            algo: Self::NAME.to_owned(),
            doc_sha256: doc_sha256.clone(),
            secret: hex::encode(secret),
        })?;
        let mac = hex::encode(key.sign(&[MAC_LABEL, body.as_bytes()]));
        let filename = format!("wm_{}_{}.dat", &mac[..8], &doc_sha256[..10]);

        let mut framed = Vec::with_capacity(MAGIC.len() + body.len() + 1 + mac.len());
        framed.extend_from_slice(MAGIC);
        framed.extend_from_slice(body.as_bytes());
        framed.push(b'|');
        framed.extend_from_slice(mac.as_bytes());

        let file_id = doc.add_object(
            Stream::new(dictionary! { "Type" => "EmbeddedFile" }, framed).with_compression(false),
        );
        let spec_id = doc.add_object(dictionary! {
            "Type" => "Filespec",
            "F" => Object::string_literal(filename.clone()),
            "UF" => Object::string_literal(filename.clone()),
            "EF" => dictionary! { "F" => file_id },
        });

        let mut names = names_dict(&doc).cloned().unwrap_or_default();
        let mut pairs = attachment_pairs(&doc);
        pairs.push(Object::string_literal(filename.clone()));
        pairs.push(Object::Reference(spec_id));
        names.set("EmbeddedFiles", dictionary! { "Names" => pairs });
        catalog_mut(&mut doc)?.set("Names", names);

        let mut output = Vec::new();
        doc.save_to(&mut output)
            .map_err(|e| TatouError::EmbedFailure(format!("failed to serialise PDF: {e}")))?;
        debug!(%filename, output_bytes = output.len(), "attachment added");
        Ok(output)
    }

    fn extract(&self, carrier: &[u8], key: &SecretKey) -> Result<Vec<u8>> {
        let mut last_error = None;

        if let Ok(doc) = Document::load_mem(carrier) {
            for content in attachments(&doc).iter().rev() {
                let Some(at) = find_from(content, MAGIC, 0) else {
                    continue;
                };
                match read_frame(&content[at..], key) {
                    Ok(secret) => return Ok(secret),
                    Err(e) => last_error = Some(e),
                }
            }
        }

        debug!("no attachment frame, scanning raw bytes");
        for at in frame_offsets(carrier).into_iter().rev() {
            match read_frame(&carrier[at..], key) {
                Ok(secret) => return Ok(secret),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| TatouError::ExtractFailure("no embedded watermark file".into())))
    }
}
