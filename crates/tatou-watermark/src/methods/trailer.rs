// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Marked trailer block placed just before the final `%%EOF`.
//
//   %TATOU-WM-START
//   <hex of {"v":1,"secret":"<hex>"}>
//   %TATOU-WM-END
//
// Outside a stream `%` starts a PDF comment, so viewers skip the block.

use serde::{Deserialize, Serialize};
use tatou_core::error::{Result, TatouError};
use tatou_security::SecretKey;

use super::{decode_record, decode_secret, encode_record, find_from, rfind};
use crate::method::WatermarkMethod;

const START: &[u8] = b"%TATOU-WM-START\n";
const END: &[u8] = b"\n%TATOU-WM-END\n";
const EOF: &[u8] = b"%%EOF";
const RECORD_VERSION: u32 = 1;
const CAPACITY: usize = 4096;

#[derive(Debug, Serialize, Deserialize)]
struct TrailerRecord {
    v: u32,
    secret: String,
}

pub struct MarkedTrailer;

impl MarkedTrailer {
    pub const NAME: &'static str = "trailer-hex";
}

impl WatermarkMethod for MarkedTrailer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn usage(&self) -> &'static str {
        "Adds a marked comment block before the final %%EOF; invisible to PDF viewers, trivially removable"
    }

    fn capacity(&self, _carrier_len: usize) -> usize {
        CAPACITY
    }

    fn embed(&self, carrier: &[u8], secret: &[u8], _key: &SecretKey) -> Result<Vec<u8>> {
        let record = encode_record(&TrailerRecord {
            v: RECORD_VERSION,
            secret: hex::encode(secret),
        })?;

        let mut block = Vec::with_capacity(START.len() + record.len() + END.len());
        block.extend_from_slice(START);
        block.extend_from_slice(record.as_bytes());
        block.extend_from_slice(END);

        let mut out = Vec::with_capacity(carrier.len() + block.len() + EOF.len() + 2);
        match rfind(carrier, EOF) {
            Some(at) => {
                out.extend_from_slice(&carrier[..at]);
                if !out.ends_with(b"\n") {
                    out.push(b'\n');
                }
                out.extend_from_slice(&block);
                out.extend_from_slice(&carrier[at..]);
            }
            None => {
                out.extend_from_slice(carrier);
                if !out.ends_with(b"\n") {
                    out.push(b'\n');
                }
                out.extend_from_slice(&block);
                out.extend_from_slice(EOF);
                out.push(b'\n');
            }
        }
        Ok(out)
    }

    fn extract(&self, carrier: &[u8], _key: &SecretKey) -> Result<Vec<u8>> {
        let start = rfind(carrier, START)
            .ok_or_else(|| TatouError::ExtractFailure("no trailer block".into()))?
            + START.len();
        let end = find_from(carrier, END, start)
            .ok_or_else(|| TatouError::ExtractFailure("unterminated trailer block".into()))?;

        let record: TrailerRecord = decode_record(&carrier[start..end])?;
        if record.v != RECORD_VERSION {
            return Err(TatouError::ExtractFailure(format!(
                "unsupported trailer record version {}",
                record.v
            )));
        }
        decode_secret(&record.secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::testing::sample_pdf;

    fn key() -> SecretKey {
        SecretKey::from_bytes([2u8; 32])
    }

    #[test]
    fn block_sits_before_final_eof() {
        let pdf = sample_pdf();
        let marked = MarkedTrailer.embed(&pdf, b"owner:alice", &key()).unwrap();
        assert!(marked.ends_with(b"%%EOF") || marked.ends_with(b"%%EOF\n"));
        let block = rfind(&marked, START).unwrap();
        assert!(block < rfind(&marked, EOF).unwrap());
        assert_eq!(MarkedTrailer.extract(&marked, &key()).unwrap(), b"owner:alice");
        assert!(marked.starts_with(b"%PDF-1.5"));
    }

    #[test]
    fn appends_eof_when_missing() {
        let marked = MarkedTrailer.embed(b"plain text", b"s", &key()).unwrap();
        assert!(marked.starts_with(b"plain text\n"));
        assert!(marked.ends_with(b"%%EOF\n"));
        assert_eq!(MarkedTrailer.extract(&marked, &key()).unwrap(), b"s");
    }

    #[test]
    fn latest_block_wins() {
        let once = MarkedTrailer.embed(b"%PDF-1.4\n%%EOF\n", b"first", &key()).unwrap();
        let twice = MarkedTrailer.embed(&once, b"second", &key()).unwrap();
        assert_eq!(MarkedTrailer.extract(&twice, &key()).unwrap(), b"second");
    }

    #[test]
    fn binary_secret_round_trip() {
        let secret: Vec<u8> = (0..=255).collect();
        let marked = MarkedTrailer.embed(b"%%EOF", &secret, &key()).unwrap();
        assert_eq!(MarkedTrailer.extract(&marked, &key()).unwrap(), secret);
    }

    #[test]
    fn missing_or_broken_block() {
        assert!(matches!(
            MarkedTrailer.extract(b"%PDF-1.4\n%%EOF", &key()),
            Err(TatouError::ExtractFailure(_))
        ));
        let broken = [START, b"not-hex".as_slice(), END].concat();
        assert!(matches!(
            MarkedTrailer.extract(&broken, &key()),
            Err(TatouError::ExtractFailure(_))
        ));
        assert!(MarkedTrailer.extract(START, &key()).is_err());
    }
}
