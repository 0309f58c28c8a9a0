// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Authenticated record appended after the end of file.
//
//   \n%%TATOU-EOF-HMAC:v1\n<hex of {"v":1,"alg":"HMAC-SHA256","mac":..,"secret":..}>\n
//
// The MAC is keyed with the engine's watermark key, so only a holder of that
// key can produce a record that extracts cleanly.

use serde::{Deserialize, Serialize};
use tatou_core::error::{Result, TatouError};
use tatou_security::SecretKey;

use super::{decode_record, decode_secret, encode_record, rfind};
use crate::method::WatermarkMethod;

const MARKER: &[u8] = b"\n%%TATOU-EOF-HMAC:v1\n";
const MAC_LABEL: &[u8] = b"tatou-eof-hmac-v1";
const ALGORITHM: &str = "HMAC-SHA256";
const RECORD_VERSION: u32 = 1;
const CAPACITY: usize = 4096;

#[derive(Debug, Serialize, Deserialize)]
struct EofRecord {
    v: u32,
    alg: String,
    mac: String,
    secret: String,
}

pub struct EofHmac;

impl EofHmac {
    pub const NAME: &'static str = "eof-hmac";
}

impl WatermarkMethod for EofHmac {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn usage(&self) -> &'static str {
        "Appends an HMAC-authenticated record after %%EOF; extraction proves the record was written with the server key"
    }

    fn capacity(&self, _carrier_len: usize) -> usize {
        CAPACITY
    }

    fn embed(&self, carrier: &[u8], secret: &[u8], key: &SecretKey) -> Result<Vec<u8>> {
        let record = encode_record(&EofRecord {
            v: RECORD_VERSION,
            alg: ALGORITHM.to_owned(),
            mac: hex::encode(key.sign(&[MAC_LABEL, secret])),
            secret: hex::encode(secret),
        })?;

        let mut out = Vec::with_capacity(carrier.len() + MARKER.len() + record.len() + 1);
        out.extend_from_slice(carrier);
        out.extend_from_slice(MARKER);
        out.extend_from_slice(record.as_bytes());
        out.push(b'\n');
        Ok(out)
    }

    fn extract(&self, carrier: &[u8], key: &SecretKey) -> Result<Vec<u8>> {
        let start = rfind(carrier, MARKER)
            .ok_or_else(|| TatouError::ExtractFailure("no EOF record".into()))?
            + MARKER.len();
        let tail = &carrier[start..];
        let line = tail.split(|&b| b == b'\n').next().unwrap_or(tail);

        let record: EofRecord = decode_record(line)?;
        if record.v != RECORD_VERSION || record.alg != ALGORITHM {
            return Err(TatouError::ExtractFailure(format!(
                "unsupported EOF record (v{}, {})",
                record.v, record.alg
            )));
        }

        let secret = decode_secret(&record.secret)?;
        let mac = hex::decode(&record.mac)
            .map_err(|e| TatouError::ExtractFailure(format!("mac is not hex: {e}")))?;
        if !key.verify(&[MAC_LABEL, &secret], &mac) {
            return Err(TatouError::ExtractFailure("EOF record authentication failed".into()));
        }
        Ok(secret)
    }
}
