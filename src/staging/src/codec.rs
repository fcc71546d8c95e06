//! gzip + JSON encoding for everything written to the bucket.

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

use crate::error::CodecError;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const GZIP_CONTENT_ENCODING: &str = "gzip";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Serialize `value` to JSON and gzip it.
pub fn encode_json_gz<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, CodecError> {
    let json = serde_json::to_vec(value)?;

    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    Ok(Bytes::from(compressed))
}

/// Decode a JSON document that may or may not be gzip-compressed.
///
/// Compression is detected from the magic bytes, not from object metadata:
/// older producers wrote plain JSON under `.json.gz` keys.
pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
    if is_gzip(body) {
        let mut decoder = GzDecoder::new(body);
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    } else {
        Ok(serde_json::from_slice(body)?)
    }
}

pub fn is_gzip(body: &[u8]) -> bool {
    body.starts_with(&GZIP_MAGIC)
}
