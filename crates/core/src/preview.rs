//! Compressed text previews stored alongside vectors.
//!
//! Metadata size is limited per entry in the vector store, so the preview is
//! the leading characters of the document, zstd-compressed and base64-encoded.

use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine};

const COMPRESSION_LEVEL: i32 = 3;

/// Largest decoded preview accepted back from the store.
const MAX_DECODED_BYTES: usize = 256 * 1024;

pub fn leading_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

pub fn encode_preview(text: &str, max_chars: usize) -> Result<String, IngestError> {
    let head = leading_chars(text, max_chars);
    let compressed = zstd::bulk::compress(head.as_bytes(), COMPRESSION_LEVEL)?;
    Ok(STANDARD.encode(compressed))
}

pub fn decode_preview(encoded: &str) -> Result<String, IngestError> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|error| IngestError::InvalidArgument(format!("preview is not base64: {error}")))?;
    let raw = zstd::bulk::decompress(&compressed, MAX_DECODED_BYTES)?;
    String::from_utf8(raw)
        .map_err(|error| IngestError::InvalidArgument(format!("preview is not utf-8: {error}")))
}
