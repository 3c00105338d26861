//! Payload compression using DEFLATE via `miniz_oxide`.
//!
//! Unlike frame-level compression, transport envelopes are always
//! compressed: the decoder has no flag telling it otherwise, so both sides
//! must agree unconditionally.  Decompression is bounded to keep a small
//! hostile payload from inflating into an arbitrarily large allocation.

use log::warn;
use miniz_oxide::deflate::compress_to_vec;
use miniz_oxide::inflate::decompress_to_vec_with_limit;

/// DEFLATE compression level (1-10, higher = better ratio, slower).
const COMPRESSION_LEVEL: u8 = 6;

/// Largest decompressed payload accepted (64 MiB).
pub const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// Compress a payload using DEFLATE.
pub fn compress(input: &[u8]) -> Vec<u8> {
    compress_to_vec(input, COMPRESSION_LEVEL)
}

/// Decompress a DEFLATE-compressed payload.
///
/// Returns `None` on malformed input or when the output would exceed
/// [`MAX_DECOMPRESSED_SIZE`].
pub fn decompress(input: &[u8]) -> Option<Vec<u8>> {
    match decompress_to_vec_with_limit(input, MAX_DECOMPRESSED_SIZE) {
        Ok(data) => Some(data),
        Err(e) => {
            warn!("decompress: DEFLATE error: {:?}", e.status);
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
