//! Transport codec for call arguments and results.
//!
//! Pipeline:
//! ```text
//!  value ──serde_json──▶ bytes ──DEFLATE──▶ compressed ──base64──▶ String
//!  value ◀──serde_json── bytes ◀──inflate── compressed ◀──base64── String
//! ```
//!
//! JSON is used as the serialisation stage because it is self-describing:
//! a passthrough cord decodes its keyword arguments into an untyped
//! [`serde_json::Value`] without knowing the caller's types.  The
//! compressed bytes are base64 encoded so they can sit inside a JSON
//! envelope.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::compress;

/// Failure to decode (or, rarely, encode) a transport value.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not valid DEFLATE or exceeds the size limit")]
    Decompress,
    #[error("serialisation: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialise, compress and base64-encode `value`.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    let raw = serde_json::to_vec(value)?;
    Ok(BASE64.encode(compress::compress(&raw)))
}

/// Exact inverse of [`encode`].
pub fn decode<T: DeserializeOwned>(encoded: &str) -> Result<T, CodecError> {
    let compressed = BASE64.decode(encoded.as_bytes())?;
    let raw = compress::decompress(&compressed).ok_or(CodecError::Decompress)?;
    Ok(serde_json::from_slice(&raw)?)
}

// ── Wire envelopes ───────────────────────────────────────────

/// Unary request body: positional and keyword arguments, each encoded
/// independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub args: String,
    pub kwargs: String,
}

impl CallEnvelope {
    pub fn new<A, K>(args: &A, kwargs: &K) -> Result<Self, CodecError>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        Ok(Self {
            args: encode(args)?,
            kwargs: encode(kwargs)?,
        })
    }

    pub fn decode_args<A: DeserializeOwned>(&self) -> Result<A, CodecError> {
        decode(&self.args)
    }

    pub fn decode_kwargs<K: DeserializeOwned>(&self) -> Result<K, CodecError> {
        decode(&self.kwargs)
    }
}

/// Unary response body of an embedded (non-passthrough) cord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    pub result: String,
}

impl CallResult {
    pub fn encode<R: Serialize + ?Sized>(value: &R) -> Result<Self, CodecError> {
        Ok(Self {
            result: encode(value)?,
        })
    }

    pub fn decode<R: DeserializeOwned>(&self) -> Result<R, CodecError> {
        decode(&self.result)
    }
}

/// Keyword arguments for cords that take none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoKwargs {}

// ── Tests ────────────────────────────────────────────────────
