//! Legacy per-request asymmetric envelope.
//!
//! The body is a JSON object of named sub-payloads:
//!
//! ```text
//! { "<name>": { "ciphertext": b64, "iv": hex, "length": n, "device_id": d, "seed": s }, ... }
//! ```
//!
//! Each sub-payload is decrypted by the enclave with device-bound key
//! material; the result replaces the body as `{ "<name>": "<plaintext>" }`.
//! The same envelope carries the session key during the key exchange.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ports::SecureEnclave;

const REQUIRED_FIELDS: [&str; 5] = ["ciphertext", "iv", "length", "device_id", "seed"];

/// One encrypted sub-payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPart {
    pub ciphertext: String,
    pub iv: String,
    pub length: usize,
    pub device_id: u32,
    pub seed: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LegacyError {
    /// Body is not a JSON object of objects.
    #[error("encrypted body must be an object of payloads")]
    Malformed,
    #[error("Missing one or more required fields for encrypted payloads!")]
    MissingFields(Vec<&'static str>),
    #[error("Provided seed does not match initialization seed!")]
    SeedMismatch { expected: Option<u64>, got: u64 },
    /// The enclave could not decrypt a part.
    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

/// Decrypt every sub-payload of a legacy envelope.
pub fn decrypt_body(
    enclave: &dyn SecureEnclave,
    body: &[u8],
) -> Result<Map<String, Value>, LegacyError> {
    let Ok(Value::Object(parts)) = serde_json::from_slice::<Value>(body) else {
        return Err(LegacyError::Malformed);
    };

    let mut decrypted = Map::new();
    for (name, raw) in parts {
        let Value::Object(fields) = &raw else {
            return Err(LegacyError::Malformed);
        };
        let missing: Vec<&'static str> = REQUIRED_FIELDS
            .into_iter()
            .filter(|f| !fields.contains_key(*f))
            .collect();
        if !missing.is_empty() {
            error!("legacy: missing encryption fields {:?}", missing);
            return Err(LegacyError::MissingFields(missing));
        }
        let part: EncryptedPart =
            serde_json::from_value(raw).map_err(|_| LegacyError::Malformed)?;

        if enclave.seed() != Some(part.seed) {
            error!("legacy: expecting seed {:?}, received {}", enclave.seed(), part.seed);
            return Err(LegacyError::SeedMismatch {
                expected: enclave.seed(),
                got: part.seed,
            });
        }

        let plain = decrypt_part(enclave, &part)?;
        decrypted.insert(name, Value::String(plain));
    }
    Ok(decrypted)
}

fn decrypt_part(enclave: &dyn SecureEnclave, part: &EncryptedPart) -> Result<String, LegacyError> {
    let ciphertext = BASE64
        .decode(part.ciphertext.as_bytes())
        .map_err(|e| LegacyError::Decrypt(e.to_string()))?;
    let iv = hex::decode(&part.iv).map_err(|e| LegacyError::Decrypt(e.to_string()))?;
    let plain = enclave
        .decrypt(&ciphertext, &iv, part.length, part.device_id)
        .map_err(|e| LegacyError::Decrypt(e.to_string()))?;
    if plain.is_empty() {
        return Err(LegacyError::Decrypt("Decryption failed!".into()));
    }
    String::from_utf8(plain).map_err(|e| LegacyError::Decrypt(e.to_string()))
}
