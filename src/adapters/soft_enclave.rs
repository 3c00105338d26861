//! Software enclave adapter.
//!
//! Stands in for the device-bound enclave on hosts without one (development
//! and tests).  Per-device keys are derived from the seed:
//!
//! ```text
//!   key(device_id) = SHA-256(seed_le ‖ device_id_le)      (AES-256)
//! ```
//!
//! so a validator that knows the seed can produce envelopes this adapter
//! decrypts.  It offers none of the hardware binding of a real enclave.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use log::debug;

use crate::ports::{EnclaveError, SecureEnclave};
use crate::rpc::cipher::{BLOCK_SIZE, Iv, SymmetricKey};

/// Largest range a filesystem challenge may read.
const MAX_CHALLENGE_LEN: u64 = 16 * 1024 * 1024;

pub struct SoftEnclave {
    seed: u64,
}

impl SoftEnclave {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn device_key(&self, device_id: u32) -> SymmetricKey {
        let mut material = Vec::with_capacity(12);
        material.extend_from_slice(&self.seed.to_le_bytes());
        material.extend_from_slice(&device_id.to_le_bytes());
        SymmetricKey::Aes256(hmac_sha256::Hash::hash(&material))
    }

    /// Validator-side counterpart of [`SecureEnclave::decrypt`].
    pub fn encrypt(&self, plaintext: &[u8], device_id: u32) -> (Vec<u8>, Iv) {
        let iv = crate::rpc::cipher::random_iv();
        (self.device_key(device_id).encrypt(&iv, plaintext), iv)
    }
}

impl SecureEnclave for SoftEnclave {
    fn seed(&self) -> Option<u64> {
        Some(self.seed)
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        length: usize,
        device_id: u32,
    ) -> Result<Vec<u8>, EnclaveError> {
        let iv: Iv = iv
            .try_into()
            .map_err(|_| EnclaveError::Decrypt(format!("IV must be {BLOCK_SIZE} bytes")))?;
        let plain = self
            .device_key(device_id)
            .decrypt(&iv, ciphertext)
            .map_err(|e| EnclaveError::Decrypt(e.to_string()))?;
        if plain.len() != length {
            return Err(EnclaveError::Decrypt(format!(
                "declared length {length} but decrypted {} bytes",
                plain.len()
            )));
        }
        Ok(plain)
    }

    fn device_info_challenge(&self, challenge: &str) -> Result<String, EnclaveError> {
        let mut material = challenge.as_bytes().to_vec();
        material.extend_from_slice(&self.seed.to_le_bytes());
        Ok(hex::encode(hmac_sha256::Hash::hash(&material)))
    }

    fn filesystem_challenge(
        &self,
        filename: &str,
        offset: u64,
        length: u64,
    ) -> Result<String, EnclaveError> {
        if length > MAX_CHALLENGE_LEN {
            return Err(EnclaveError::Challenge(format!("length {length} too large")));
        }
        debug!("enclave: fs challenge {filename} @{offset}+{length}");
        let read = || -> std::io::Result<Vec<u8>> {
            let mut f = File::open(filename)?;
            f.seek(SeekFrom::Start(offset))?;
            let mut buf = Vec::new();
            f.take(length).read_to_end(&mut buf)?;
            Ok(buf)
        };
        let bytes = read().map_err(|e| EnclaveError::Challenge(e.to_string()))?;
        Ok(hex::encode(hmac_sha256::Hash::hash(&bytes)))
    }
}
