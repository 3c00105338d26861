//! Symmetric session cipher: AES-CBC with PKCS#7 padding.
//!
//! Post-exchange request bodies are framed as
//! ```text
//! ┌──────────────────────┬──────────────────────────────┐
//! │ IV (32 ASCII hex)    │ base64(ciphertext)           │
//! └──────────────────────┴──────────────────────────────┘
//! ```
//! Responses reuse the request's key and IV and are sent as bare
//! `base64(ciphertext)`; streamed responses send one such frame per chunk,
//! each terminated by `\n`.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

/// AES block size (and IV length) in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Length of the ASCII-hex IV prefix in a framed body.
pub const IV_HEX_LEN: usize = BLOCK_SIZE * 2;

pub type Iv = [u8; BLOCK_SIZE];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("symmetric key must be 16 or 32 bytes, got {0}")]
    KeyLength(usize),
    #[error("malformed IV prefix")]
    IvFormat,
    #[error("invalid base64 ciphertext")]
    Base64,
    #[error("ciphertext failed to unpad (wrong key or IV?)")]
    Unpad,
}

/// Session key established by the key exchange.
#[derive(Clone, PartialEq, Eq)]
pub enum SymmetricKey {
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aes128(_) => f.write_str("SymmetricKey::Aes128(..)"),
            Self::Aes256(_) => f.write_str("SymmetricKey::Aes256(..)"),
        }
    }
}

impl SymmetricKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        match bytes.len() {
            16 => bytes.try_into().map(Self::Aes128).map_err(|_| CipherError::KeyLength(16)),
            32 => bytes.try_into().map(Self::Aes256).map_err(|_| CipherError::KeyLength(32)),
            n => Err(CipherError::KeyLength(n)),
        }
    }

    pub fn from_hex(s: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(s.trim()).map_err(|_| CipherError::KeyLength(s.len() / 2))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        match self {
            Self::Aes128(k) => hex::encode(k),
            Self::Aes256(k) => hex::encode(k),
        }
    }

    /// Fresh random AES-256 key.
    pub fn generate() -> Self {
        Self::Aes256(rand::random())
    }

    pub fn encrypt(&self, iv: &Iv, plaintext: &[u8]) -> Vec<u8> {
        match self {
            Self::Aes128(k) => cbc::Encryptor::<aes::Aes128>::new(k.into(), iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            Self::Aes256(k) => cbc::Encryptor::<aes::Aes256>::new(k.into(), iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        }
    }

    pub fn decrypt(&self, iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let out = match self {
            Self::Aes128(k) => cbc::Decryptor::<aes::Aes128>::new(k.into(), iv.into())
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            Self::Aes256(k) => cbc::Decryptor::<aes::Aes256>::new(k.into(), iv.into())
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        out.map_err(|_| CipherError::Unpad)
    }
}

/// A random IV for a new request.
pub fn random_iv() -> Iv {
    rand::random()
}

// ── Framing ──────────────────────────────────────────────────

/// Split a framed request body into its IV and raw ciphertext.
pub fn split_frame(body: &[u8]) -> Result<(Iv, Vec<u8>), CipherError> {
    if body.len() < IV_HEX_LEN {
        return Err(CipherError::IvFormat);
    }
    let (iv_hex, rest) = body.split_at(IV_HEX_LEN);
    let mut iv = [0u8; BLOCK_SIZE];
    hex::decode_to_slice(iv_hex, &mut iv).map_err(|_| CipherError::IvFormat)?;
    let ciphertext = BASE64
        .decode(rest.trim_ascii())
        .map_err(|_| CipherError::Base64)?;
    Ok((iv, ciphertext))
}

/// Encrypt `plaintext` and frame it as `hex(iv) ‖ base64(ct)`.
pub fn seal_frame(key: &SymmetricKey, iv: &Iv, plaintext: &[u8]) -> Vec<u8> {
    let mut out = hex::encode(iv).into_bytes();
    out.extend_from_slice(BASE64.encode(key.encrypt(iv, plaintext)).as_bytes());
    out
}

/// Decrypt a framed request body.
pub fn open_frame(key: &SymmetricKey, body: &[u8]) -> Result<(Iv, Vec<u8>), CipherError> {
    let (iv, ciphertext) = split_frame(body)?;
    let plaintext = key.decrypt(&iv, &ciphertext)?;
    Ok((iv, plaintext))
}

/// Encrypts handler responses with the key and IV of the request that
/// produced them.
#[derive(Debug, Clone)]
pub struct ResponseCipher {
    key: SymmetricKey,
    iv: Iv,
}

impl ResponseCipher {
    pub fn new(key: SymmetricKey, iv: Iv) -> Self {
        Self { key, iv }
    }

    /// `base64(ct)` for a whole unary response.
    pub fn seal(&self, plaintext: &[u8]) -> String {
        BASE64.encode(self.key.encrypt(&self.iv, plaintext))
    }

    /// One newline-terminated frame of a streamed response.
    pub fn seal_chunk(&self, chunk: &[u8]) -> Vec<u8> {
        let mut frame = self.seal(chunk).into_bytes();
        frame.push(b'\n');
        frame
    }

    /// Inverse of [`seal`](Self::seal), used by clients.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        let ciphertext = BASE64
            .decode(sealed.trim_ascii())
            .map_err(|_| CipherError::Base64)?;
        self.key.decrypt(&self.iv, &ciphertext)
    }
}

// ── Tests ────────────────────────────────────────────────────
