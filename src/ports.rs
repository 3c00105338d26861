//! Port traits — the boundary between the protocol core and the
//! device-bound capabilities it relies on.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ SecurityMiddleware / CordClient
//! ```
//!
//! The protocol only specifies *how* these capabilities are used; the
//! capabilities themselves (device-bound decryption, attestation
//! challenges, signing keys) are provided by adapters.
//!
//! ## Security notes
//!
//! - **SecureEnclave** implementations own the device key material; the
//!   middleware never sees it.
//! - **SignatureVerifier** implementations MUST verify in constant time.

use thiserror::Error;

// ───────────────────────────────────────────────────────────────
// Secure enclave (device-bound decryption and attestation)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnclaveError {
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("challenge failed: {0}")]
    Challenge(String),
}

/// Device-bound asymmetric capability on the remote host.
pub trait SecureEnclave: Send + Sync {
    /// Seed the enclave was initialised with, if any.
    fn seed(&self) -> Option<u64>;

    /// Decrypt one sub-payload of a legacy envelope.
    ///
    /// `length` is the plaintext length declared by the sender.
    fn decrypt(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        length: usize,
        device_id: u32,
    ) -> Result<Vec<u8>, EnclaveError>;

    /// Answer a device-info attestation challenge.
    fn device_info_challenge(&self, challenge: &str) -> Result<String, EnclaveError>;

    /// Answer a filesystem-range attestation challenge.
    fn filesystem_challenge(
        &self,
        filename: &str,
        offset: u64,
        length: u64,
    ) -> Result<String, EnclaveError>;
}

// ───────────────────────────────────────────────────────────────
// Request signatures
// ───────────────────────────────────────────────────────────────

/// Verifies signatures made by the validator over a canonical string.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// Produces signatures on the calling side.
pub trait RequestSigner: Send + Sync {
    /// Identity of the signer as it appears in the validator header.
    fn identity(&self) -> String;

    fn sign(&self, message: &[u8]) -> Vec<u8>;
}
