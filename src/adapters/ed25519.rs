//! Ed25519 request signing and verification.
//!
//! Identities are the lowercase hex encoding of the 32-byte public key, so
//! the validator identity header doubles as the verification key.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

use crate::error::Error;
use crate::ports::{RequestSigner, SignatureVerifier};

/// Verifies signatures against one validator public key.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    /// Parse a hex-encoded public key identity.
    pub fn from_identity(identity: &str) -> Result<Self, Error> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(identity.trim(), &mut bytes)
            .map_err(|_| Error::Config(format!("identity is not a 32-byte hex key: {identity}")))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| Error::Config(format!("identity is not a valid ed25519 key: {e}")))?;
        Ok(Self { key })
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        self.key.verify_strict(message, &sig).is_ok()
    }
}

/// Signs outgoing requests as the validator.
#[derive(Clone)]
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Parse a hex-encoded 32-byte secret seed.
    pub fn from_hex(seed_hex: &str) -> Result<Self, Error> {
        let mut seed = [0u8; 32];
        hex::decode_to_slice(seed_hex.trim(), &mut seed)
            .map_err(|_| Error::Config("signing key must be 32 bytes of hex".into()))?;
        Ok(Self::from_seed(seed))
    }

    pub fn generate() -> Self {
        Self::from_seed(rand::random())
    }

    pub fn verifier(&self) -> Ed25519Verifier {
        Ed25519Verifier {
            key: self.key.verifying_key(),
        }
    }
}

impl RequestSigner for Ed25519Signer {
    fn identity(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).to_bytes().to_vec()
    }
}
