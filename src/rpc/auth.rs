//! Request authentication — signed identity headers with a replay window.
//!
//! Every non-exempt request carries four headers:
//!
//! | Header               | Content                                   |
//! |----------------------|-------------------------------------------|
//! | `X-Chutes-Miner`     | identity of the host serving the request  |
//! | `X-Chutes-Validator` | identity of the caller (hex public key)   |
//! | `X-Chutes-Nonce`     | Unix seconds at signing time              |
//! | `X-Chutes-Signature` | hex signature over the canonical string   |
//!
//! Canonical string: `miner:validator:nonce:hex(sha256(body))`, or
//! `miner:validator:nonce:chutes` when the body is empty.
//!
//! The checks are cheap and always run before any payload decryption, so
//! a stale or forged request is turned away without touching the enclave.

use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;

use crate::ports::{RequestSigner, SignatureVerifier};

// ── Constants ────────────────────────────────────────────────

pub const MINER_HEADER: &str = "X-Chutes-Miner";
pub const VALIDATOR_HEADER: &str = "X-Chutes-Validator";
pub const NONCE_HEADER: &str = "X-Chutes-Nonce";
pub const SIGNATURE_HEADER: &str = "X-Chutes-Signature";
pub const ENCRYPTED_HEADER: &str = "X-Chutes-Encrypted";

/// Payload digest placeholder used when the body is empty.
pub const EMPTY_BODY_SENTINEL: &str = "chutes";

/// Default freshness window for nonces.
pub const NONCE_WINDOW_SECS: u64 = 30;

// ── Header values ────────────────────────────────────────────

/// The four authentication header values as received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthHeaders {
    pub miner: Option<String>,
    pub validator: Option<String>,
    pub nonce: Option<String>,
    pub signature: Option<String>,
}

/// Why a request failed authentication.  Only the coarse
/// missing-vs-signature distinction reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    IdentityMismatch,
    StaleNonce,
    BadSignature,
}

impl AuthFailure {
    /// Detail string returned to the caller.
    pub fn public_detail(self) -> &'static str {
        match self {
            Self::Missing | Self::IdentityMismatch | Self::StaleNonce => "go away (missing)",
            Self::BadSignature => "go away (sig)",
        }
    }
}

/// Expected identities and verifier for one host.
pub struct Authenticator {
    miner: String,
    validator: String,
    window_secs: u64,
    verifier: Box<dyn SignatureVerifier>,
}

impl Authenticator {
    pub fn new(
        miner: impl Into<String>,
        validator: impl Into<String>,
        verifier: Box<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            miner: miner.into(),
            validator: validator.into(),
            window_secs: NONCE_WINDOW_SECS,
            verifier,
        }
    }

    pub fn with_window(mut self, window_secs: u64) -> Self {
        self.window_secs = window_secs;
        self
    }

    pub fn miner(&self) -> &str {
        &self.miner
    }

    pub fn validator(&self) -> &str {
        &self.validator
    }

    /// Verify `headers` against `body` at wall-clock time `now` (Unix secs).
    pub fn verify(&self, headers: &AuthHeaders, body: &[u8], now: u64) -> Result<(), AuthFailure> {
        let (Some(miner), Some(validator), Some(nonce), Some(signature)) = (
            non_empty(headers.miner.as_deref()),
            non_empty(headers.validator.as_deref()),
            non_empty(headers.nonce.as_deref()),
            non_empty(headers.signature.as_deref()),
        ) else {
            warn!("auth: missing one or more auth headers");
            return Err(AuthFailure::Missing);
        };

        if validator != self.validator || miner != self.miner {
            warn!("auth: identity mismatch (miner={miner}, validator={validator})");
            return Err(AuthFailure::IdentityMismatch);
        }

        let Ok(nonce_secs) = nonce.parse::<u64>() else {
            warn!("auth: nonce is not a number: {nonce}");
            return Err(AuthFailure::Missing);
        };
        if now.abs_diff(nonce_secs) >= self.window_secs {
            warn!("auth: stale nonce {nonce_secs} (now {now})");
            return Err(AuthFailure::StaleNonce);
        }

        let Ok(sig_bytes) = hex::decode(signature) else {
            warn!("auth: signature is not hex");
            return Err(AuthFailure::BadSignature);
        };
        let message = canonical_string(miner, validator, nonce, body);
        if !self.verifier.verify(message.as_bytes(), &sig_bytes) {
            warn!("auth: signature verification failed");
            return Err(AuthFailure::BadSignature);
        }
        Ok(())
    }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.filter(|s| !s.is_empty())
}

// ── Canonical string & signing ───────────────────────────────

/// Hex SHA-256 of `body`, or the empty-body sentinel.
pub fn payload_digest(body: &[u8]) -> String {
    if body.is_empty() {
        EMPTY_BODY_SENTINEL.to_owned()
    } else {
        hex::encode(hmac_sha256::Hash::hash(body))
    }
}

pub fn canonical_string(miner: &str, validator: &str, nonce: &str, body: &[u8]) -> String {
    format!("{miner}:{validator}:{nonce}:{}", payload_digest(body))
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Build the four header values for an outgoing request.
pub fn sign_request(
    signer: &dyn RequestSigner,
    miner: &str,
    nonce: u64,
    body: &[u8],
) -> Vec<(&'static str, String)> {
    let validator = signer.identity();
    let nonce = nonce.to_string();
    let message = canonical_string(miner, &validator, &nonce, body);
    let signature = hex::encode(signer.sign(message.as_bytes()));
    vec![
        (MINER_HEADER, miner.to_owned()),
        (VALIDATOR_HEADER, validator),
        (NONCE_HEADER, nonce),
        (SIGNATURE_HEADER, signature),
    ]
}

// ── Tests ────────────────────────────────────────────────────
