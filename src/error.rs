//! Unified error types for the cord runtime.
//!
//! A single [`Error`] enum that every subsystem converts into, so the local
//! caller sees one error type regardless of whether a call failed while
//! binding, encoding, dispatching or decoding.  Server-side request
//! rejections are not errors in this sense; they live in
//! [`crate::server::Rejection`] and become HTTP responses directly.

use std::time::Duration;

use thiserror::Error;

pub use crate::rpc::cipher::CipherError;
pub use crate::rpc::codec::CodecError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible cord operation funnels into this type.
#[derive(Debug, Error)]
pub enum Error {
    /// An endpoint path does not match the restricted path grammar.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A second cord tried to claim a path already bound on the deployment.
    #[error("duplicate path: {0}")]
    DuplicatePath(String),

    /// The endpoint flags disagree with the kind of function bound to it.
    #[error("cord {path}: {reason}")]
    BindingMismatch { path: String, reason: &'static str },

    /// Arguments or results could not be encoded/decoded.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// The remote deployment answered 503; it is not ready yet.
    #[error("still provisioning: {0}")]
    StillProvisioning(String),

    /// The deployment kept answering 503 past the provisioning deadline.
    #[error("still provisioning after {elapsed:?}: {detail}")]
    ProvisioningTimeout { elapsed: Duration, detail: String },

    /// The remote answered with a non-success status.
    #[error("remote invocation failed [status={status}]: {body}")]
    RemoteInvocation { status: u16, body: String },

    /// Connection-level failure talking to the remote or the sibling service.
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// The wrapped function body returned an error.
    #[error("handler: {0}")]
    Handler(#[source] anyhow::Error),

    /// Session encryption or decryption failed.
    #[error("cipher: {0}")]
    Cipher(#[from] CipherError),

    /// Configuration is invalid or could not be loaded.
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Whether the call may succeed if simply tried again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StillProvisioning(_))
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
