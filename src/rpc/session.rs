//! Secure session state for one server process.
//!
//! ```text
//!   AwaitingExchange ──/_exchange──▶ Established(key)
//! ```
//!
//! The symmetric key is written exactly once and read by every request.
//! It lives in a [`OnceLock`], so readers observe either "unset" or the
//! fully written key; a second exchange attempt loses the race cleanly.

use std::sync::{Arc, OnceLock};

use log::info;

use super::auth::Authenticator;
use super::cipher::SymmetricKey;
use crate::config::PayloadSecurity;
use crate::ports::SecureEnclave;

/// Outcome of a key-exchange attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Established,
    AlreadyEstablished,
}

/// Per-process security state handed to the middleware at startup.
pub struct SecureSession {
    mode: PayloadSecurity,
    auth: Authenticator,
    enclave: Option<Arc<dyn SecureEnclave>>,
    symmetric_key: OnceLock<SymmetricKey>,
}

impl SecureSession {
    pub fn new(
        mode: PayloadSecurity,
        auth: Authenticator,
        enclave: Option<Arc<dyn SecureEnclave>>,
    ) -> Self {
        Self {
            mode,
            auth,
            enclave,
            symmetric_key: OnceLock::new(),
        }
    }

    pub fn mode(&self) -> PayloadSecurity {
        self.mode
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn enclave(&self) -> Option<&dyn SecureEnclave> {
        self.enclave.as_deref()
    }

    /// Owned handle for work moved onto the blocking pool.
    pub fn enclave_handle(&self) -> Option<Arc<dyn SecureEnclave>> {
        self.enclave.clone()
    }

    /// The session key, once exchanged.
    pub fn symmetric_key(&self) -> Option<&SymmetricKey> {
        self.symmetric_key.get()
    }

    pub fn is_established(&self) -> bool {
        self.symmetric_key.get().is_some()
    }

    /// Install the session key; only the first call wins.
    pub fn establish(&self, key: SymmetricKey) -> ExchangeOutcome {
        match self.symmetric_key.set(key) {
            Ok(()) => {
                info!("session: symmetric key established");
                ExchangeOutcome::Established
            }
            Err(_) => ExchangeOutcome::AlreadyEstablished,
        }
    }
}
