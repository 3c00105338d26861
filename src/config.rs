//! Runtime configuration
//!
//! Tunables for both sides of a cord.  Values load from a JSON file; the
//! run binary then overrides individual fields from the command line.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_TOKEN_CHECK_URL: &str = "https://api.chutes.ai/instances/token_check";

/// How request and response payloads are protected on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSecurity {
    /// Bodies pass through untouched (development only).
    Plain,
    /// Legacy per-request envelope decrypted by the enclave.
    Asymmetric,
    /// Session key established once via `/_exchange`.
    #[default]
    Symmetric,
}

impl std::str::FromStr for PayloadSecurity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(Self::Plain),
            "asymmetric" => Ok(Self::Asymmetric),
            "symmetric" => Ok(Self::Symmetric),
            other => Err(Error::Config(format!("unknown payload security mode: {other}"))),
        }
    }
}

/// Remote host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // --- Identity ---
    /// Identity the host expects in the miner header.
    pub miner_identity: String,
    /// Hex ed25519 public key of the only accepted caller.
    pub validator_identity: String,

    // --- Capacity ---
    /// Overrides the deployment's own concurrency bound.
    pub concurrency: Option<usize>,

    // --- Security ---
    pub payload_security: PayloadSecurity,
    pub nonce_window_secs: u64,
    /// Skip authentication for loopback callers.
    pub trust_loopback: bool,
    /// Mount `/_procs` and `/_slurp`.
    pub dev_tooling: bool,

    // --- Network ---
    /// Sibling server that passthrough cords forward to.
    pub passthrough_base_url: String,
    /// Default target of `/_token` when the request names none.
    pub token_check_url: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            miner_identity: String::new(),
            validator_identity: String::new(),
            concurrency: None,
            payload_security: PayloadSecurity::default(),
            nonce_window_secs: crate::rpc::auth::NONCE_WINDOW_SECS,
            trust_loopback: false,
            dev_tooling: false,
            passthrough_base_url: "http://127.0.0.1:8000".into(),
            token_check_url: DEFAULT_TOKEN_CHECK_URL.into(),
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path.as_ref())
    }

    pub fn validate(&self) -> Result<()> {
        if self.miner_identity.is_empty() {
            return Err(Error::Config("miner_identity is required".into()));
        }
        if hex::decode(&self.validator_identity).map_or(true, |k| k.len() != 32) {
            return Err(Error::Config(
                "validator_identity must be a hex ed25519 public key".into(),
            ));
        }
        if self.concurrency == Some(0) {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        if self.nonce_window_secs == 0 {
            return Err(Error::Config("nonce_window_secs must be positive".into()));
        }
        check_url("passthrough_base_url", &self.passthrough_base_url)?;
        check_url("token_check_url", &self.token_check_url)
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Calling-side configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL deployments are reached under (`{base}/{deployment_id}{path}`).
    pub api_base_url: String,
    pub miner_identity: String,
    /// Hex ed25519 seed of the validator signing key.
    pub signing_key: String,
    pub retry_interval_ms: u64,
    pub default_provision_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.chutes.ai".into(),
            miner_identity: String::new(),
            signing_key: String::new(),
            retry_interval_ms: 1000,
            default_provision_timeout_secs: 180,
        }
    }
}

impl ClientConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path.as_ref())
    }

    pub fn validate(&self) -> Result<()> {
        check_url("api_base_url", &self.api_base_url)?;
        if self.miner_identity.is_empty() {
            return Err(Error::Config("miner_identity is required".into()));
        }
        if hex::decode(&self.signing_key).map_or(true, |k| k.len() != 32) {
            return Err(Error::Config("signing_key must be a 32-byte hex seed".into()));
        }
        if self.retry_interval_ms == 0 {
            return Err(Error::Config("retry_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

fn check_url(field: &str, url: &str) -> Result<()> {
    let ok = reqwest::Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!("{field} is not an http(s) URL: {url}")))
    }
}
