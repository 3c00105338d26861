//! Parachute library.
//!
//! Remote cord dispatch: a function defined once runs inside a deployment
//! and is called from anywhere, with arguments carried by the transport
//! codec, provisioning-aware retries on the calling side, and signed,
//! encrypted, admission-controlled transport on the host.
//!
//! ```text
//!   caller ── Cord (local) ──HTTP──▶ admission ─▶ security ─▶ Cord (remote) ─▶ handler
//! ```

#![deny(unused_must_use)]

pub mod adapters;
pub mod chute;
pub mod config;
pub mod cord;
pub mod error;
pub mod ports;
pub mod rpc;
pub mod server;
pub mod template;

pub use chute::{Chute, ChuteManifest};
pub use cord::{Cord, CordClient, Endpoint, Handler};
pub use error::{Error, Result};
