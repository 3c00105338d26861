//! HTTP host for a deployment.
//!
//! ## Router structure
//!
//! ```text
//! /
//! ├── /{cord path}         POST  every registered cord
//! ├── /_ping               POST  echo of the (decrypted) body
//! ├── /_exchange           POST  one-time session key exchange
//! ├── /_token              GET   token fetch through the host's egress
//! ├── /_alive              GET   liveness          (internal only)
//! ├── /_metrics            GET   Prometheus text   (internal only)
//! ├── /_device_challenge   GET   enclave attestation
//! ├── /_fs_challenge       POST  filesystem attestation
//! ├── /_procs              GET   process listing   (dev tooling, internal only)
//! └── /_slurp              GET   file read         (dev tooling, internal only)
//! ```
//!
//! Layers, outermost first: admission → security → handler.
//!
//! Lifecycle: startup hooks → serve until the shutdown signal → drain
//! in-flight requests → shutdown hooks.

pub mod admission;
pub mod routes;
pub mod security;

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use log::{error, info};
use serde_json::json;
use tokio::net::TcpListener;

use crate::adapters::ed25519::Ed25519Verifier;
use crate::chute::Chute;
use crate::config::ServerConfig;
use crate::cord::Upstream;
use crate::error::{CipherError, Error, Result};
use crate::ports::SecureEnclave;
use crate::rpc::admission::AdmissionController;
use crate::rpc::auth::Authenticator;
use crate::rpc::legacy::LegacyError;
use crate::rpc::session::SecureSession;

// ── Path classes ─────────────────────────────────────────────

pub const EXCHANGE_PATH: &str = "/_exchange";

/// Paths that skip signature checks, payload decryption and admission.
pub const EXEMPT_PATHS: [&str; 6] = [
    "/_alive",
    "/_metrics",
    "/_device_challenge",
    "/_fs_challenge",
    "/_procs",
    "/_slurp",
];

/// Exempt paths reachable only from non-public addresses.
pub const INTERNAL_PATHS: [&str; 4] = ["/_alive", "/_metrics", "/_procs", "/_slurp"];

pub fn is_exempt(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path)
}

pub fn is_internal_only(path: &str) -> bool {
    INTERNAL_PATHS.contains(&path)
}

/// Private, loopback, link-local and otherwise non-routable addresses.
pub fn is_internal_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.to_ipv4_mapped().is_some_and(|v4| is_internal_address(IpAddr::V4(v4)))
        }
    }
}

/// Response extension marking a body that is still being produced.
#[derive(Debug, Clone, Copy)]
pub struct Streaming;

// ── Rejections ───────────────────────────────────────────────

/// Every way the host turns a request away.
#[derive(Debug)]
pub enum Rejection {
    Unauthorized(&'static str),
    BadRequest(String),
    /// No session key has been exchanged yet.
    UpgradeRequired,
    Conflict(&'static str),
    TooManyRequests,
    PayloadTooLarge,
    Internal(String),
    BadGateway(String),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Unauthorized(d) | Self::Conflict(d) => (*d).to_owned(),
            Self::BadRequest(d) | Self::Internal(d) | Self::BadGateway(d) => d.clone(),
            Self::UpgradeRequired => "exchange a session key first".into(),
            Self::TooManyRequests => "too many requests".into(),
            Self::PayloadTooLarge => "payload too large".into(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status(), axum::Json(json!({ "detail": self.detail() }))).into_response()
    }
}

impl From<Error> for Rejection {
    fn from(err: Error) -> Self {
        match err {
            Error::Transport(e) => Self::BadGateway(e.to_string()),
            Error::Handler(e) => {
                error!("handler failed: {e:#}");
                Self::Internal(e.to_string())
            }
            // Argument decoding runs inside the cord.
            Error::Codec(e) => {
                error!("cord payload failed to decode: {e}");
                Self::Internal(format!("invalid payload: {e}"))
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<LegacyError> for Rejection {
    fn from(err: LegacyError) -> Self {
        match err {
            LegacyError::Decrypt(_) => Self::Internal(err.to_string()),
            LegacyError::Malformed | LegacyError::MissingFields(_) | LegacyError::SeedMismatch { .. } => {
                Self::BadRequest(err.to_string())
            }
        }
    }
}

impl From<CipherError> for Rejection {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::IvFormat | CipherError::Base64 => Self::BadRequest(err.to_string()),
            CipherError::Unpad | CipherError::KeyLength(_) => Self::Internal(err.to_string()),
        }
    }
}

// ── State ────────────────────────────────────────────────────

/// Shared by every middleware and built-in route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub session: Arc<SecureSession>,
    pub admission: AdmissionController,
    pub chute_name: Arc<str>,
    pub started: Instant,
    /// Outbound client for built-ins that call out (`/_token`).
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(chute: &Chute, config: ServerConfig, session: SecureSession) -> Self {
        let concurrency = config.concurrency.unwrap_or_else(|| chute.concurrency());
        Self {
            config: Arc::new(config),
            session: Arc::new(session),
            admission: AdmissionController::new(concurrency),
            chute_name: Arc::from(chute.name()),
            started: Instant::now(),
            http: reqwest::Client::new(),
        }
    }
}

/// Build the per-process security state from configuration.
pub fn secure_session(
    config: &ServerConfig,
    enclave: Option<Arc<dyn SecureEnclave>>,
) -> Result<SecureSession> {
    let verifier = Ed25519Verifier::from_identity(&config.validator_identity)?;
    let auth = Authenticator::new(
        &config.miner_identity,
        &config.validator_identity,
        Box::new(verifier),
    )
    .with_window(config.nonce_window_secs);
    Ok(SecureSession::new(config.payload_security, auth, enclave))
}

// ── Router & lifecycle ───────────────────────────────────────

/// Mount every cord and built-in route behind the security and admission
/// layers.
pub fn build_router(chute: &Chute, state: AppState) -> Result<Router> {
    let upstream = Upstream::new(&state.config.passthrough_base_url);
    let mut router = Router::new();
    for cord in chute.bind_remote(&upstream)? {
        let path = cord.endpoint().path().to_owned();
        info!("server: mounted {} -> {}", path, cord.endpoint().name());
        router = router.route(&path, post(routes::cord_call).with_state(Arc::new(cord)));
    }

    router = router
        .route("/_ping", post(routes::ping))
        .route(EXCHANGE_PATH, post(routes::exchange))
        .route("/_token", get(routes::token))
        .route("/_alive", get(routes::alive))
        .route("/_metrics", get(routes::metrics))
        .route("/_device_challenge", get(routes::device_challenge))
        .route("/_fs_challenge", post(routes::fs_challenge));
    if state.config.dev_tooling {
        router = router
            .route("/_procs", get(routes::procs))
            .route("/_slurp", get(routes::slurp));
    }

    Ok(router
        .layer(axum::middleware::from_fn_with_state(state.clone(), security::secure))
        .layer(axum::middleware::from_fn_with_state(state.clone(), admission::admit))
        .with_state(state))
}

/// Run startup hooks, bind `config.host:config.port` and serve until
/// SIGINT or SIGTERM.
pub async fn serve(chute: Chute, config: ServerConfig, session: SecureSession) -> anyhow::Result<()> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    serve_with_listener(listener, chute, config, session, shutdown_signal()).await
}

/// Like [`serve`], on an already bound listener and with a caller-chosen
/// shutdown trigger.  In-flight requests drain before the shutdown hooks
/// run.
pub async fn serve_with_listener(
    listener: TcpListener,
    chute: Chute,
    config: ServerConfig,
    session: SecureSession,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    chute
        .run_startup_hooks()
        .await
        .context("startup hook failed")?;
    let state = AppState::new(&chute, config, session);
    info!(
        "server: chute {} ({}) concurrency={} security={:?}",
        chute.name(),
        chute.uid(),
        state.admission.concurrency(),
        state.session.mode()
    );
    let router = build_router(&chute, state)?;
    info!("server: listening on http://{}", listener.local_addr()?);
    let served = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await;

    info!("server: stopped, running shutdown hooks");
    let hooks = chute.run_shutdown_hooks().await.context("shutdown hook failed");
    served?;
    hooks
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("server: failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("server: failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("server: received SIGINT, shutting down"),
        () = terminate => info!("server: received SIGTERM, shutting down"),
    }
}

// ── Tests ────────────────────────────────────────────────────
