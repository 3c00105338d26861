//! Security middleware.
//!
//! ```text
//!   request ─▶ loopback trust? ─▶ exempt path? ─▶ verify headers ─▶ payload mode
//!                                   │ internal-only and public caller → 401
//!                                   └─▶ handler (untouched)
//!
//!   payload mode:
//!     plain       body as received
//!     asymmetric  X-Chutes-Encrypted: true → enclave-decrypted JSON map
//!     symmetric   /_exchange raw, otherwise 426 until keyed, then AES-CBC
//! ```
//!
//! Successful symmetric responses are sealed with the request's key and IV
//! on the way out.

use std::net::{IpAddr, SocketAddr};

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_lite::StreamExt;
use log::{debug, warn};

use super::{AppState, EXCHANGE_PATH, Rejection, Streaming, is_exempt, is_internal_address, is_internal_only};
use crate::config::PayloadSecurity;
use crate::rpc::auth::{
    AuthHeaders, ENCRYPTED_HEADER, MINER_HEADER, NONCE_HEADER, SIGNATURE_HEADER, VALIDATOR_HEADER,
    unix_now,
};
use crate::rpc::cipher::{ResponseCipher, open_frame};
use crate::rpc::legacy;

/// Largest request body read into memory.
pub const MAX_REQUEST_BYTES: usize = 32 * 1024 * 1024;

pub async fn secure(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match guard(&state, request, next).await {
        Ok(response) => response,
        Err(rejection) => rejection.into_response(),
    }
}

async fn guard(state: &AppState, request: Request, next: Next) -> Result<Response, Rejection> {
    let peer = peer_ip(&request);
    let path = request.uri().path().to_owned();

    if state.config.trust_loopback && peer.is_some_and(|ip| ip.is_loopback()) {
        debug!("security: trusting loopback caller on {path}");
        return Ok(next.run(request).await);
    }

    if is_exempt(&path) {
        if is_internal_only(&path) && !peer.is_some_and(is_internal_address) {
            warn!("security: public caller {peer:?} on internal path {path}");
            return Err(Rejection::Unauthorized("go away (internal)"));
        }
        return Ok(next.run(request).await);
    }

    let (mut parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_REQUEST_BYTES).await.map_err(|e| {
        warn!("security: failed to read body on {path}: {e}");
        Rejection::PayloadTooLarge
    })?;

    state
        .session
        .auth()
        .verify(&auth_headers(&parts.headers), &body, unix_now())
        .map_err(|failure| Rejection::Unauthorized(failure.public_detail()))?;

    let (body, cipher) = match state.session.mode() {
        PayloadSecurity::Plain => (body, None),
        PayloadSecurity::Asymmetric => (open_legacy(state, &parts.headers, body)?, None),
        PayloadSecurity::Symmetric => open_symmetric(state, &path, body)?,
    };

    parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    match cipher {
        Some(cipher) if response.status().is_success() => seal_response(response, cipher).await,
        _ => Ok(response),
    }
}

fn peer_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn auth_headers(headers: &HeaderMap) -> AuthHeaders {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    AuthHeaders {
        miner: get(MINER_HEADER),
        validator: get(VALIDATOR_HEADER),
        nonce: get(NONCE_HEADER),
        signature: get(SIGNATURE_HEADER),
    }
}

// ── Payload modes ────────────────────────────────────────────

fn open_legacy(state: &AppState, headers: &HeaderMap, body: Bytes) -> Result<Bytes, Rejection> {
    let flagged = headers
        .get(ENCRYPTED_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    if !flagged {
        return Ok(body);
    }
    let enclave = state
        .session
        .enclave()
        .ok_or_else(|| Rejection::Internal("no secure enclave configured".into()))?;
    let decrypted = legacy::decrypt_body(enclave, &body)?;
    serde_json::to_vec(&decrypted)
        .map(Bytes::from)
        .map_err(|e| Rejection::Internal(e.to_string()))
}

fn open_symmetric(
    state: &AppState,
    path: &str,
    body: Bytes,
) -> Result<(Bytes, Option<ResponseCipher>), Rejection> {
    if path == EXCHANGE_PATH {
        return Ok((body, None));
    }
    let Some(key) = state.session.symmetric_key() else {
        return Err(Rejection::UpgradeRequired);
    };
    if body.is_empty() {
        return Ok((body, None));
    }
    let (iv, plaintext) = open_frame(key, &body)?;
    Ok((Bytes::from(plaintext), Some(ResponseCipher::new(key.clone(), iv))))
}

// ── Responses ────────────────────────────────────────────────

async fn seal_response(response: Response, cipher: ResponseCipher) -> Result<Response, Rejection> {
    if response.extensions().get::<Streaming>().is_some() {
        return Ok(response.map(|body| {
            Body::from_stream(
                body.into_data_stream()
                    .map(move |chunk| chunk.map(|c| Bytes::from(cipher.seal_chunk(&c)))),
            )
        }));
    }

    let (mut parts, body) = response.into_parts();
    let plain = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| Rejection::Internal(format!("failed to buffer response: {e}")))?;
    let sealed = cipher.seal(&plain);
    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    Ok(Response::from_parts(parts, Body::from(sealed)))
}
