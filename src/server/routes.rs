//! Route handlers: mounted cords and the built-in endpoints.

use std::io::SeekFrom;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{AppState, Rejection, Streaming};
use crate::config::PayloadSecurity;
use crate::cord::{Cord, Invocation};
use crate::ports::{EnclaveError, SecureEnclave};
use crate::rpc::cipher::SymmetricKey;
use crate::rpc::codec::CallEnvelope;
use crate::rpc::legacy;
use crate::rpc::session::ExchangeOutcome;

/// Upper bound on a single `/_slurp` read.
pub const MAX_SLURP_BYTES: u64 = 16 * 1024 * 1024;

// ── Cords ────────────────────────────────────────────────────

/// Execute one mounted cord.  The body is the (already decrypted)
/// `{"args": .., "kwargs": ..}` envelope.
pub async fn cord_call(State(cord): State<Arc<Cord>>, body: Bytes) -> Result<Response, Rejection> {
    let envelope: CallEnvelope = serde_json::from_slice(&body)
        .map_err(|e| Rejection::BadRequest(format!("invalid call envelope: {e}")))?;

    let response = match cord.invoke(envelope).await? {
        Invocation::Unary(reply) => {
            let mut response = (reply.status, reply.body).into_response();
            set_content_type(&mut response, reply.content_type.as_deref());
            response
        }
        Invocation::Stream(reply) => {
            let mut response = (reply.status, Body::from_stream(reply.chunks)).into_response();
            set_content_type(&mut response, reply.content_type.as_deref());
            response.extensions_mut().insert(Streaming);
            response
        }
    };
    Ok(response)
}

fn set_content_type(response: &mut Response, content_type: Option<&str>) {
    if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(ct).ok()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
}

// ── Session ──────────────────────────────────────────────────

/// Echo of the request body as the handler saw it.
pub async fn ping(body: Bytes) -> Bytes {
    body
}

pub async fn exchange(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, Rejection> {
    if state.session.mode() != PayloadSecurity::Symmetric {
        return Err(Rejection::BadRequest(
            "key exchange is only available in symmetric mode".into(),
        ));
    }
    let enclave = enclave(&state)?;
    let decrypted = legacy::decrypt_body(enclave, &body)?;
    let key_hex = decrypted
        .get("symmetric_key")
        .and_then(Value::as_str)
        .ok_or_else(|| Rejection::BadRequest("missing symmetric_key".into()))?;
    let key = SymmetricKey::from_hex(key_hex).map_err(|e| Rejection::BadRequest(e.to_string()))?;

    match state.session.establish(key) {
        ExchangeOutcome::Established => Ok(Json(json!({ "ok": true }))),
        ExchangeOutcome::AlreadyEstablished => {
            warn!("exchange: rejected second key exchange");
            Err(Rejection::Conflict("session key already exchanged"))
        }
    }
}

/// Fetch a token through this host's own egress and return it.
///
/// The (decrypted) body may name `{"endpoint": url}`; otherwise the
/// configured token check URL is used.  Lets the caller spot a proxy
/// between itself and the real deployment.
pub async fn token(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, Rejection> {
    let endpoint = if body.is_empty() {
        None
    } else {
        let request: Value = serde_json::from_slice(&body)
            .map_err(|e| Rejection::BadRequest(format!("invalid token request: {e}")))?;
        request
            .get("endpoint")
            .and_then(Value::as_str)
            .map(str::to_owned)
    };
    let endpoint = endpoint.unwrap_or_else(|| state.config.token_check_url.clone());

    info!("token: fetching {endpoint}");
    let response = state
        .http
        .get(&endpoint)
        .send()
        .await
        .map_err(|e| Rejection::BadGateway(e.to_string()))?;
    let token = response
        .json::<Value>()
        .await
        .map_err(|e| Rejection::BadGateway(format!("token endpoint returned no JSON: {e}")))?;
    Ok(Json(token))
}

fn enclave(state: &AppState) -> Result<&dyn SecureEnclave, Rejection> {
    state
        .session
        .enclave()
        .ok_or_else(|| Rejection::Internal("no secure enclave configured".into()))
}

// ── Diagnostics ──────────────────────────────────────────────

pub async fn alive() -> Json<Value> {
    Json(json!({ "alive": true }))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let stats = state.admission.stats();
    let chute = &state.chute_name;
    let text = format!(
        "# HELP parachute_concurrency Configured concurrent request bound\n\
         # TYPE parachute_concurrency gauge\n\
         parachute_concurrency{{chute=\"{}\"}} {}\n\
         # HELP parachute_in_flight Requests currently holding an admission slot\n\
         # TYPE parachute_in_flight gauge\n\
         parachute_in_flight{{chute=\"{}\"}} {}\n\
         # HELP parachute_admitted_total Requests admitted\n\
         # TYPE parachute_admitted_total counter\n\
         parachute_admitted_total{{chute=\"{}\"}} {}\n\
         # HELP parachute_rejected_total Requests shed with 429\n\
         # TYPE parachute_rejected_total counter\n\
         parachute_rejected_total{{chute=\"{}\"}} {}\n\
         # HELP parachute_session_established Whether a session key has been exchanged\n\
         # TYPE parachute_session_established gauge\n\
         parachute_session_established{{chute=\"{}\"}} {}\n\
         # HELP parachute_uptime_seconds Process uptime in seconds\n\
         # TYPE parachute_uptime_seconds counter\n\
         parachute_uptime_seconds{{chute=\"{}\"}} {}\n",
        chute,
        stats.concurrency,
        chute,
        stats.in_flight,
        chute,
        stats.admitted_total,
        chute,
        stats.rejected_total,
        chute,
        u8::from(state.session.is_established()),
        chute,
        state.started.elapsed().as_secs(),
    );
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        text,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct DeviceChallenge {
    pub challenge: String,
}

pub async fn device_challenge(
    State(state): State<AppState>,
    Query(query): Query<DeviceChallenge>,
) -> Result<String, Rejection> {
    on_enclave(&state, move |enclave| enclave.device_info_challenge(&query.challenge)).await
}

#[derive(Debug, Deserialize)]
pub struct FsChallenge {
    pub filename: String,
    pub offset: u64,
    pub length: u64,
}

pub async fn fs_challenge(
    State(state): State<AppState>,
    Json(challenge): Json<FsChallenge>,
) -> Result<String, Rejection> {
    on_enclave(&state, move |enclave| {
        enclave.filesystem_challenge(&challenge.filename, challenge.offset, challenge.length)
    })
    .await
}

/// Run an enclave call on the blocking pool; adapters may touch disk or
/// hardware.
async fn on_enclave<F>(state: &AppState, f: F) -> Result<String, Rejection>
where
    F: FnOnce(&dyn SecureEnclave) -> Result<String, EnclaveError> + Send + 'static,
{
    let enclave = state
        .session
        .enclave_handle()
        .ok_or_else(|| Rejection::Internal("no secure enclave configured".into()))?;
    tokio::task::spawn_blocking(move || f(enclave.as_ref()))
        .await
        .map_err(|e| Rejection::Internal(e.to_string()))?
        .map_err(|e| Rejection::Internal(e.to_string()))
}

// ── Dev tooling ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub cmdline: String,
}

pub async fn procs() -> Result<Json<Vec<ProcessInfo>>, Rejection> {
    tokio::task::spawn_blocking(list_processes)
        .await
        .map(Json)
        .map_err(|e| Rejection::Internal(e.to_string()))
}

fn list_processes() -> Vec<ProcessInfo> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    let mut procs: Vec<ProcessInfo> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let pid = entry.file_name().to_str()?.parse::<u32>().ok()?;
            let raw = std::fs::read(entry.path().join("cmdline")).ok()?;
            let cmdline = raw
                .split(|&b| b == 0)
                .filter(|arg| !arg.is_empty())
                .map(String::from_utf8_lossy)
                .collect::<Vec<_>>()
                .join(" ");
            Some(ProcessInfo { pid, cmdline })
        })
        .collect();
    procs.sort_by_key(|p| p.pid);
    procs
}

#[derive(Debug, Deserialize)]
pub struct SlurpQuery {
    pub path: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// Read `[start, end)` of a file, base64 encoded.
pub async fn slurp(Query(query): Query<SlurpQuery>) -> Result<Json<Value>, Rejection> {
    let start = query.start.unwrap_or(0);
    if query.end.is_some_and(|end| end < start) {
        return Err(Rejection::BadRequest("end precedes start".into()));
    }
    let want = query
        .end
        .map_or(MAX_SLURP_BYTES, |end| end - start)
        .min(MAX_SLURP_BYTES);

    let mut file = tokio::fs::File::open(&query.path)
        .await
        .map_err(|e| Rejection::BadRequest(format!("{}: {e}", query.path)))?;
    file.seek(SeekFrom::Start(start))
        .await
        .map_err(|e| Rejection::Internal(e.to_string()))?;
    let mut contents = Vec::new();
    file.take(want)
        .read_to_end(&mut contents)
        .await
        .map_err(|e| Rejection::Internal(e.to_string()))?;

    info!("slurp: {} bytes from {} @ {}", contents.len(), query.path, start);
    Ok(Json(json!({
        "path": query.path,
        "start": start,
        "length": contents.len(),
        "contents": BASE64.encode(&contents),
    })))
}

// ── Tests ────────────────────────────────────────────────────
