//! Signed headers, replay window, payload modes and exempt paths over HTTP.

use parachute::config::PayloadSecurity;
use parachute::rpc::auth::unix_now;
use parachute::rpc::cipher::{ResponseCipher, SymmetricKey, random_iv, seal_frame};
use parachute::rpc::codec::{CallEnvelope, CallResult, NoKwargs, encode};
use parachute::ports::SecureEnclave;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::harness::{Host, align_to_second, echo_chute, stub};

async fn detail(response: reqwest::Response) -> String {
    let body: Value = response.json().await.unwrap();
    body["detail"].as_str().unwrap_or_default().to_owned()
}

// ── Authentication ───────────────────────────────────────────

#[tokio::test]
async fn replay_window_edges_over_http() {
    let host = Host::spawn(echo_chute(4), PayloadSecurity::Plain).await;

    align_to_second().await;
    let now = unix_now();
    let stale = host.signed_at("/_ping", b"hi".to_vec(), now - 30).send().await.unwrap();
    assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(detail(stale).await, "go away (missing)");

    align_to_second().await;
    let now = unix_now();
    let edge = host.signed_at("/_ping", b"hi".to_vec(), now - 29).send().await.unwrap();
    assert_eq!(edge.status(), StatusCode::OK);
    assert_eq!(edge.bytes().await.unwrap().as_ref(), b"hi");

    let future = host.signed_at("/_ping", b"hi".to_vec(), unix_now() + 60).send().await.unwrap();
    assert_eq!(future.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unsigned_and_forged_requests_are_rejected() {
    let host = Host::spawn(echo_chute(4), PayloadSecurity::Plain).await;

    let unsigned = reqwest::Client::new()
        .post(host.url("/_ping"))
        .body("hi")
        .send()
        .await
        .unwrap();
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(detail(unsigned).await, "go away (missing)");

    let forged = host
        .signed("/_ping", b"hi".to_vec())
        .header("X-Chutes-Signature", "00".repeat(64))
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(detail(forged).await, "go away (sig)");
}

#[tokio::test]
async fn tampered_body_fails_signature() {
    let host = Host::spawn(echo_chute(4), PayloadSecurity::Plain).await;
    let mut request = host.signed("/_ping", b"original".to_vec()).build().unwrap();
    *request.body_mut() = Some("tampered".into());
    let response = reqwest::Client::new().execute(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ── Exempt paths ─────────────────────────────────────────────

#[tokio::test]
async fn exempt_paths_skip_authentication() {
    let host = Host::spawn(echo_chute(1), PayloadSecurity::Symmetric).await;

    let alive = host.get("/_alive").send().await.unwrap();
    assert_eq!(alive.status(), StatusCode::OK);
    assert_eq!(alive.json::<Value>().await.unwrap(), json!({ "alive": true }));

    let metrics = host.get("/_metrics").send().await.unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
    let text = metrics.text().await.unwrap();
    assert!(text.contains("# TYPE parachute_in_flight gauge"));
    assert!(text.contains("parachute_concurrency{chute=\"echo\"} 1"));
    assert!(text.contains("parachute_session_established{chute=\"echo\"} 0"));

    let challenge = host
        .get("/_device_challenge?challenge=abc")
        .send()
        .await
        .unwrap();
    assert_eq!(challenge.status(), StatusCode::OK);
    assert_eq!(
        challenge.text().await.unwrap(),
        host.enclave.device_info_challenge("abc").unwrap()
    );

    let procs = host.get("/_procs").send().await.unwrap();
    assert_eq!(procs.status(), StatusCode::OK);
}

#[tokio::test]
async fn fs_challenge_hashes_the_requested_range() {
    let host = Host::spawn(echo_chute(1), PayloadSecurity::Symmetric).await;
    let path = std::env::temp_dir().join(format!("parachute-fs-http-{}", std::process::id()));
    std::fs::write(&path, b"abcdefghij").unwrap();
    let filename = path.display().to_string();

    let response = reqwest::Client::new()
        .post(host.url("/_fs_challenge"))
        .json(&json!({ "filename": filename, "offset": 3, "length": 4 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.text().await.unwrap(),
        host.enclave.filesystem_challenge(&filename, 3, 4).unwrap()
    );

    let missing = reqwest::Client::new()
        .post(host.url("/_fs_challenge"))
        .json(&json!({ "filename": "/no/such/file", "offset": 0, "length": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::INTERNAL_SERVER_ERROR);
    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn dev_tooling_routes_are_opt_in() {
    let host = Host::spawn_with(echo_chute(1), |c| c.dev_tooling = false).await;
    let procs = host.get("/_procs").send().await.unwrap();
    assert_eq!(procs.status(), StatusCode::NOT_FOUND);
}

// ── Symmetric session ────────────────────────────────────────

#[tokio::test]
async fn requests_before_exchange_need_upgrade() {
    let host = Host::spawn(echo_chute(4), PayloadSecurity::Symmetric).await;
    let response = host.call("/echo", &("hi",)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
}

#[tokio::test]
async fn exchange_then_encrypted_call() {
    let host = Host::spawn(echo_chute(4), PayloadSecurity::Symmetric).await;
    let key = SymmetricKey::generate();

    let exchanged = host.exchange(&key).await;
    assert_eq!(exchanged.status(), StatusCode::OK);
    assert_eq!(exchanged.json::<Value>().await.unwrap(), json!({ "ok": true }));
    assert!(host.state.session.is_established());

    let again = host.exchange(&SymmetricKey::generate()).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    // The exact request that got 426 before now succeeds once encrypted.
    let iv = random_iv();
    let envelope = CallEnvelope::new(&("secret",), &NoKwargs {}).unwrap();
    let body = seal_frame(&key, &iv, &serde_json::to_vec(&envelope).unwrap());
    let response = host.signed("/echo", body).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let sealed = response.bytes().await.unwrap();
    let plain = ResponseCipher::new(key.clone(), iv).open(&sealed).unwrap();
    let reply: CallResult = serde_json::from_slice(&plain).unwrap();
    assert_eq!(reply.decode::<String>().unwrap(), "secret");

    // `/_ping` echoes what the handler saw, i.e. the decrypted body.
    let iv = random_iv();
    let response = host
        .signed("/_ping", seal_frame(&key, &iv, b"plaintext"))
        .send()
        .await
        .unwrap();
    let sealed = response.bytes().await.unwrap();
    assert_eq!(ResponseCipher::new(key, iv).open(&sealed).unwrap(), b"plaintext");
}

#[tokio::test]
async fn malformed_frames_are_bad_requests() {
    let host = Host::spawn(echo_chute(4), PayloadSecurity::Symmetric).await;
    host.exchange(&SymmetricKey::generate()).await;

    let response = host.signed("/echo", b"not-a-frame".to_vec()).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn exchange_with_bad_key_is_rejected() {
    let host = Host::spawn(echo_chute(4), PayloadSecurity::Symmetric).await;
    let body = host.legacy_envelope(&[("symmetric_key", "abcd")]);
    let response = host.signed("/_exchange", body).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!host.state.session.is_established());
}

// ── Legacy envelope ──────────────────────────────────────────

#[tokio::test]
async fn legacy_envelope_is_decrypted_for_the_handler() {
    let host = Host::spawn(echo_chute(4), PayloadSecurity::Asymmetric).await;
    let args = encode(&("legacy",)).unwrap();
    let kwargs = encode(&NoKwargs {}).unwrap();
    let body = host.legacy_envelope(&[("args", &args), ("kwargs", &kwargs)]);

    let response = host.legacy("/echo", body).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let reply: CallResult = response.json().await.unwrap();
    assert_eq!(reply.decode::<String>().unwrap(), "legacy");
}

#[tokio::test]
async fn legacy_envelope_errors_map_to_statuses() {
    let host = Host::spawn(echo_chute(4), PayloadSecurity::Asymmetric).await;

    let mut part = host.legacy_part("x");
    part.as_object_mut().unwrap().remove("seed");
    let missing = serde_json::to_vec(&json!({ "args": part })).unwrap();
    let response = host.legacy("/echo", missing).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        detail(response).await,
        "Missing one or more required fields for encrypted payloads!"
    );

    let mut part = host.legacy_part("x");
    part["seed"] = json!(7);
    let wrong_seed = serde_json::to_vec(&json!({ "args": part })).unwrap();
    let response = host.legacy("/echo", wrong_seed).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut part = host.legacy_part("x");
    part["length"] = json!(99);
    let undecryptable = serde_json::to_vec(&json!({ "args": part })).unwrap();
    let response = host.legacy("/echo", undecryptable).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(detail(response).await.starts_with("Decryption failed"));
}

#[tokio::test]
async fn unflagged_requests_pass_through_in_asymmetric_mode() {
    let host = Host::spawn(echo_chute(4), PayloadSecurity::Asymmetric).await;
    let response = host.call("/echo", &("clear",)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ── Token fetch ──────────────────────────────────────────────

fn token_stub() -> axum::Router {
    axum::Router::new()
        .route("/token_check", axum::routing::get(|| async { axum::Json(json!({ "token": "default" })) }))
        .route("/other", axum::routing::get(|| async { axum::Json(json!({ "token": "named" })) }))
}

#[tokio::test]
async fn token_is_fetched_from_the_configured_endpoint() {
    let upstream = stub(token_stub()).await;
    let host = Host::spawn_with(echo_chute(1), |c| {
        c.payload_security = PayloadSecurity::Plain;
        c.token_check_url = format!("http://{upstream}/token_check");
    })
    .await;

    let response = host
        .signed_request(reqwest::Method::GET, "/_token", Vec::new(), unix_now())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({ "token": "default" }));

    let body = serde_json::to_vec(&json!({ "endpoint": format!("http://{upstream}/other") })).unwrap();
    let named = host
        .signed_request(reqwest::Method::GET, "/_token", body, unix_now())
        .send()
        .await
        .unwrap();
    assert_eq!(named.json::<Value>().await.unwrap(), json!({ "token": "named" }));
}

#[tokio::test]
async fn token_requires_a_signature_and_a_reachable_endpoint() {
    let host = Host::spawn_with(echo_chute(1), |c| {
        c.payload_security = PayloadSecurity::Plain;
        c.token_check_url = "http://127.0.0.1:9/token_check".into();
    })
    .await;

    let unsigned = host.get("/_token").send().await.unwrap();
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

    let unreachable = host
        .signed_request(reqwest::Method::GET, "/_token", Vec::new(), unix_now())
        .send()
        .await
        .unwrap();
    assert_eq!(unreachable.status(), StatusCode::BAD_GATEWAY);
}
