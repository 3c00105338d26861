//! Calling side: provisioning retries, error propagation and passthrough.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use futures_lite::StreamExt;
use parachute::adapters::ed25519::Ed25519Signer;
use parachute::config::PayloadSecurity;
use parachute::cord::{CordClient, Endpoint};
use parachute::error::Error;
use parachute::rpc::codec::{CallEnvelope, CallResult, NoKwargs};
use parachute::template;
use serde_json::{Value, json};

use crate::harness::{Host, echo_chute, stub};

fn client(addr: SocketAddr) -> Arc<CordClient> {
    Arc::new(
        CordClient::new(format!("http://{addr}"), "m", Arc::new(Ed25519Signer::generate()))
            .with_retry_interval(Duration::from_millis(20)),
    )
}

/// `/dep/len` answers 503 for the first `cold` attempts.
fn provisioning_stub(cold: usize, attempts: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/dep/len",
        post(move |body: axum::body::Bytes| {
            let attempts = Arc::clone(&attempts);
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < cold {
                    return (StatusCode::SERVICE_UNAVAILABLE, "still provisioning".to_owned());
                }
                let envelope: CallEnvelope = serde_json::from_slice(&body).unwrap();
                let (s,): (String,) = envelope.decode_args().unwrap();
                let reply = CallResult::encode(&s.len()).unwrap();
                (StatusCode::OK, serde_json::to_string(&reply).unwrap())
            }
        }),
    )
}

#[tokio::test]
async fn client_retries_while_provisioning() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let addr = stub(provisioning_stub(2, Arc::clone(&attempts))).await;
    let cord = client(addr)
        .bind("dep", Endpoint::builder("len").build().unwrap())
        .unwrap();

    let n: usize = cord.call(&("hello",), &NoKwargs {}).await.unwrap();
    assert_eq!(n, 5);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn provisioning_gives_up_at_the_endpoint_timeout() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let addr = stub(provisioning_stub(usize::MAX, Arc::clone(&attempts))).await;
    let endpoint = Endpoint::builder("len")
        .provision_timeout(Duration::from_millis(150))
        .build()
        .unwrap();
    let cord = client(addr).bind("dep", endpoint).unwrap();

    let err = cord.call::<_, _, usize>(&("x",), &NoKwargs {}).await.unwrap_err();
    match err {
        Error::ProvisioningTimeout { detail, .. } => assert_eq!(detail, "still provisioning"),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(attempts.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn remote_errors_are_not_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&attempts);
    let router = Router::new().route(
        "/dep/len",
        post(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }
        }),
    );
    let cord = client(stub(router).await)
        .bind("dep", Endpoint::builder("len").build().unwrap())
        .unwrap();

    let err = cord.call::<_, _, usize>(&("x",), &NoKwargs {}).await.unwrap_err();
    assert!(matches!(err, Error::RemoteInvocation { status: 500, ref body } if body == "boom"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_calls_a_live_host() {
    let host = Host::spawn(echo_chute(2), PayloadSecurity::Plain).await;
    let cords = echo_chute(2).connect(&Arc::new(host.client())).unwrap();

    let echoed: String = cords["echo"].call(&("over the wire",), &NoKwargs {}).await.unwrap();
    assert_eq!(echoed, "over the wire");
}

#[tokio::test]
async fn host_errors_surface_as_remote_invocation() {
    let host = Host::spawn(echo_chute(2), PayloadSecurity::Plain).await;
    let cords = echo_chute(2).connect(&Arc::new(host.client())).unwrap();

    // `/echo` wants a string; the cord fails to decode inside the host.
    let err = cords["echo"].call::<_, _, String>(&(42,), &NoKwargs {}).await.unwrap_err();
    match err {
        Error::RemoteInvocation { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("invalid payload"), "{body}");
        }
        other => panic!("expected remote invocation error, got {other:?}"),
    }
}

// ── Passthrough ──────────────────────────────────────────────

fn openai_stub() -> Router {
    Router::new()
        .route("/v1/models", get(|| async { axum::Json(json!({ "data": [{ "id": "m1" }] })) }))
        .route(
            "/v1/chat/completions",
            post(|axum::Json(req): axum::Json<Value>| async move {
                let reply = format!("data: {}\n\ndata: [DONE]\n\n", req["messages"][0]["content"]);
                ([("content-type", "text/event-stream")], reply)
            }),
        )
}

#[tokio::test]
async fn passthrough_cords_forward_to_the_sibling_server() {
    let upstream = stub(openai_stub()).await;
    let chute = template::openai_passthrough("tester", "llm", 2).unwrap();
    let host = Host::spawn_with(chute, |c| {
        c.payload_security = PayloadSecurity::Plain;
        c.passthrough_base_url = format!("http://{upstream}");
    })
    .await;
    let cords = template::openai_passthrough("tester", "llm", 2)
        .unwrap()
        .connect(&Arc::new(host.client()))
        .unwrap();

    let models: Value = cords["get_models"]
        .call_with(&(), &NoKwargs {}, |body| {
            serde_json::from_slice(&body).map_err(|e| Error::Config(e.to_string()))
        })
        .await
        .unwrap();
    assert_eq!(models["data"][0]["id"], "m1");

    let kwargs = json!({ "json": { "messages": [{ "role": "user", "content": "hi" }] } });
    let chunks: Vec<_> = cords["chat_stream"]
        .stream(&(), &kwargs)
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;
    let text = String::from_utf8(chunks.concat()).unwrap();
    assert!(text.starts_with("data: \"hi\""), "{text}");
    assert!(text.ends_with("data: [DONE]\n\n"));
}
