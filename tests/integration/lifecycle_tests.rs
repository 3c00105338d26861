//! Startup and shutdown hooks around a served deployment.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parachute::adapters::ed25519::Ed25519Signer;
use parachute::config::{PayloadSecurity, ServerConfig};
use parachute::ports::RequestSigner;
use parachute::server;
use reqwest::StatusCode;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::harness::{MINER, echo_chute};

#[tokio::test]
async fn hooks_bracket_the_serving_window() {
    let started = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicUsize::new(0));
    let mut chute = echo_chute(1);
    {
        let started = Arc::clone(&started);
        chute.on_startup(move || {
            let started = Arc::clone(&started);
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });
        let stopped = Arc::clone(&stopped);
        chute.on_shutdown(move || {
            let stopped = Arc::clone(&stopped);
            async move {
                stopped.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });
    }

    let signer = Ed25519Signer::generate();
    let config = ServerConfig {
        miner_identity: MINER.into(),
        validator_identity: signer.identity(),
        payload_security: PayloadSecurity::Plain,
        ..ServerConfig::default()
    };
    let session = server::secure_session(&config, None).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let served = tokio::spawn(server::serve_with_listener(
        listener,
        chute,
        config,
        session,
        async move {
            stop_rx.await.ok();
        },
    ));

    let alive = reqwest::get(format!("http://{addr}/_alive")).await.unwrap();
    assert_eq!(alive.status(), StatusCode::OK);
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(stopped.load(Ordering::SeqCst), 0);

    stop.send(()).unwrap();
    served.await.unwrap().unwrap();
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_shutdown_hook_is_reported() {
    let mut chute = echo_chute(1);
    chute.on_shutdown(|| async { Err::<(), _>(anyhow::anyhow!("flush failed")) });

    let signer = Ed25519Signer::generate();
    let config = ServerConfig {
        miner_identity: MINER.into(),
        validator_identity: signer.identity(),
        ..ServerConfig::default()
    };
    let session = server::secure_session(&config, None).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let err = server::serve_with_listener(listener, chute, config, session, async {})
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("flush failed"), "{err:#}");
}
