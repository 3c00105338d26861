//! Load shedding: buffered and streamed responses against the slot pool.

use std::sync::Arc;

use futures_lite::StreamExt;
use parachute::config::PayloadSecurity;
use parachute::cord::Cord;
use parachute::error::Error;
use parachute::rpc::cipher::SymmetricKey;
use parachute::rpc::codec::NoKwargs;
use reqwest::StatusCode;
use tokio::sync::Semaphore;

use crate::harness::{Host, echo_chute, eventually, gated_gen_chute};

#[tokio::test]
async fn n_plus_one_unary_requests_shed_exactly_one() {
    const N: usize = 3;
    let host = Host::spawn(echo_chute(N), PayloadSecurity::Plain).await;

    let handles: Vec<_> = (0..=N)
        .map(|_| tokio::spawn(host.call("/slow", &(300u64,)).send()))
        .collect();
    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.unwrap().unwrap().status());
    }

    let ok = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let shed = statuses
        .iter()
        .filter(|s| **s == StatusCode::TOO_MANY_REQUESTS)
        .count();
    assert_eq!((ok, shed), (N, 1), "{statuses:?}");
    assert!(eventually(|| host.state.admission.in_flight() == 0).await);

    let stats = host.state.admission.stats();
    assert_eq!(stats.admitted_total, N as u64);
    assert_eq!(stats.rejected_total, 1);
}

#[tokio::test]
async fn exempt_paths_bypass_a_saturated_pool() {
    let host = Host::spawn(echo_chute(1), PayloadSecurity::Plain).await;
    let slow = tokio::spawn(host.call("/slow", &(300u64,)).send());
    assert!(eventually(|| host.state.admission.in_flight() == 1).await);

    let alive = host.get("/_alive").send().await.unwrap();
    assert_eq!(alive.status(), StatusCode::OK);
    let shed = host.call("/echo", &("x",)).send().await.unwrap();
    assert_eq!(shed.status(), StatusCode::TOO_MANY_REQUESTS);

    assert_eq!(slow.await.unwrap().unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn open_streams_hold_their_slots_until_drained() {
    const N: usize = 2;
    let gate = Arc::new(Semaphore::new(0));
    let host = Host::spawn(gated_gen_chute(N, Arc::clone(&gate)), PayloadSecurity::Plain).await;

    let mut streams = Vec::new();
    for _ in 0..N {
        let response = host.call("/gen", &()).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut chunks = response.bytes_stream();
        let first = chunks.next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b"a");
        streams.push(chunks);
    }
    // Both handlers have returned; their bodies are still open.
    assert_eq!(host.state.admission.in_flight(), N);

    let blocked = host.call("/gen", &()).send().await.unwrap();
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

    gate.add_permits(1);
    let mut rest = Vec::new();
    let mut drained = streams.remove(0);
    while let Some(chunk) = drained.next().await {
        rest.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(rest, b"bc");
    assert!(eventually(|| host.state.admission.in_flight() < N).await);

    let admitted = host.call("/gen", &()).send().await.unwrap();
    assert_eq!(admitted.status(), StatusCode::OK);
    assert_eq!(admitted.bytes().await.unwrap().as_ref(), b"abc");
}

#[tokio::test]
async fn abandoned_stream_does_not_leak_its_slot() {
    let gate = Arc::new(Semaphore::new(0));
    let host = Host::spawn(gated_gen_chute(1, Arc::clone(&gate)), PayloadSecurity::Plain).await;

    let response = host.call("/gen", &()).send().await.unwrap();
    let mut chunks = response.bytes_stream();
    assert_eq!(chunks.next().await.unwrap().unwrap().as_ref(), b"a");
    assert_eq!(host.state.admission.in_flight(), 1);

    // Client goes away mid-stream.
    drop(chunks);
    gate.add_permits(1);
    assert!(eventually(|| host.state.admission.in_flight() == 0).await);
}

/// One streaming cord, `concurrency = 1`, two callers through the
/// encrypted client.
#[tokio::test]
async fn second_caller_is_shed_until_first_stream_completes() {
    let gate = Arc::new(Semaphore::new(0));
    let chute = gated_gen_chute(1, Arc::clone(&gate));
    let host = Host::spawn(chute, PayloadSecurity::Symmetric).await;

    let key = SymmetricKey::generate();
    assert_eq!(host.exchange(&key).await.status(), StatusCode::OK);
    let client = Arc::new(host.client().with_session_key(key));
    let gen_endpoint = parachute::Endpoint::builder("gen").stream(true).build().unwrap();
    let gen_cord: Cord = client.bind(&host.deployment, gen_endpoint).unwrap();

    let mut a = gen_cord.stream(&(), &NoKwargs {}).await.unwrap();
    assert_eq!(a.next().await.unwrap().unwrap().as_ref(), b"a");

    let b = gen_cord.stream(&(), &NoKwargs {}).await;
    assert!(
        matches!(b, Err(Error::RemoteInvocation { status: 429, .. })),
        "{:?}",
        b.err()
    );

    gate.add_permits(1);
    let mut rest = Vec::new();
    while let Some(chunk) = a.next().await {
        rest.push(chunk.unwrap());
    }
    assert_eq!(rest, vec![&b"b"[..], &b"c"[..]]);
    assert!(eventually(|| host.state.admission.in_flight() == 0).await);

    let b: Vec<_> = gen_cord
        .stream(&(), &NoKwargs {})
        .await
        .unwrap()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    assert_eq!(b, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
}
