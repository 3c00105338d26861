//! Test host: a real listener on 127.0.0.1 with signed-request helpers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_lite::stream;
use parachute::adapters::ed25519::Ed25519Signer;
use parachute::adapters::soft_enclave::SoftEnclave;
use parachute::chute::Chute;
use parachute::config::{PayloadSecurity, ServerConfig};
use parachute::cord::{CordClient, Endpoint, Handler};
use parachute::ports::{RequestSigner, SecureEnclave};
use parachute::rpc::auth::{ENCRYPTED_HEADER, sign_request, unix_now};
use parachute::rpc::cipher::SymmetricKey;
use parachute::rpc::codec::{CallEnvelope, NoKwargs};
use parachute::rpc::legacy::EncryptedPart;
use parachute::server::{self, AppState};
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub const MINER: &str = "test-miner";
pub const SEED: u64 = 42;

pub struct Host {
    pub addr: SocketAddr,
    pub state: AppState,
    pub signer: Arc<Ed25519Signer>,
    pub enclave: Arc<SoftEnclave>,
    pub deployment: String,
    http: reqwest::Client,
    task: JoinHandle<()>,
}

impl Drop for Host {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Host {
    pub async fn spawn(chute: Chute, mode: PayloadSecurity) -> Self {
        Self::spawn_with(chute, |c| c.payload_security = mode).await
    }

    /// Serve `chute` both at its bare paths and nested under
    /// `/{uid}`, the layout a [`CordClient`] addresses.
    pub async fn spawn_with(chute: Chute, configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let signer = Arc::new(Ed25519Signer::generate());
        let enclave = Arc::new(SoftEnclave::new(SEED));
        let mut config = ServerConfig {
            miner_identity: MINER.into(),
            validator_identity: signer.identity(),
            dev_tooling: true,
            ..ServerConfig::default()
        };
        configure(&mut config);
        config.validate().unwrap();

        let session =
            server::secure_session(&config, Some(Arc::clone(&enclave) as Arc<dyn SecureEnclave>)).unwrap();
        chute.run_startup_hooks().await.unwrap();
        let state = AppState::new(&chute, config, session);
        let router = server::build_router(&chute, state.clone()).unwrap();
        let deployment = chute.uid().to_string();
        let app = Router::new()
            .nest(&format!("/{deployment}"), router.clone())
            .merge(router);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            signer,
            enclave,
            deployment,
            http: reqwest::Client::new(),
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http.get(self.url(path))
    }

    /// `method` request carrying `body`, signed with the validator key at
    /// `nonce`.
    pub fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Vec<u8>,
        nonce: u64,
    ) -> reqwest::RequestBuilder {
        let mut request = self.http.request(method, self.url(path));
        for (name, value) in sign_request(self.signer.as_ref(), MINER, nonce, &body) {
            request = request.header(name, value);
        }
        request.body(body)
    }

    /// POST `body` signed at `nonce`.
    pub fn signed_at(&self, path: &str, body: Vec<u8>, nonce: u64) -> reqwest::RequestBuilder {
        self.signed_request(reqwest::Method::POST, path, body, nonce)
    }

    pub fn signed(&self, path: &str, body: Vec<u8>) -> reqwest::RequestBuilder {
        self.signed_at(path, body, unix_now())
    }

    /// Signed, plaintext cord call.
    pub fn call<A: serde::Serialize>(&self, path: &str, args: &A) -> reqwest::RequestBuilder {
        let envelope = CallEnvelope::new(args, &NoKwargs {}).unwrap();
        self.signed(path, serde_json::to_vec(&envelope).unwrap())
    }

    /// Encrypt `value` the way a validator addresses this host's enclave.
    pub fn legacy_part(&self, value: &str) -> Value {
        let (ciphertext, iv) = self.enclave.encrypt(value.as_bytes(), 0);
        serde_json::to_value(EncryptedPart {
            ciphertext: BASE64.encode(ciphertext),
            iv: hex::encode(iv),
            length: value.len(),
            device_id: 0,
            seed: SEED,
        })
        .unwrap()
    }

    pub fn legacy_envelope(&self, parts: &[(&str, &str)]) -> Vec<u8> {
        let map: Map<String, Value> = parts
            .iter()
            .map(|(name, value)| ((*name).to_owned(), self.legacy_part(value)))
            .collect();
        serde_json::to_vec(&map).unwrap()
    }

    pub fn legacy(&self, path: &str, body: Vec<u8>) -> reqwest::RequestBuilder {
        self.signed(path, body).header(ENCRYPTED_HEADER, "true")
    }

    pub async fn exchange(&self, key: &SymmetricKey) -> reqwest::Response {
        let body = self.legacy_envelope(&[("symmetric_key", &key.to_hex())]);
        self.signed("/_exchange", body).send().await.unwrap()
    }

    /// Client addressing this host as the API, retrying quickly.
    pub fn client(&self) -> CordClient {
        CordClient::new(
            format!("http://{}", self.addr),
            MINER,
            Arc::clone(&self.signer) as Arc<dyn RequestSigner>,
        )
        .with_retry_interval(Duration::from_millis(20))
    }
}

/// Serve `router` on an ephemeral loopback port.
pub async fn stub(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

/// Sleep into the first half of a wall-clock second, so a nonce computed
/// now is still the server's current second when it arrives.
pub async fn align_to_second() {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    if nanos > 500_000_000 {
        tokio::time::sleep(Duration::from_nanos(u64::from(1_000_000_000 - nanos) + 10_000_000)).await;
    }
}

// ── Test deployments ─────────────────────────────────────────

/// `/echo` (unary, returns its argument) and `/slow` (unary, sleeps).
pub fn echo_chute(concurrency: usize) -> Chute {
    let mut chute = Chute::new("tester", "echo").with_concurrency(concurrency);
    chute
        .cord(
            Endpoint::builder("echo").build().unwrap(),
            Handler::unary(|(s,): (String,), _: NoKwargs| async move { Ok(s) }),
        )
        .unwrap()
        .cord(
            Endpoint::builder("slow").build().unwrap(),
            Handler::unary(|(ms,): (u64,), _: NoKwargs| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "slept": ms }))
            }),
        )
        .unwrap();
    chute
}

/// `/gen` streams `a`, then waits on `gate`, then `b` and `c`.
pub fn gated_gen_chute(concurrency: usize, gate: Arc<Semaphore>) -> Chute {
    let mut chute = Chute::new("tester", "gen").with_concurrency(concurrency);
    chute
        .cord(
            Endpoint::builder("gen").stream(true).build().unwrap(),
            Handler::streaming(move |(): (), _: NoKwargs| {
                let gate = Arc::clone(&gate);
                stream::unfold(0u8, move |step| {
                    let gate = Arc::clone(&gate);
                    async move {
                        let chunk = match step {
                            0 => "a",
                            1 => {
                                let _open = gate.acquire().await.ok()?;
                                "b"
                            }
                            2 => "c",
                            _ => return None,
                        };
                        Some((Ok::<_, anyhow::Error>(bytes::Bytes::from_static(chunk.as_bytes())), step + 1))
                    }
                })
            }),
        )
        .unwrap();
    chute
}

/// Poll until `f` holds or two seconds pass.
pub async fn eventually(mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    f()
}
