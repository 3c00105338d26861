//! Local-mode strategies: calling a deployment over the network.
//!
//! ```text
//!   envelope ─▶ [seal] ─▶ sign ─▶ POST {api}/{deployment}{path}
//!                                   │  503 → sleep, re-sign, retry
//!                                   │  !2xx → RemoteInvocation
//!                                   ▼
//!                         [open] ◀─ body / chunk stream
//! ```
//!
//! Each attempt is signed afresh so a long provisioning wait never sends
//! a nonce outside the host's replay window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures_lite::{StreamExt, stream};
use log::{debug, info};

use super::{Binding, Cord, Endpoint, Invocation, Invoke, StreamReply, UnaryReply};
use crate::adapters::ed25519::Ed25519Signer;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::ports::RequestSigner;
use crate::rpc::auth::{sign_request, unix_now};
use crate::rpc::cipher::{ResponseCipher, SymmetricKey, random_iv, seal_frame};
use crate::rpc::codec::CallEnvelope;
use crate::rpc::retry::{DEFAULT_INTERVAL, DispatchOutcome, RetryError, RetryPolicy};
use crate::rpc::stream::{ChunkStream, FrameReassembler};

// ── Client ───────────────────────────────────────────────────

/// Connection to the API deployments are reached through.
pub struct CordClient {
    http: reqwest::Client,
    api_base_url: String,
    miner: String,
    signer: Arc<dyn RequestSigner>,
    retry_interval: Duration,
    provision_timeout: Duration,
    session_key: Option<SymmetricKey>,
}

/// Default time a caller keeps retrying a provisioning deployment.
pub const DEFAULT_PROVISION_TIMEOUT: Duration = Duration::from_secs(180);

impl CordClient {
    pub fn new(
        api_base_url: impl Into<String>,
        miner: impl Into<String>,
        signer: Arc<dyn RequestSigner>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_owned(),
            miner: miner.into(),
            signer,
            retry_interval: DEFAULT_INTERVAL,
            provision_timeout: DEFAULT_PROVISION_TIMEOUT,
            session_key: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let signer = Ed25519Signer::from_hex(&config.signing_key)?;
        Ok(Self::new(&config.api_base_url, &config.miner_identity, Arc::new(signer))
            .with_retry_interval(Duration::from_millis(config.retry_interval_ms))
            .with_provision_timeout(Duration::from_secs(config.default_provision_timeout_secs)))
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Retry deadline for endpoints that do not set their own.
    pub fn with_provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = timeout;
        self
    }

    /// Encrypt request bodies and decrypt replies with an exchanged key.
    pub fn with_session_key(mut self, key: SymmetricKey) -> Self {
        self.session_key = Some(key);
        self
    }

    pub fn session_key(&self) -> Option<&SymmetricKey> {
        self.session_key.as_ref()
    }

    /// Bind `endpoint` of `deployment_id` for calling from here.
    pub fn bind(self: &Arc<Self>, deployment_id: impl Into<String>, endpoint: Endpoint) -> Result<Cord> {
        Cord::bind(
            endpoint,
            Binding::Local {
                client: Arc::clone(self),
                deployment_id: deployment_id.into(),
            },
        )
    }

    fn url(&self, deployment_id: &str, path: &str) -> String {
        format!("{}/{}{}", self.api_base_url, deployment_id, path)
    }

    /// Send the envelope, retrying while the deployment provisions.
    async fn dispatch(
        &self,
        deployment_id: &str,
        endpoint: &Endpoint,
        envelope: &CallEnvelope,
    ) -> Result<(reqwest::Response, Option<ResponseCipher>)> {
        let plain = serde_json::to_vec(envelope).map_err(crate::rpc::codec::CodecError::from)?;
        let (body, cipher) = match &self.session_key {
            Some(key) => {
                let iv = random_iv();
                (seal_frame(key, &iv, &plain), Some(ResponseCipher::new(key.clone(), iv)))
            }
            None => (plain, None),
        };
        let body = Bytes::from(body);
        let url = self.url(deployment_id, endpoint.path());
        let deadline = endpoint.provision_timeout().unwrap_or(self.provision_timeout);
        let policy = RetryPolicy::new(self.retry_interval, deadline);

        let response = policy
            .run(|| self.attempt(&url, body.clone()))
            .await
            .map_err(|e| match e {
                RetryError::Failed(e) => e,
                RetryError::Timeout { elapsed, detail } => Error::ProvisioningTimeout { elapsed, detail },
            })?;
        Ok((response, cipher))
    }

    async fn attempt(&self, url: &str, body: Bytes) -> DispatchOutcome<reqwest::Response, Error> {
        let mut request = self.http.post(url).header("content-type", "application/json");
        for (name, value) in sign_request(self.signer.as_ref(), &self.miner, unix_now(), &body) {
            request = request.header(name, value);
        }
        let response = match request.body(body).send().await {
            Ok(r) => r,
            Err(e) => return DispatchOutcome::Failed(Error::Transport(e)),
        };
        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            let detail = response.text().await.unwrap_or_default();
            debug!("cord: {url} still provisioning: {detail}");
            return DispatchOutcome::StillProvisioning(detail);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            info!("cord: {url} failed [status={}]", status.as_u16());
            return DispatchOutcome::Failed(Error::RemoteInvocation {
                status: status.as_u16(),
                body,
            });
        }
        DispatchOutcome::Ready(response)
    }
}

// ── Strategies ───────────────────────────────────────────────

pub struct LocalUnary {
    client: Arc<CordClient>,
    deployment_id: String,
    endpoint: Arc<Endpoint>,
}

impl LocalUnary {
    pub(super) fn new(client: Arc<CordClient>, deployment_id: String, endpoint: Arc<Endpoint>) -> Self {
        Self {
            client,
            deployment_id,
            endpoint,
        }
    }
}

#[async_trait]
impl Invoke for LocalUnary {
    async fn invoke(&self, envelope: CallEnvelope) -> Result<Invocation> {
        let (response, cipher) = self
            .client
            .dispatch(&self.deployment_id, &self.endpoint, &envelope)
            .await?;
        let status = response.status();
        let content_type = super::remote::content_type(&response);
        let raw = response.bytes().await?;
        let body = match cipher {
            Some(cipher) => Bytes::from(cipher.open(&raw)?),
            None => raw,
        };
        Ok(Invocation::Unary(UnaryReply {
            status,
            content_type,
            body,
        }))
    }
}

pub struct LocalStreaming {
    client: Arc<CordClient>,
    deployment_id: String,
    endpoint: Arc<Endpoint>,
}

impl LocalStreaming {
    pub(super) fn new(client: Arc<CordClient>, deployment_id: String, endpoint: Arc<Endpoint>) -> Self {
        Self {
            client,
            deployment_id,
            endpoint,
        }
    }
}

#[async_trait]
impl Invoke for LocalStreaming {
    async fn invoke(&self, envelope: CallEnvelope) -> Result<Invocation> {
        let (response, cipher) = self
            .client
            .dispatch(&self.deployment_id, &self.endpoint, &envelope)
            .await?;
        let status = response.status();
        let content_type = super::remote::content_type(&response);
        let raw = response.bytes_stream().map(|c| c.map_err(Error::Transport)).boxed();
        let chunks = match cipher {
            Some(cipher) => open_frames(raw, cipher),
            None => raw,
        };
        Ok(Invocation::Stream(StreamReply {
            status,
            content_type,
            chunks,
        }))
    }
}

/// Decrypt a newline-framed encrypted stream, one plaintext chunk per frame.
fn open_frames(raw: ChunkStream<Error>, cipher: ResponseCipher) -> ChunkStream<Error> {
    struct State {
        raw: ChunkStream<Error>,
        frames: FrameReassembler,
        ready: std::collections::VecDeque<Vec<u8>>,
        cipher: ResponseCipher,
        done: bool,
    }

    let state = State {
        raw,
        frames: FrameReassembler::new(),
        ready: std::collections::VecDeque::new(),
        cipher,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.ready.pop_front() {
                let item = st.cipher.open(&frame).map(Bytes::from).map_err(Error::from);
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.raw.next().await {
                Some(Ok(chunk)) => st.ready.extend(st.frames.feed(&chunk)),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.done = true;
                    let tail = std::mem::take(&mut st.frames).finish();
                    st.ready.extend(tail);
                }
            }
        }
    })
    .boxed()
}

// ── Tests ────────────────────────────────────────────────────
