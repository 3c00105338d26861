//! Cords — functions exposed by a deployment and callable across the wire.
//!
//! A [`Cord`] pairs an immutable [`Endpoint`] with a dispatch strategy
//! chosen once, at bind time:
//!
//! ```text
//!                    ┌──────────────── Unary ───────────┬──── Streaming ─────┐
//!   Local  (caller)  │ LocalUnary  POST + retry + body  │ LocalStreaming      │
//!   Remote (host)    │ RemoteUnary embedded/passthrough │ RemoteStreaming     │
//!                    └──────────────────────────────────┴────────────────────┘
//! ```
//!
//! Every strategy implements [`Invoke`].  The typed helpers on [`Cord`]
//! (`call`, `call_with`, `stream`, `stream_with`) encode arguments, invoke,
//! and decode the reply.
//!
//! Per-call lifecycle, as logged:
//!
//! ```text
//!   Created → Encoding → Dispatching⟲ → [Streaming] → Decoding → Complete
//!                                 └────────────────────────────→ Failed
//! ```

pub mod endpoint;
pub mod local;
pub mod remote;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures_lite::{StreamExt, stream};
use log::{debug, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::rpc::codec::{CallEnvelope, CallResult};
use crate::rpc::stream::{ChunkStream, GuardedStream};

pub use endpoint::{Endpoint, EndpointBuilder, EndpointManifest};
pub use local::{CordClient, LocalStreaming, LocalUnary};
pub use remote::{Handler, RemoteStreaming, RemoteUnary, Upstream};

// ── Invocation results ───────────────────────────────────────

/// A fully buffered reply.
#[derive(Debug, Clone)]
pub struct UnaryReply {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// A lazily produced, forward-only reply.
pub struct StreamReply {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub chunks: ChunkStream<Error>,
}

impl std::fmt::Debug for StreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReply")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Invocation {
    Unary(UnaryReply),
    Stream(StreamReply),
}

/// One way of carrying out a call.
#[async_trait]
pub trait Invoke: Send + Sync {
    async fn invoke(&self, envelope: CallEnvelope) -> Result<Invocation>;
}

// ── Call lifecycle ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Created,
    Encoding,
    Dispatching,
    Streaming,
    Decoding,
    Complete,
    Failed,
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Encoding => "encoding",
            Self::Dispatching => "dispatching",
            Self::Streaming => "streaming",
            Self::Decoding => "decoding",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Logs state transitions and elapsed time of one call.
#[derive(Debug)]
pub struct CallTrace {
    path: String,
    started: Instant,
    state: CallState,
}

impl CallTrace {
    pub fn start(path: &str) -> Self {
        info!("cord {path}: invoking");
        Self {
            path: path.to_owned(),
            started: Instant::now(),
            state: CallState::Created,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn advance(&mut self, state: CallState) {
        debug!("cord {}: {} -> {}", self.path, self.state, state);
        self.state = state;
    }

    pub fn complete(&mut self) {
        self.state = CallState::Complete;
        info!("cord {}: completed in {:?}", self.path, self.started.elapsed());
    }

    pub fn fail(&mut self, err: &Error) {
        self.state = CallState::Failed;
        warn!("cord {}: failed after {:?}: {err}", self.path, self.started.elapsed());
    }
}

/// Completes the trace when the stream it rides in is released.
struct StreamFinish(CallTrace);

impl Drop for StreamFinish {
    fn drop(&mut self) {
        self.0.complete();
    }
}

// ── Strategies ───────────────────────────────────────────────

/// How a cord is bound.
pub enum Binding {
    /// Calls go over the network to a deployment.
    Local {
        client: Arc<CordClient>,
        deployment_id: String,
    },
    /// Calls execute here, inside the deployment.
    Remote { handler: Handler, upstream: Upstream },
}

/// The four concrete strategies.
pub enum Strategy {
    LocalUnary(LocalUnary),
    LocalStreaming(LocalStreaming),
    RemoteUnary(RemoteUnary),
    RemoteStreaming(RemoteStreaming),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocalUnary(_) => "local-unary",
            Self::LocalStreaming(_) => "local-streaming",
            Self::RemoteUnary(_) => "remote-unary",
            Self::RemoteStreaming(_) => "remote-streaming",
        }
    }
}

#[async_trait]
impl Invoke for Strategy {
    async fn invoke(&self, envelope: CallEnvelope) -> Result<Invocation> {
        match self {
            Self::LocalUnary(s) => s.invoke(envelope).await,
            Self::LocalStreaming(s) => s.invoke(envelope).await,
            Self::RemoteUnary(s) => s.invoke(envelope).await,
            Self::RemoteStreaming(s) => s.invoke(envelope).await,
        }
    }
}

// ── Cord ─────────────────────────────────────────────────────

/// An endpoint bound to its dispatch strategy.
pub struct Cord {
    endpoint: Arc<Endpoint>,
    strategy: Strategy,
}

impl Cord {
    pub fn bind(endpoint: Endpoint, binding: Binding) -> Result<Self> {
        let endpoint = Arc::new(endpoint);
        let strategy = match binding {
            Binding::Local {
                client,
                deployment_id,
            } => {
                if endpoint.is_streaming() {
                    Strategy::LocalStreaming(LocalStreaming::new(client, deployment_id, Arc::clone(&endpoint)))
                } else {
                    Strategy::LocalUnary(LocalUnary::new(client, deployment_id, Arc::clone(&endpoint)))
                }
            }
            Binding::Remote { handler, upstream } => {
                remote::resolve(Arc::clone(&endpoint), handler, upstream)?
            }
        };
        debug!("cord {}: bound as {}", endpoint.path(), strategy.name());
        Ok(Self { endpoint, strategy })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Dispatch an already encoded call.
    pub async fn invoke(&self, envelope: CallEnvelope) -> Result<Invocation> {
        let mut trace = CallTrace::start(self.endpoint.path());
        trace.advance(CallState::Dispatching);
        self.invoke_traced(envelope, trace).await
    }

    async fn invoke_traced(&self, envelope: CallEnvelope, mut trace: CallTrace) -> Result<Invocation> {
        match self.strategy.invoke(envelope).await {
            Ok(Invocation::Unary(reply)) => {
                trace.complete();
                Ok(Invocation::Unary(reply))
            }
            Ok(Invocation::Stream(reply)) => {
                trace.advance(CallState::Streaming);
                let chunks = GuardedStream::new(reply.chunks, StreamFinish(trace)).boxed();
                Ok(Invocation::Stream(StreamReply { chunks, ..reply }))
            }
            Err(e) => {
                trace.fail(&e);
                Err(e)
            }
        }
    }

    /// Unary call decoding an embedded cord's `{"result": ..}` reply.
    pub async fn call<A, K, R>(&self, args: &A, kwargs: &K) -> Result<R>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.call_with(args, kwargs, |body| {
            let reply: CallResult = serde_json::from_slice(&body).map_err(crate::rpc::codec::CodecError::from)?;
            Ok(reply.decode()?)
        })
        .await
    }

    /// Unary call with a caller-supplied decoder for the raw reply body.
    pub async fn call_with<A, K, R, F>(&self, args: &A, kwargs: &K, decode: F) -> Result<R>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
        F: FnOnce(Bytes) -> Result<R>,
    {
        if self.endpoint.is_streaming() {
            return Err(Error::BindingMismatch {
                path: self.endpoint.path().to_owned(),
                reason: "unary call on a streaming cord",
            });
        }
        let mut trace = CallTrace::start(self.endpoint.path());
        trace.advance(CallState::Encoding);
        let envelope = match CallEnvelope::new(args, kwargs) {
            Ok(env) => env,
            Err(e) => {
                let e = Error::from(e);
                trace.fail(&e);
                return Err(e);
            }
        };
        trace.advance(CallState::Dispatching);
        let result = match self.strategy.invoke(envelope).await {
            Ok(Invocation::Unary(reply)) if reply.status.is_success() => {
                trace.advance(CallState::Decoding);
                decode(reply.body)
            }
            Ok(Invocation::Unary(reply)) => Err(Error::RemoteInvocation {
                status: reply.status.as_u16(),
                body: String::from_utf8_lossy(&reply.body).into_owned(),
            }),
            Ok(Invocation::Stream(_)) => Err(Error::BindingMismatch {
                path: self.endpoint.path().to_owned(),
                reason: "unary call produced a stream",
            }),
            Err(e) => Err(e),
        };
        match &result {
            Ok(_) => trace.complete(),
            Err(e) => trace.fail(e),
        }
        result
    }

    /// Streaming call yielding raw chunks in arrival order.
    pub async fn stream<A, K>(&self, args: &A, kwargs: &K) -> Result<ChunkStream<Error>>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        if !self.endpoint.is_streaming() {
            return Err(Error::BindingMismatch {
                path: self.endpoint.path().to_owned(),
                reason: "streaming call on a unary cord",
            });
        }
        let mut trace = CallTrace::start(self.endpoint.path());
        trace.advance(CallState::Encoding);
        let envelope = match CallEnvelope::new(args, kwargs) {
            Ok(env) => env,
            Err(e) => {
                let e = Error::from(e);
                trace.fail(&e);
                return Err(e);
            }
        };
        trace.advance(CallState::Dispatching);
        match self.invoke_traced(envelope, trace).await? {
            Invocation::Stream(reply) if reply.status.is_success() => Ok(reply.chunks),
            Invocation::Stream(reply) => {
                let body = collect_text(reply.chunks).await;
                Err(Error::RemoteInvocation {
                    status: reply.status.as_u16(),
                    body,
                })
            }
            Invocation::Unary(reply) => Err(Error::RemoteInvocation {
                status: reply.status.as_u16(),
                body: String::from_utf8_lossy(&reply.body).into_owned(),
            }),
        }
    }

    /// Streaming call decoding each chunk with `decode`.
    pub async fn stream_with<A, K, T, F>(
        &self,
        args: &A,
        kwargs: &K,
        mut decode: F,
    ) -> Result<stream::Boxed<Result<T>>>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
        T: Send + 'static,
        F: FnMut(Bytes) -> Result<T> + Send + 'static,
    {
        let chunks = self.stream(args, kwargs).await?;
        Ok(chunks.map(move |chunk| chunk.and_then(&mut decode)).boxed())
    }
}

async fn collect_text(mut chunks: ChunkStream<Error>) -> String {
    let mut out = Vec::new();
    while let Some(Ok(chunk)) = chunks.next().await {
        out.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ── Tests ────────────────────────────────────────────────────
