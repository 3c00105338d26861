//! Remote-mode strategies: executing a cord inside the deployment.
//!
//! Two kinds of target:
//!
//! - **Embedded** — a Rust function bound with [`Handler::unary`] or
//!   [`Handler::streaming`].  Arguments are decoded from the envelope,
//!   the function runs, and its value (unary) or chunks (streaming) form
//!   the reply.
//! - **Passthrough** — the decoded keyword arguments are forwarded to a
//!   sibling HTTP server using the endpoint's method, and the sibling's
//!   reply is returned verbatim, status and content type included.
//!
//! | kwarg     | upstream request                               |
//! |-----------|------------------------------------------------|
//! | `json`    | JSON body                                      |
//! | `params`  | query string                                   |
//! | `data`    | raw body (string) or urlencoded form (object)  |
//! | `headers` | extra request headers                          |
//! | `timeout` | per-request timeout in seconds                 |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode, header};
use bytes::Bytes;
use futures_lite::future::{Boxed as BoxFuture, FutureExt};
use futures_lite::{Stream, StreamExt};
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{Endpoint, Invocation, Invoke, Strategy, StreamReply, UnaryReply};
use crate::error::{Error, Result};
use crate::rpc::codec::{CallEnvelope, CallResult};
use crate::rpc::stream::ChunkStream;

type UnaryFn = Arc<dyn Fn(CallEnvelope) -> BoxFuture<Result<Bytes>> + Send + Sync>;
type StreamFn = Arc<dyn Fn(CallEnvelope) -> Result<ChunkStream<Error>> + Send + Sync>;

// ── Handlers ─────────────────────────────────────────────────

/// The function side of a cord binding.
#[derive(Clone)]
pub enum Handler {
    Unary(UnaryFn),
    Streaming(StreamFn),
    /// Forward to the sibling server.
    Passthrough,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

impl Handler {
    /// Wrap an async function of decoded `(args, kwargs)`.
    pub fn unary<A, K, R, F, Fut>(f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        K: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A, K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::Unary(Arc::new(move |envelope: CallEnvelope| {
            let f = Arc::clone(&f);
            async move {
                let args: A = envelope.decode_args()?;
                let kwargs: K = envelope.decode_kwargs()?;
                let value = (*f)(args, kwargs).await.map_err(Error::Handler)?;
                let body = serde_json::to_vec(&CallResult::encode(&value)?)
                    .map_err(crate::rpc::codec::CodecError::from)?;
                Ok::<_, Error>(Bytes::from(body))
            }
            .boxed()
        }))
    }

    /// Wrap a function of decoded `(args, kwargs)` returning a chunk stream.
    pub fn streaming<A, K, S, F>(f: F) -> Self
    where
        A: DeserializeOwned,
        K: DeserializeOwned,
        S: Stream<Item = anyhow::Result<Bytes>> + Send + 'static,
        F: Fn(A, K) -> S + Send + Sync + 'static,
    {
        Self::Streaming(Arc::new(move |envelope: CallEnvelope| -> Result<ChunkStream<Error>> {
            let args: A = envelope.decode_args()?;
            let kwargs: K = envelope.decode_kwargs()?;
            Ok(f(args, kwargs).map(|chunk| chunk.map_err(Error::Handler)).boxed())
        }))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unary(_) => "unary",
            Self::Streaming(_) => "streaming",
            Self::Passthrough => "passthrough",
        }
    }
}

// ── Upstream ─────────────────────────────────────────────────

/// The sibling server passthrough cords forward to.
#[derive(Debug, Clone)]
pub struct Upstream {
    http: reqwest::Client,
    base_url: String,
}

impl Upstream {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Passthrough target of one endpoint.
#[derive(Debug, Clone)]
pub struct Passthrough {
    upstream: Upstream,
    path: String,
    method: Method,
}

impl Passthrough {
    fn new(upstream: Upstream, endpoint: &Endpoint) -> Self {
        Self {
            upstream,
            path: endpoint.passthrough_path().to_owned(),
            method: endpoint.method().clone(),
        }
    }

    async fn send(&self, envelope: &CallEnvelope) -> Result<reqwest::Response> {
        let kwargs: Map<String, Value> = envelope.decode_kwargs()?;
        Ok(self.request(kwargs).send().await?)
    }

    /// Translate the caller's keyword arguments into the upstream request.
    fn request(&self, kwargs: Map<String, Value>) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.upstream.base_url, self.path);
        debug!("passthrough: {} {}", self.method, url);
        let mut request = self.upstream.http.request(self.method.clone(), &url);
        for (key, value) in kwargs {
            request = match (key.as_str(), value) {
                ("json", body) => request.json(&body),
                ("params", params) => request.query(&params),
                ("data", Value::String(raw)) => request.body(raw),
                ("data", Value::Object(form)) => request.form(&form),
                ("headers", Value::Object(headers)) => {
                    headers.into_iter().fold(request, |request, (name, value)| {
                        let value = match value {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        request.header(name, value)
                    })
                }
                ("timeout", Value::Number(secs)) => match secs.as_f64() {
                    Some(secs) if secs > 0.0 => request.timeout(Duration::from_secs_f64(secs)),
                    _ => request,
                },
                (other, _) => {
                    warn!("passthrough: ignoring unsupported argument {other:?}");
                    request
                }
            };
        }
        request
    }
}

pub(super) fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

// ── Strategies ───────────────────────────────────────────────

enum UnaryTarget {
    Embedded(UnaryFn),
    Passthrough(Passthrough),
}

enum StreamTarget {
    Embedded(StreamFn),
    Passthrough(Passthrough),
}

pub struct RemoteUnary {
    target: UnaryTarget,
}

pub struct RemoteStreaming {
    target: StreamTarget,
}

#[async_trait]
impl Invoke for RemoteUnary {
    async fn invoke(&self, envelope: CallEnvelope) -> Result<Invocation> {
        let reply = match &self.target {
            UnaryTarget::Embedded(f) => UnaryReply {
                status: StatusCode::OK,
                content_type: Some("application/json".into()),
                body: f(envelope).await?,
            },
            UnaryTarget::Passthrough(p) => {
                let response = p.send(&envelope).await?;
                UnaryReply {
                    status: response.status(),
                    content_type: content_type(&response),
                    body: response.bytes().await?,
                }
            }
        };
        Ok(Invocation::Unary(reply))
    }
}

#[async_trait]
impl Invoke for RemoteStreaming {
    async fn invoke(&self, envelope: CallEnvelope) -> Result<Invocation> {
        let reply = match &self.target {
            StreamTarget::Embedded(f) => StreamReply {
                status: StatusCode::OK,
                content_type: Some("application/octet-stream".into()),
                chunks: f(envelope)?,
            },
            StreamTarget::Passthrough(p) => {
                let response = p.send(&envelope).await?;
                StreamReply {
                    status: response.status(),
                    content_type: content_type(&response),
                    chunks: response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(Error::Transport))
                        .boxed(),
                }
            }
        };
        Ok(Invocation::Stream(reply))
    }
}

/// Pick the remote strategy for `endpoint`, rejecting handlers whose kind
/// disagrees with the endpoint flags.
pub(super) fn resolve(endpoint: Arc<Endpoint>, handler: Handler, upstream: Upstream) -> Result<Strategy> {
    let mismatch = |reason| Error::BindingMismatch {
        path: endpoint.path().to_owned(),
        reason,
    };
    let strategy = match (handler, endpoint.is_passthrough(), endpoint.is_streaming()) {
        (Handler::Passthrough, true, false) => Strategy::RemoteUnary(RemoteUnary {
            target: UnaryTarget::Passthrough(Passthrough::new(upstream, &endpoint)),
        }),
        (Handler::Passthrough, true, true) => Strategy::RemoteStreaming(RemoteStreaming {
            target: StreamTarget::Passthrough(Passthrough::new(upstream, &endpoint)),
        }),
        (Handler::Passthrough, false, _) => {
            return Err(mismatch("passthrough handler on a non-passthrough endpoint"));
        }
        (_, true, _) => return Err(mismatch("passthrough endpoint needs a passthrough handler")),
        (Handler::Unary(f), false, false) => Strategy::RemoteUnary(RemoteUnary {
            target: UnaryTarget::Embedded(f),
        }),
        (Handler::Streaming(f), false, true) => Strategy::RemoteStreaming(RemoteStreaming {
            target: StreamTarget::Embedded(f),
        }),
        (Handler::Unary(_), false, true) => {
            return Err(mismatch("unary function on a streaming endpoint"));
        }
        (Handler::Streaming(_), false, false) => {
            return Err(mismatch("streaming function on a unary endpoint"));
        }
    };
    Ok(strategy)
}

// ── Tests ────────────────────────────────────────────────────
