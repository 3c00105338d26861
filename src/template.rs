//! Ready-made deployment templates.

use axum::http::Method;

use crate::chute::Chute;
use crate::cord::{Endpoint, Handler};
use crate::error::Result;

/// `(function, passthrough path, method, streaming)` of the OpenAI-compatible
/// surface.
const OPENAI_ROUTES: [(&str, &str, Method, bool); 5] = [
    ("chat", "/v1/chat/completions", Method::POST, false),
    ("chat_stream", "/v1/chat/completions", Method::POST, true),
    ("completion", "/v1/completions", Method::POST, false),
    ("completion_stream", "/v1/completions", Method::POST, true),
    ("get_models", "/v1/models", Method::GET, false),
];

/// Passthrough deployment fronting an OpenAI-compatible sibling server.
pub fn openai_passthrough(
    username: impl Into<String>,
    name: impl Into<String>,
    concurrency: usize,
) -> Result<Chute> {
    let mut chute = Chute::new(username, name).with_concurrency(concurrency);
    for (function, upstream_path, method, streaming) in OPENAI_ROUTES {
        let endpoint = Endpoint::builder(function)
            .passthrough_path(upstream_path)
            .method(method)
            .stream(streaming)
            .passthrough(true)
            .build()?;
        chute.cord(endpoint, Handler::Passthrough)?;
    }
    Ok(chute)
}
