//! Endpoint descriptors.
//!
//! An [`Endpoint`] is the static half of a cord: which function it
//! exposes, where it is mounted, and how it is invoked.  It is built once
//! at deployment-definition time and never mutated afterwards.
//!
//! Paths are normalised to `"/" + trim('/')` and must match
//! `^(/[a-z0-9]+[a-z0-9-_]*)+$`.

use std::sync::LazyLock;
use std::time::Duration;

use axum::http::Method;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const PATH_PATTERN: &str = r"^(/[a-z0-9]+[a-z0-9_-]*)+$";

static PATH_GRAMMAR: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(PATH_PATTERN).ok());

/// Normalise and validate an endpoint path.
pub fn normalize_path(raw: &str) -> Result<String> {
    let path = format!("/{}", raw.trim_matches('/'));
    let grammar_ok = PATH_GRAMMAR.as_ref().is_some_and(|re| re.is_match(&path));
    if path.contains("//") || !grammar_ok {
        return Err(Error::InvalidPath(raw.to_owned()));
    }
    Ok(path)
}

/// Immutable description of one exposed function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
    path: String,
    passthrough_path: String,
    method: Method,
    streaming: bool,
    passthrough: bool,
    provision_timeout: Option<Duration>,
}

impl Endpoint {
    pub fn builder(name: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder {
            name: name.into(),
            path: None,
            passthrough_path: None,
            method: Method::POST,
            streaming: false,
            passthrough: false,
            provision_timeout: None,
        }
    }

    /// Identifier of the wrapped function.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path on the sibling server a passthrough cord forwards to.
    pub fn passthrough_path(&self) -> &str {
        &self.passthrough_path
    }

    /// Verb used towards the sibling server for passthrough cords.
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// How long callers keep retrying while the deployment provisions;
    /// `None` defers to the client's default.
    pub fn provision_timeout(&self) -> Option<Duration> {
        self.provision_timeout
    }

    pub fn manifest(&self) -> EndpointManifest {
        EndpointManifest {
            function: self.name.clone(),
            path: self.path.clone(),
            passthrough_path: self.passthrough_path.clone(),
            method: self.method.to_string(),
            stream: self.streaming,
            passthrough: self.passthrough,
        }
    }
}

/// Builder for [`Endpoint`]; paths default to `/{name}`.
#[derive(Debug, Clone)]
pub struct EndpointBuilder {
    name: String,
    path: Option<String>,
    passthrough_path: Option<String>,
    method: Method,
    streaming: bool,
    passthrough: bool,
    provision_timeout: Option<Duration>,
}

impl EndpointBuilder {
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn passthrough_path(mut self, path: impl Into<String>) -> Self {
        self.passthrough_path = Some(path.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn stream(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Endpoint> {
        let default_path = format!("/{}", self.name);
        let path = normalize_path(self.path.as_deref().unwrap_or(&default_path))?;
        let passthrough_path =
            normalize_path(self.passthrough_path.as_deref().unwrap_or(&default_path))?;
        Ok(Endpoint {
            name: self.name,
            path,
            passthrough_path,
            method: self.method,
            streaming: self.streaming,
            passthrough: self.passthrough,
            provision_timeout: self.provision_timeout,
        })
    }
}

/// Serialisable form of an endpoint, as published in a deployment manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointManifest {
    pub function: String,
    pub path: String,
    pub passthrough_path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub passthrough: bool,
}

fn default_method() -> String {
    Method::POST.to_string()
}

impl EndpointManifest {
    pub fn to_endpoint(&self) -> Result<Endpoint> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::Config(format!("bad method {:?} for {}", self.method, self.path)))?;
        Endpoint::builder(&self.function)
            .path(&self.path)
            .passthrough_path(&self.passthrough_path)
            .method(method)
            .stream(self.stream)
            .passthrough(self.passthrough)
            .build()
    }
}

// ── Tests ────────────────────────────────────────────────────
