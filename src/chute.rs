//! Deployments ("chutes") — a named set of cords plus lifecycle hooks.
//!
//! The same definition serves both sides: the host mounts every cord with
//! [`Chute::bind_remote`], a caller binds them against the API with
//! [`Chute::connect`].

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures_lite::future::{Boxed as BoxFuture, FutureExt};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cord::{Binding, Cord, CordClient, Endpoint, EndpointManifest, Handler, Upstream};
use crate::error::{Error, Result};

type LifecycleHook = Arc<dyn Fn() -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

/// Deterministic deployment id for `username`/`name`.
pub fn chute_uid(username: &str, name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{username}::chute::{name}").as_bytes())
}

/// A deployment definition.
pub struct Chute {
    username: String,
    name: String,
    uid: Uuid,
    concurrency: usize,
    cords: Vec<(Endpoint, Handler)>,
    startup: Vec<LifecycleHook>,
    shutdown: Vec<LifecycleHook>,
}

impl Chute {
    pub fn new(username: impl Into<String>, name: impl Into<String>) -> Self {
        let username = username.into();
        let name = name.into();
        Self {
            uid: chute_uid(&username, &name),
            username,
            name,
            concurrency: 1,
            cords: Vec::new(),
            startup: Vec::new(),
            shutdown: Vec::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.cords.iter().map(|(ep, _)| ep)
    }

    /// Register a cord.  Paths must be unique within the deployment.
    pub fn cord(&mut self, endpoint: Endpoint, handler: Handler) -> Result<&mut Self> {
        if self.cords.iter().any(|(ep, _)| ep.path() == endpoint.path()) {
            return Err(Error::DuplicatePath(endpoint.path().to_owned()));
        }
        // Resolve once now so kind mismatches surface at definition time.
        Cord::bind(
            endpoint.clone(),
            Binding::Remote {
                handler: handler.clone(),
                upstream: Upstream::new("http://127.0.0.1"),
            },
        )?;
        self.cords.push((endpoint, handler));
        Ok(self)
    }

    /// Register a hook run once before the host accepts connections.
    pub fn on_startup<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.startup.push(Arc::new(move || hook().boxed()));
        self
    }

    /// Register a hook run once after the host stops accepting connections.
    pub fn on_shutdown<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.shutdown.push(Arc::new(move || hook().boxed()));
        self
    }

    pub async fn run_startup_hooks(&self) -> anyhow::Result<()> {
        for (i, hook) in self.startup.iter().enumerate() {
            info!("chute {}: running startup hook {}", self.name, i + 1);
            hook().await?;
        }
        Ok(())
    }

    /// Run every shutdown hook in order.  A failing hook does not stop the
    /// rest; the first failure is returned.
    pub async fn run_shutdown_hooks(&self) -> anyhow::Result<()> {
        let mut first_failure = None;
        for (i, hook) in self.shutdown.iter().enumerate() {
            info!("chute {}: running shutdown hook {}", self.name, i + 1);
            if let Err(e) = hook().await {
                warn!("chute {}: shutdown hook {} failed: {e:#}", self.name, i + 1);
                first_failure.get_or_insert(e);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// Bind every cord for in-deployment execution.
    pub fn bind_remote(&self, upstream: &Upstream) -> Result<Vec<Cord>> {
        self.cords
            .iter()
            .map(|(ep, handler)| {
                Cord::bind(
                    ep.clone(),
                    Binding::Remote {
                        handler: handler.clone(),
                        upstream: upstream.clone(),
                    },
                )
            })
            .collect()
    }

    /// Bind every cord for calling through `client`, keyed by function name.
    pub fn connect(&self, client: &Arc<CordClient>) -> Result<BTreeMap<String, Cord>> {
        let deployment_id = self.uid.to_string();
        self.cords
            .iter()
            .map(|(ep, _)| Ok((ep.name().to_owned(), client.bind(&deployment_id, ep.clone())?)))
            .collect()
    }

    pub fn manifest(&self) -> ChuteManifest {
        ChuteManifest {
            username: self.username.clone(),
            name: self.name.clone(),
            uid: self.uid,
            concurrency: self.concurrency,
            cords: self.cords.iter().map(|(ep, _)| ep.manifest()).collect(),
        }
    }
}

/// Serialisable deployment description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChuteManifest {
    pub username: String,
    pub name: String,
    #[serde(default = "Uuid::nil")]
    pub uid: Uuid,
    #[serde(default = "one")]
    pub concurrency: usize,
    pub cords: Vec<EndpointManifest>,
}

fn one() -> usize {
    1
}

impl ChuteManifest {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Build a deployment whose cords are all passthrough.
    pub fn into_passthrough_chute(self) -> Result<Chute> {
        let mut chute = Chute::new(self.username, self.name).with_concurrency(self.concurrency);
        for cord in &self.cords {
            if !cord.passthrough {
                return Err(Error::Config(format!(
                    "{}: only passthrough cords can be loaded from a manifest",
                    cord.path
                )));
            }
            chute.cord(cord.to_endpoint()?, Handler::Passthrough)?;
        }
        Ok(chute)
    }
}

// ── Tests ────────────────────────────────────────────────────
