//! Parachute host — serves one deployment's cords behind the signed,
//! encrypted, admission-controlled transport.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  CLI flags ─▶ ServerConfig (JSON file, then overrides)       │
//! │                                                              │
//! │  --manifest / --template ─▶ Chute (cords + startup hooks)    │
//! │  --seed ─▶ SoftEnclave ─┐                                    │
//! │  --validator ─▶ Ed25519Verifier ─┴─▶ SecureSession           │
//! │                                                              │
//! │  axum: admission ─▶ security ─▶ cord / built-in route        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};

use parachute::adapters::soft_enclave::SoftEnclave;
use parachute::chute::{Chute, ChuteManifest};
use parachute::config::{PayloadSecurity, ServerConfig};
use parachute::ports::SecureEnclave;
use parachute::{server, template};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Template {
    /// OpenAI-compatible passthrough to a sibling server.
    Openai,
}

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "parachute", version)]
#[command(about = "Serve a deployment's cords over the secured transport")]
struct Args {
    /// JSON server configuration; flags below override its fields.
    #[arg(long, env = "PARACHUTE_CONFIG")]
    config: Option<PathBuf>,

    /// Deployment manifest (passthrough cords only).
    #[arg(long, conflicts_with = "template", required_unless_present = "template")]
    manifest: Option<PathBuf>,

    /// Build the deployment from a template instead of a manifest.
    #[arg(long, value_enum)]
    template: Option<Template>,

    /// Deployment name (templates only).
    #[arg(long, default_value = "chute")]
    name: String,

    /// Owner of the deployment (templates only).
    #[arg(long, default_value = "anonymous")]
    username: String,

    #[arg(long, env = "PARACHUTE_MINER")]
    miner: Option<String>,

    /// Hex ed25519 public key of the validator.
    #[arg(long, env = "PARACHUTE_VALIDATOR")]
    validator: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Seed for the software enclave.
    #[arg(long, env = "PARACHUTE_SEED")]
    seed: Option<u64>,

    #[arg(long)]
    payload_security: Option<PayloadSecurity>,

    #[arg(long)]
    concurrency: Option<usize>,

    /// Sibling server passthrough cords forward to.
    #[arg(long)]
    passthrough_url: Option<String>,

    /// Mount `/_procs` and `/_slurp`.
    #[arg(long)]
    dev_tooling: bool,

    /// Skip authentication for loopback callers.
    #[arg(long)]
    trust_loopback: bool,

    #[arg(long)]
    debug: bool,

    /// Print the deployment manifest as JSON and exit.
    #[arg(long)]
    print_manifest: bool,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(miner) = &self.miner {
            config.miner_identity.clone_from(miner);
        }
        if let Some(validator) = &self.validator {
            config.validator_identity.clone_from(validator);
        }
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(mode) = self.payload_security {
            config.payload_security = mode;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = Some(concurrency);
        }
        if let Some(url) = &self.passthrough_url {
            config.passthrough_base_url.clone_from(url);
        }
        config.dev_tooling |= self.dev_tooling;
        config.trust_loopback |= self.trust_loopback;
        config.validate()?;
        Ok(config)
    }

    fn chute(&self) -> Result<Chute> {
        let chute = match (&self.manifest, self.template) {
            (Some(path), _) => ChuteManifest::from_json_file(path)?.into_passthrough_chute()?,
            (None, Some(Template::Openai)) => template::openai_passthrough(
                &self.username,
                &self.name,
                self.concurrency.unwrap_or(1),
            )?,
            (None, None) => bail!("one of --manifest or --template is required"),
        };
        Ok(chute)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let chute = args.chute().context("failed to load deployment")?;
    if args.print_manifest {
        println!("{}", serde_json::to_string_pretty(&chute.manifest())?);
        return Ok(());
    }

    let config = args.server_config().context("invalid configuration")?;
    if config.payload_security == PayloadSecurity::Plain {
        warn!("payload security is disabled; bodies travel in the clear");
    }

    let enclave: Option<Arc<dyn SecureEnclave>> = match args.seed {
        Some(seed) => Some(Arc::new(SoftEnclave::new(seed))),
        None if config.payload_security == PayloadSecurity::Plain => None,
        None => {
            warn!("no --seed given; encrypted payloads and attestation will fail");
            None
        }
    };
    let session = server::secure_session(&config, enclave)?;

    info!("parachute v{}", env!("CARGO_PKG_VERSION"));
    server::serve(chute, config, session).await
}
