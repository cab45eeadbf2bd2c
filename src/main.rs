//! Multi-IdP SSO reverse proxy.
//!
//! Authenticates users against configured OIDC or SAML 2.0 identity
//! providers, then forwards requests to a single backend with identity
//! headers attached.

mod auth;
mod cache;
mod config;
mod error;
mod handlers;
mod middleware;
mod proxy;
mod security;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::config::{Config, LoggingConfig};
use crate::server::AppState;

#[derive(Parser, Debug)]
#[command(name = "sso-switch", version)]
#[command(about = "Multi-IdP SSO reverse proxy for OIDC and SAML")]
struct Args {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        default_value = "/etc/sso-switch/config.yaml",
        env = "SSO_SWITCH_CONFIG"
    )]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let cfg = Config::load(&args.config)?;
    cfg.validate()
        .map_err(|e| anyhow::anyhow!("invalid config: {}", e))?;

    init_tracing(&cfg.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "starting sso-switch");

    let cache = cache::new(&cfg.cache)
        .await
        .context("failed to create cache")?;
    info!(kind = %cfg.cache.kind, "cache initialized");

    let providers = auth::build_registry(&cfg, Arc::clone(&cache))
        .await
        .context("failed to initialize providers")?;

    let state = AppState::new(Arc::new(cfg), cache, Arc::new(providers))?;
    server::serve(state).await
}

fn init_tracing(cfg: &LoggingConfig) {
    let filter = format!(
        "{}={}",
        env!("CARGO_CRATE_NAME"),
        cfg.level.to_lowercase()
    );

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.format.to_lowercase() == "text" {
        builder.init();
    } else {
        builder.json().init();
    }
}
