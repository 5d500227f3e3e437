//! `tylerd`: serves the ritual archive API, the page gate and stored files.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use tyler_core::config::AppConfig;
use tyler_server::bootstrap::ensure_seed_admin;
use tyler_server::{AppState, create_router};

/// Role-gated ritual document archive
#[derive(Parser, Debug)]
#[command(name = "tylerd", version, about, long_about = None)]
struct Args {
    /// Configuration file; optional when TYLER_* variables cover everything
    #[arg(
        short,
        long,
        env = "TYLER_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting tylerd");

    let config = load_config(Path::new(&args.config))?;

    tyler_server::metrics::register_metrics();

    let storage = tyler_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "object store ready");

    let metadata = tyler_metadata::from_config(&config.metadata)
        .await
        .context("failed to open metadata store")?;

    let state = AppState::new(config.clone(), storage, metadata);
    ensure_seed_admin(
        state.identity.as_ref(),
        state.metadata.as_ref(),
        config.admin.as_ref(),
    )
    .await
    .context("failed to ensure seed administrator")?;

    let _sweeper = state.spawn_session_sweeper();

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {:?}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(
        listener,
        create_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server terminated")
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Merge the optional TOML file with `TYLER_*` variables (`__` separates
/// nesting levels) and validate the result.
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let from_file = path.exists();
    if from_file {
        tracing::info!(path = %path.display(), "loading configuration file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!(path = %path.display(), "no configuration file");
    }

    // TYLER_CONFIG only names the file.
    let from_env = std::env::vars().any(|(key, _)| key.starts_with("TYLER_") && key != "TYLER_CONFIG");
    if !from_file && !from_env {
        anyhow::bail!(
            "no configuration found at {}\n\n\
             Pass --config <file> (or set TYLER_CONFIG), or configure through the \
             environment, e.g. TYLER_SERVER__BIND=0.0.0.0:8080 TYLER_ADMIN__PASSWORD=change-me.\n\
             config/server.example.toml lists every setting.",
            path.display()
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("TYLER_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    Ok(config)
}
