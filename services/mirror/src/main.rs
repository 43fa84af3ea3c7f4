//! Serve a single upstream image as a read-only registry.

use camino::Utf8PathBuf;
use clap::Parser;
use mirror::{Keychain, MirrorBuilder, Reference};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Serve one upstream image under every repository and tag")]
struct Cli {
    /// Upstream image, e.g. `ghcr.io/org/app:v1` or `alpine@sha256:...`
    reference: Reference,

    /// Address to listen on; `:PORT` listens on every interface
    #[arg(long, default_value = ":8080")]
    listen_address: String,

    /// Directory holding the Docker `config.json` with registry credentials
    #[arg(long, env = "DOCKER_CONFIG")]
    docker_config: Option<Utf8PathBuf>,
}

/// A bare `:PORT` listens on every interface.
fn bind_address(listen_address: &str) -> String {
    if listen_address.starts_with(':') {
        format!("0.0.0.0{listen_address}")
    } else {
        listen_address.to_owned()
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "waiting for shutdown signal");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let keychain = match &cli.docker_config {
        Some(dir) => Keychain::from_dir(dir),
        None => Keychain::from_home(),
    };
    tracing::debug!(config = ?keychain.path(), "using docker credentials");

    let app = MirrorBuilder::new(cli.reference.clone())
        .keychain(keychain)
        .build();

    let listener = tokio::net::TcpListener::bind(bind_address(&cli.listen_address)).await?;
    tracing::info!(
        upstream = %cli.reference,
        "Registry mirror listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
