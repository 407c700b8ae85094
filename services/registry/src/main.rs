//! Registry server
//!
//! Run with: cargo run -p registry --features cli -- --config registry.toml

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use clap::Parser;
use registry::RegistryConfig;
use tracing_subscriber::EnvFilter;

/// Serve a container registry.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file (TOML).
    #[arg(short, long)]
    config: Utf8PathBuf,

    /// Address to serve on, overriding the configuration.
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let text = tokio::fs::read_to_string(&args.config).await?;
    let config: RegistryConfig = toml_edit::de::from_str(&text)?;
    let addr = args.listen.unwrap_or(config.listen);

    let app = config.builder().await?.build()?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Registry listening on http://{}", addr);
    tracing::info!("Try: curl http://{}/v2/", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
