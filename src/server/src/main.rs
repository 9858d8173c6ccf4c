//! image-packer - pulls Docker images and serves them as compressed archives.
//!
//! Streams progress to the browser over server-sent events and evicts
//! finished artifacts after the retention window.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use packer_core::config::{PackerConfig, DEFAULT_DOCKER_HOST, DEFAULT_OUTPUT_DIR, DEFAULT_PORT};
use packer_core::LogFormat;
use packer_runtime::{DockerClient, DockerEndpoint, RetentionJanitor};

use packer_server::PackServer;

/// Docker image packer
#[derive(Parser, Debug)]
#[command(name = "image-packer", version, about = "Docker image packer")]
struct Args {
    /// Directory artifacts are written into and served from.
    #[arg(long, env = "APP_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// HTTP listening port.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Docker Engine endpoint (unix:// or tcp://).
    #[arg(long, env = "DOCKER_HOST", default_value = DEFAULT_DOCKER_HOST)]
    docker_host: String,

    /// Log output format (text or json).
    #[arg(long, env = "PACKER_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

impl Args {
    fn into_config(self) -> PackerConfig {
        PackerConfig {
            output_dir: self.output_dir,
            port: self.port,
            docker_host: self.docker_host,
            log_format: self.log_format,
            ..PackerConfig::default()
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Args::parse().into_config();
    init_tracing(config.log_format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        output_dir = %config.output_dir.display(),
        port = config.port,
        docker_host = %config.docker_host,
        "Starting image packer"
    );

    std::fs::create_dir_all(&config.output_dir).map_err(|e| {
        format!(
            "Failed to create output directory {}: {}",
            config.output_dir.display(),
            e
        )
    })?;

    let endpoint = DockerEndpoint::parse(&config.docker_host)?;
    let docker = DockerClient::connect(endpoint)
        .await
        .map_err(|e| format!("Failed to connect to Docker daemon: {}", e))?;

    let config = Arc::new(config);
    let _janitor = RetentionJanitor::new(&config).spawn();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    PackServer::new(config, Arc::new(docker)).serve(addr).await
}
