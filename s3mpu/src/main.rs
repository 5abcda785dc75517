//! s3mpu - multipart upload session service
//!
//! Serves a JSON API that opens multipart uploads, hands out presigned part
//! URLs and finishes or aborts uploads against S3-compatible storage.

mod config;
mod router;

use clap::Parser;
use s3mpu_uploads::storage::{AwsStore, EphemeralStore, ObjectStore};
use s3mpu_uploads::{UploadConfig, UploadManager};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::config::{Backend, Config, EPHEMERAL_BUCKET};

#[derive(Parser, Debug)]
#[command(name = "s3mpu")]
#[command(about = "Multipart upload session service", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "S3MPU_PORT")]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "S3MPU_HOST")]
    host: Option<String>,

    /// Storage backend
    #[arg(long, value_enum, env = "S3MPU_BACKEND")]
    backend: Option<Backend>,

    /// Configuration file (defaults to an optional ./s3mpu.toml)
    #[arg(short, long, env = "S3MPU_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "S3MPU_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "s3mpu={level},s3mpu_uploads={level},tower_http=debug",
                    level = args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }

    let (manager, local_store) = build_manager(&config).await?;

    info!("Starting s3mpu...");
    info!("  Backend: {:?}", config.backend);
    info!("  Bucket: {}", manager.bucket());
    info!("  Part size: {} bytes", manager.config().part_size);

    // Create router
    let app = router::create_router(manager, local_store);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the manager, plus the in-memory store when it must be served locally
async fn build_manager(
    config: &Config,
) -> anyhow::Result<(UploadManager, Option<Arc<EphemeralStore>>)> {
    let mut uploads: UploadConfig = config.uploads.clone();

    let (storage, local_store): (Arc<dyn ObjectStore>, _) = match config.backend {
        Backend::S3 => {
            uploads = uploads.validated()?;
            (Arc::new(AwsStore::connect(&uploads).await), None)
        }
        Backend::Ephemeral => {
            if uploads.bucket.is_empty() {
                uploads.bucket = EPHEMERAL_BUCKET.to_string();
            }
            let endpoint = match &uploads.endpoint {
                Some(endpoint) => Url::parse(endpoint)?,
                None => Url::parse(&format!("http://localhost:{}", config.server.port))?,
            };
            let mut store =
                EphemeralStore::new(uploads.bucket.clone(), endpoint).with_region(&uploads.region);
            if let Some(credentials) = &uploads.credentials {
                store = store.with_credentials(credentials.to_signing());
            }
            let store = Arc::new(store);
            (store.clone(), Some(store))
        }
    };

    Ok((UploadManager::new(storage, uploads)?, local_store))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
