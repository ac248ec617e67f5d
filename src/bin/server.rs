//! Chatterbox TTS API server.
//!
//! Loads the model (HuggingFace Hub or a local directory), the voice and
//! character registry, and optional S3 storage, then serves the HTTP API
//! until Ctrl+C.
//!
//! Configuration comes from environment variables (see `config.rs`); the
//! few flags below override their environment counterparts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatterbox_server::config::ServerConfig;
use chatterbox_server::registry::Registry;
use chatterbox_server::server::{router, AppState};
use chatterbox_server::storage::AudioStorage;
use chatterbox_server::{download, ChatterboxOnnx};

#[derive(Debug, Parser)]
#[command(name = "chatterbox-server", version, about = "Character-voice TTS API service")]
struct Cli {
    /// Bind address; overrides API_HOST.
    #[arg(long)]
    host: Option<String>,

    /// Bind port; overrides API_PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Registry JSON path; overrides REGISTRY_PATH.
    #[arg(long)]
    registry: Option<std::path::PathBuf>,

    /// Local model directory; overrides MODEL_DIR.
    #[arg(long)]
    model_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatterbox_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::from_env()?;
    if let Some(host) = cli.host {
        config.api_host = host;
    }
    if let Some(port) = cli.port {
        config.api_port = port;
    }
    if let Some(path) = cli.registry {
        config.registry_path = path;
    }
    if let Some(dir) = cli.model_dir {
        config.model_dir = Some(dir);
    }

    tracing::info!("Chatterbox TTS Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        host = %config.api_host,
        port = config.api_port,
        registry = %config.registry_path.display(),
        cache_capacity = config.effective_cache_capacity(),
        queue_depth = config.max_queue_depth,
        s3_enabled = config.s3_enabled,
        "configuration loaded"
    );

    let registry = Registry::load(&config.registry_path)?;
    tracing::info!(
        characters = registry.characters.len(),
        voices = registry.voices.len(),
        "registry loaded"
    );

    let load_start = Instant::now();
    let engine = load_engine(&config).await?;
    tracing::info!("model loaded in {:.2}s", load_start.elapsed().as_secs_f32());

    let storage = if config.s3_enabled && !config.s3_bucket_name.is_empty() {
        Some(
            AudioStorage::connect(
                config.aws_region.clone(),
                config.s3_bucket_name.clone(),
                config.s3_audio_prefix.clone(),
                Duration::from_secs(config.presign_expiry_secs),
            )
            .await,
        )
    } else {
        if config.s3_enabled {
            tracing::warn!("S3_ENABLED is set but S3_BUCKET_NAME is empty, storage disabled");
        }
        None
    };

    let state = AppState::new(Arc::new(engine), registry, storage, &config);
    let app = router(state);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

/// Model loading does blocking I/O (hub download, ONNX parse), so it runs on
/// a blocking thread.
async fn load_engine(config: &ServerConfig) -> Result<ChatterboxOnnx> {
    let model_dir = config.model_dir.clone();
    let model_repo = config.model_repo.clone();
    let engine = tokio::task::spawn_blocking(move || match model_dir {
        Some(dir) => download::load_from_dir(&dir),
        None => download::load_from_hub(&model_repo),
    })
    .await??;
    Ok(engine)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("cannot listen for Ctrl+C, running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("received Ctrl+C, shutting down");
}
