use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::services::{
    metadata_store::{MetadataStore, SqliteMetadataStore},
    object_store::LocalObjectStore,
    transfer::TransferOptions,
    upload_service::{UploadService, UploadSettings},
};

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;

const DEFAULT_LOG_FILTER: &str = "upload_gateway=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    info!("Starting upload-gateway with config: {:?}", cfg);

    // --- Ensure storage and spool directories exist ---
    for dir in [&cfg.storage_dir, &cfg.spool_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir))?;
            info!("Created directory at {}", dir);
        }
    }

    // --- Initialize metadata store ---
    let metadata = SqliteMetadataStore::connect(&cfg.database_url)
        .await
        .with_context(|| format!("connecting to {}", cfg.database_url))?;
    metadata.migrate().await?;

    // --- Handle migration mode ---
    if migrate {
        info!("Database migration complete.");
        metadata.close().await;
        return Ok(()); // exit after migration
    }

    metadata
        .ensure_table(&cfg.metadata_table, &cfg.partition_key)
        .await
        .with_context(|| format!("preparing metadata table {}", cfg.metadata_table))?;

    // --- Initialize object store ---
    let objects = LocalObjectStore::open(&cfg.storage_dir, &cfg.bucket, &cfg.region, &cfg.public_url)
        .await
        .with_context(|| format!("opening bucket {}", cfg.bucket))?;

    let metadata = Arc::new(metadata);
    let uploads = UploadService::new(
        Arc::new(objects),
        metadata.clone(),
        UploadSettings {
            metadata_table: cfg.metadata_table.clone(),
            partition_key: cfg.partition_key.clone(),
            transfer: TransferOptions::default(),
        },
    );
    let state = state::AppState::new(uploads, cfg.decoder_limits(), &cfg.spool_dir);

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    metadata.close().await;
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
