use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;

use auth::authority::StaticAuthority;
use services::{
    asset_service::AssetService, storage_service::StorageService, transform::ImageTransformer,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting asset-server with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory and file if needed, SQLx will not.
    let db_path_obj = Path::new(db_path);
    if let Some(parent) = db_path_obj.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    if let Err(e) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(db_path_obj)
    {
        tracing::warn!("Failed to open database file manually: {}", e);
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );

    let storage = StorageService::new(db, cfg.storage_dir.clone());
    storage.migrate().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Provision buckets and fallback assets ---
    for bucket in cfg.assets.all_buckets() {
        storage
            .ensure_bucket(bucket)
            .await
            .with_context(|| format!("provisioning bucket `{}`", bucket))?;
    }

    let assets = AssetService::new(
        Arc::new(storage.clone()),
        Arc::new(ImageTransformer::new()),
        cfg.assets.clone(),
    );
    if let Some(dir) = &cfg.defaults_dir {
        let count = assets
            .fallback()
            .provision_from_dir(dir)
            .await
            .with_context(|| format!("loading fallback assets from {:?}", dir))?;
        tracing::info!("Provisioned {} fallback asset(s)", count);
    }

    // --- Auth ---
    if cfg.auth_tokens.is_empty() {
        tracing::warn!("No auth tokens configured, uploads and deletes will be rejected");
    }
    let auth = auth::connect_static(
        StaticAuthority::new(cfg.auth_tokens.clone()),
        cfg.auth_timeout,
    );

    // --- Build router ---
    let state = AppState {
        assets,
        storage,
        auth,
    };
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(state);

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

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
