use anyhow::{Context, Result};
use filevault::config::Config;
use filevault::upload::{storage::StorageRoot, UploadValidator};
use filevault::{create_routes, db, shutdown_signal, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "filevault=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let conn = db::establish_connection(&config.database_path).with_context(|| {
        format!("open database {}", config.database_path.display())
    })?;
    let storage = StorageRoot::open(&config.storage_root).with_context(|| {
        format!("open storage root {}", config.storage_root.display())
    })?;
    tracing::info!(
        storage_root = %storage.path().display(),
        max_upload_bytes = config.max_upload_bytes,
        "storage ready"
    );

    let uploads = UploadValidator::new(conn.clone(), storage, config.max_upload_bytes);
    let app = create_routes(AppState::new(conn, uploads, config.bcrypt_cost));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}
