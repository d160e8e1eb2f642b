pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod handlers;
pub mod models;
pub mod notes;
pub mod sanitizer;
pub mod upload;

use crate::db::DbConnection;
use crate::upload::UploadValidator;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{classify::ServerErrorsFailureClass, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::Span;

/// Multipart framing allowed on top of the upload limit.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: DbConnection,
    pub uploads: Arc<UploadValidator>,
    pub bcrypt_cost: u32,
}

impl AppState {
    pub fn new(db: DbConnection, uploads: UploadValidator, bcrypt_cost: u32) -> Self {
        Self {
            db,
            uploads: Arc::new(uploads),
            bcrypt_cost,
        }
    }
}

pub fn create_routes(state: AppState) -> Router {
    let body_limit = state.uploads.max_size().saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/register", post(handlers::register_user))
        .route("/login", post(handlers::login_user))
        .route("/me", get(handlers::me))
        .route("/upload", post(handlers::upload_file))
        .route("/files", get(handlers::list_files))
        .route("/files/:file_id", delete(handlers::delete_file))
        .route("/files/:file_id/download", get(handlers::download_file))
        .route("/notes", get(handlers::list_notes).post(handlers::create_note))
        .route("/notes/:note_id", delete(handlers::delete_note))
        .layer(TraceLayer::new_for_http().on_failure(
            |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                tracing::error!("Server error: {error}");
            },
        ))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
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

    tracing::info!("signal received, starting graceful shutdown");
}
