use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Every failure a request can end in.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User already exists")]
    UserExists,

    #[error("No file part")]
    NoFile,

    #[error("File too large (max: {max} bytes)")]
    TooLarge { max: usize },

    #[error("File type not allowed")]
    TypeNotAllowed,

    #[error("Unsafe file path")]
    UnsafePath,

    /// Sniffed content disagrees with the claimed extension.
    #[error("File content does not match extension (expected {expected}, detected {detected})")]
    ContentMismatch {
        expected: &'static str,
        detected: String,
    },

    #[error("Image sanitization failed: {0}")]
    SanitizationFailed(String),

    #[error("Access denied")]
    AccessDenied,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("Storage I/O error")]
    StorageIo(#[from] std::io::Error),

    #[error("Database error")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotLoggedIn | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::UserNotFound | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UserExists => StatusCode::CONFLICT,
            AppError::NoFile | AppError::TypeNotAllowed | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsafePath | AppError::ContentMismatch { .. } | AppError::AccessDenied => {
                StatusCode::FORBIDDEN
            }
            AppError::SanitizationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::StorageIo(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotLoggedIn => "NOT_LOGGED_IN",
            AppError::UserNotFound => "USER_NOT_FOUND",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::UserExists => "USER_EXISTS",
            AppError::NoFile => "NO_FILE",
            AppError::TooLarge { .. } => "TOO_LARGE",
            AppError::TypeNotAllowed => "TYPE_NOT_ALLOWED",
            AppError::UnsafePath => "UNSAFE_PATH",
            AppError::ContentMismatch { .. } => "CONTENT_MISMATCH",
            AppError::SanitizationFailed(_) => "SANITIZATION_FAILED",
            AppError::AccessDenied => "ACCESS_DENIED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::StorageIo(_) => "STORAGE_IO_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Server-side failures are logged in full and reported generically.
        let message = if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
            match &self {
                AppError::StorageIo(_) => "Storage operation failed".to_string(),
                AppError::Database(_) => "Database operation failed".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "success": false,
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
