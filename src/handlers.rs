use crate::auth::{create_auth_token, hash_password, verify_password};
use crate::db;
use crate::error::AppError;
use crate::models::CurrentUser;
use crate::upload::UploadCandidate;
use crate::{files, notes, AppState};
use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Name of the multipart field carrying the upload.
const FILE_FIELD: &str = "file";

#[derive(Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct AuthToken {
    token: String,
}

#[derive(Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

pub async fn register_user(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    let username = credentials.username.trim();
    if username.is_empty() || credentials.password.is_empty() {
        return Err(AppError::BadRequest("Username and password are required".into()));
    }

    let password_hash = hash_password(&credentials.password, state.bcrypt_cost).await?;
    let user_id = db::create_user(&state.db, username, &password_hash).await?;
    let token = create_auth_token(&state.db, &user_id).await?;

    tracing::info!(user_id = %user_id, username, "user registered");
    Ok((StatusCode::CREATED, Json(AuthToken { token })))
}

pub async fn login_user(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    let username = credentials.username.trim();
    let (user_id, password_hash) = db::find_credentials(&state.db, username)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !verify_password(&credentials.password, &password_hash).await {
        tracing::warn!(username, "login failed");
        return Err(AppError::InvalidCredentials);
    }

    let token = create_auth_token(&state.db, &user_id).await?;
    tracing::info!(user_id = %user_id, "user logged in");
    Ok(Json(AuthToken { token }))
}

pub async fn me(user: CurrentUser) -> Json<CurrentUser> {
    Json(user)
}

pub async fn upload_file(
    State(state): State<AppState>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let max_size = state.uploads.max_size();

    let candidate = loop {
        let next = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, max_size))?;
        let Some(mut field) = next else {
            return Err(AppError::NoFile);
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(AppError::NoFile);
        }

        // Stop reading as soon as the upload is known to be too large.
        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, max_size))? {
            if data.len() + chunk.len() > max_size {
                tracing::warn!(
                    user_id = %user.id,
                    max_bytes = max_size,
                    "upload rejected: too large"
                );
                return Err(AppError::TooLarge { max: max_size });
            }
            data.extend_from_slice(&chunk);
        }
        break UploadCandidate::new(filename, data);
    };

    let file = state.uploads.validate_and_store(candidate, user.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "File uploaded successfully",
            "file": file,
        })),
    ))
}

/// The body limit surfaces as a multipart error; keep it a size rejection.
fn multipart_error(err: MultipartError, max_size: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        tracing::warn!("upload rejected: request body over limit");
        AppError::TooLarge { max: max_size }
    } else {
        AppError::BadRequest(err.body_text())
    }
}

pub async fn list_files(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let files = files::list(&state.db, &user).await?;
    Ok(Json(json!({ "success": true, "files": files })))
}

pub async fn delete_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    files::delete(&state.db, state.uploads.storage(), &user, file_id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn download_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(file_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (file, path) = files::locate(&state.db, state.uploads.storage(), &user, file_id).await?;

    let handle = match tokio::fs::File::open(&path).await {
        Ok(handle) => handle,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(file_id = %file.id, path = %path.display(), "file not found on filesystem");
            return Err(AppError::NotFound("File"));
        }
        Err(e) => return Err(e.into()),
    };

    let mime_type = mime_guess::from_path(&path).first_or_octet_stream();
    let body = Body::from_stream(ReaderStream::new(handle));

    tracing::debug!(file_id = %file.id, user_id = %user.id, "serving download");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type.as_ref())
        .header(header::CONTENT_DISPOSITION, content_disposition(&file.filename)?)
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .header(header::CACHE_CONTROL, "private, no-store")
        .body(body)
        .map_err(|e| AppError::Internal(format!("build download response: {e}")))
}

/// `attachment` with an ASCII fallback name and the exact UTF-8 name in `filename*`.
fn content_disposition(filename: &str) -> Result<HeaderValue, AppError> {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    let encoded = utf8_percent_encode(filename, NON_ALPHANUMERIC);

    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .map_err(|e| AppError::Internal(format!("build Content-Disposition header: {e}")))
}

pub async fn list_notes(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let notes = notes::list(&state.db, &user).await?;
    Ok(Json(json!({ "success": true, "notes": notes })))
}

pub async fn create_note(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<NoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let note = notes::create(&state.db, &user, &request.title, &request.content).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "note": note })),
    ))
}

pub async fn delete_note(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(note_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    notes::delete(&state.db, &user, note_id).await?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_disposition_keeps_unicode_in_the_extended_name() {
        let value = content_disposition("résumé \"final\".pdf").unwrap();
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"r_sum_ _final_.pdf\"; \
             filename*=UTF-8''r%C3%A9sum%C3%A9%20%22final%22%2Epdf"
        );
    }

    #[test]
    fn content_disposition_plain_names() {
        let value = content_disposition("report.pdf").unwrap();
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"report.pdf\"; filename*=UTF-8''report%2Epdf"
        );
    }
}
