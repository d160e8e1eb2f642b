use crate::db::{self, DbConnection};
use crate::error::AppError;
use crate::models::{CurrentUser, StoredFile};
use crate::upload::storage::StorageRoot;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

async fn owned_file(conn: &DbConnection, user: &CurrentUser, id: Uuid) -> Result<StoredFile, AppError> {
    let file = db::get_file(conn, id).await?.ok_or(AppError::NotFound("File"))?;

    if file.user_id != user.id {
        tracing::warn!(
            file_id = %id,
            owner_id = %file.user_id,
            user_id = %user.id,
            "access denied to file"
        );
        return Err(AppError::AccessDenied);
    }
    Ok(file)
}

pub async fn list(conn: &DbConnection, user: &CurrentUser) -> Result<Vec<StoredFile>, AppError> {
    Ok(db::list_files(conn, user.id).await?)
}

/// The record and its verified absolute path.
pub async fn locate(
    conn: &DbConnection,
    storage: &StorageRoot,
    user: &CurrentUser,
    id: Uuid,
) -> Result<(StoredFile, PathBuf), AppError> {
    let file = owned_file(conn, user, id).await?;
    let path = storage.resolve(Path::new(&file.file_path))?;
    Ok((file, path))
}

/// Removes the record, then the bytes. Missing bytes are only logged.
pub async fn delete(
    conn: &DbConnection,
    storage: &StorageRoot,
    user: &CurrentUser,
    id: Uuid,
) -> Result<(), AppError> {
    let file = owned_file(conn, user, id).await?;
    let path = storage.resolve(Path::new(&file.file_path))?;

    if !db::delete_file(conn, id, user.id).await? {
        return Err(AppError::NotFound("File"));
    }
    tracing::info!(file_id = %id, user_id = %user.id, "file record deleted");

    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "file bytes removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(file_id = %id, path = %path.display(), "file not found on filesystem");
        }
        Err(e) => {
            tracing::error!(file_id = %id, path = %path.display(), "failed to remove file bytes: {e}");
        }
    }
    Ok(())
}
