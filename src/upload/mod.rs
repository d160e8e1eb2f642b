//! The upload validation pipeline.

pub mod naming;
pub mod sniff;
pub mod storage;

use crate::db::{self, DbConnection};
use crate::error::AppError;
use crate::models::{NewFile, StoredFile};
use crate::sanitizer;
use naming::Extension;
use std::path::{Path, PathBuf};
use storage::StorageRoot;
use uuid::Uuid;

/// Default upper bound on a single upload: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug)]
pub struct UploadCandidate {
    pub filename: String,
    pub data: Vec<u8>,
}

impl UploadCandidate {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

pub struct UploadValidator {
    db: DbConnection,
    storage: StorageRoot,
    max_size: usize,
}

impl UploadValidator {
    pub fn new(db: DbConnection, storage: StorageRoot, max_size: usize) -> Self {
        Self {
            db,
            storage,
            max_size,
        }
    }

    pub fn storage(&self) -> &StorageRoot {
        &self.storage
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Accepts or rejects `candidate` on behalf of `owner_id`. On success the
    /// bytes are on disk under a generated name and a record exists; on failure
    /// neither does.
    pub async fn validate_and_store(
        &self,
        candidate: UploadCandidate,
        owner_id: Uuid,
    ) -> Result<StoredFile, AppError> {
        if candidate.size() > self.max_size {
            tracing::warn!(
                owner_id = %owner_id,
                size_bytes = candidate.size(),
                max_bytes = self.max_size,
                "upload rejected: too large"
            );
            return Err(AppError::TooLarge { max: self.max_size });
        }

        let extension = Extension::from_filename(&candidate.filename).ok_or_else(|| {
            tracing::warn!(
                owner_id = %owner_id,
                claimed = %candidate.filename,
                "upload rejected: type not allowed"
            );
            AppError::TypeNotAllowed
        })?;

        let storage_name = naming::storage_name(owner_id, extension);

        naming::check_claimed_path(&candidate.filename).inspect_err(|_| {
            tracing::warn!(
                owner_id = %owner_id,
                claimed = %candidate.filename,
                "upload rejected: unsafe path"
            );
        })?;
        let path = self.storage.resolve(Path::new(&storage_name))?;

        storage::write_new(&path, &candidate.data).await?;
        tracing::debug!(path = %path.display(), size_bytes = candidate.size(), "upload written");

        let display_name = naming::display_name(&candidate.filename, extension);
        let new_file = NewFile {
            user_id: owner_id,
            filename: &display_name,
            file_path: &storage_name,
        };

        match self.inspect_and_record(&path, extension, new_file).await {
            Ok(file) => {
                tracing::info!(
                    file_id = %file.id,
                    owner_id = %owner_id,
                    filename = %file.filename,
                    stored_as = %storage_name,
                    "upload accepted"
                );
                Ok(file)
            }
            Err(e) => {
                storage::discard(&path).await;
                Err(e)
            }
        }
    }

    async fn inspect_and_record(
        &self,
        path: &Path,
        extension: Extension,
        new_file: NewFile<'_>,
    ) -> Result<StoredFile, AppError> {
        let expected = extension.expected_mime();
        let detected = sniff_on_disk(path.to_path_buf()).await?;

        if detected != Some(expected) {
            let detected = detected.unwrap_or(sniff::UNKNOWN).to_string();
            tracing::warn!(
                path = %path.display(),
                expected,
                detected = %detected,
                "upload rejected: content does not match extension"
            );
            return Err(AppError::ContentMismatch { expected, detected });
        }

        if let Some(format) = extension.image_format() {
            let target = path.to_path_buf();
            tokio::task::spawn_blocking(move || sanitizer::sanitize(&target, format))
                .await
                .map_err(|e| AppError::SanitizationFailed(e.to_string()))?
                .map_err(|e| {
                    tracing::warn!(path = %path.display(), "upload rejected: {e}");
                    AppError::SanitizationFailed(e.to_string())
                })?;
        }

        Ok(db::insert_file(&self.db, new_file).await?)
    }
}

async fn sniff_on_disk(path: PathBuf) -> Result<Option<&'static str>, AppError> {
    tokio::task::spawn_blocking(move || sniff::sniff_path(&path))
        .await
        .map_err(|e| AppError::Internal(format!("join content sniffing task: {e}")))?
        .map_err(AppError::from)
}
